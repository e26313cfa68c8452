//! Reload orchestrator behaviour: debouncing, cancellation and delivery order.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use kiln_host::{
    Capability, CapabilityFactory, CapabilityResult, ContainerNotice, DescriptorConfig, EventSink,
    HostError, HostEvent, InputEvent, OpenHistory, Pipeline, PipelineEvent, ReloadConfig,
    ReloadOrchestrator, ReloadState, RunId, SourceUnit, Surface, UnitValidator, ValidationOutcome,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Still;

impl Capability for Still {
    fn display_name(&self) -> &str {
        "fake::build"
    }

    fn paint(&mut self, surface: &mut Surface) -> CapabilityResult<()> {
        surface.fill = 0x00_00ff;
        Ok(())
    }

    fn handle_event(&mut self, _event: InputEvent) -> CapabilityResult<bool> {
        Ok(false)
    }
}

struct StillFactory;

impl CapabilityFactory for StillFactory {
    fn entry_point(&self) -> &str {
        "build"
    }

    fn instantiate(&self) -> CapabilityResult<Box<dyn Capability>> {
        Ok(Box::new(Still))
    }
}

/// Counts runs; optionally blocks the first run until it is cancelled.
#[derive(Default)]
struct FakeValidator {
    runs: AtomicUsize,
    block_first: bool,
}

impl UnitValidator for FakeValidator {
    fn validate(
        &self,
        unit: &SourceUnit,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Option<ValidationOutcome> {
        let run = self.runs.fetch_add(1, Ordering::SeqCst);
        let _ = events.send(PipelineEvent::Progress {
            percent: 10,
            message: "Starting validation...".into(),
        });
        if self.block_first && run == 0 {
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            return None;
        }
        let _ = events.send(PipelineEvent::Progress {
            percent: 100,
            message: "Validation complete".into(),
        });
        Some(ValidationOutcome::success(unit.clone(), Arc::new(StillFactory)))
    }
}

#[derive(Default)]
struct RecordingHistory {
    opened: Mutex<Vec<(PathBuf, DateTime<Utc>)>>,
}

impl OpenHistory for RecordingHistory {
    fn record_opened(&self, root: &Path, opened_at: DateTime<Utc>) {
        self.opened.lock().unwrap().push((root.to_path_buf(), opened_at));
    }
}

fn unit_dir() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("unit.ini"),
        "[source]\nmodule = widget_a\nentry_point = build\n",
    )
    .unwrap();
    fs::write(dir.path().join("widget_a.wat"), "(module)").unwrap();
    dir
}

async fn next_completed(events: &mut mpsc::Receiver<HostEvent>) -> (RunId, bool, String) {
    loop {
        match events.recv().await.expect("event stream closed") {
            HostEvent::Completed {
                run, ok, message, ..
            } => return (run, ok, message),
            _ => continue,
        }
    }
}

fn drain(events: &mut mpsc::Receiver<HostEvent>) -> Vec<HostEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn test_triggers_within_window_coalesce_into_one_run() {
    let dir = unit_dir();
    let validator = Arc::new(FakeValidator::default());
    let (orchestrator, handle, mut events) =
        ReloadOrchestrator::new(ReloadConfig::default(), validator.clone(), None);
    tokio::spawn(orchestrator.run());

    handle.load_unit(dir.path()).await.unwrap();
    let (_, ok, _) = next_completed(&mut events).await;
    assert!(ok);
    assert_eq!(validator.runs.load(Ordering::SeqCst), 1);

    let changed = dir.path().join("widget_a.wat");
    for _ in 0..5 {
        handle.file_changed(changed.clone()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    let (_, ok, _) = next_completed(&mut events).await;
    assert!(ok);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(validator.runs.load(Ordering::SeqCst), 2);
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_debounce_waits_for_quiet_window() {
    let dir = unit_dir();
    let validator = Arc::new(FakeValidator::default());
    let (orchestrator, handle, mut events) =
        ReloadOrchestrator::new(ReloadConfig::default(), validator.clone(), None);
    tokio::spawn(orchestrator.run());

    handle.load_unit(dir.path()).await.unwrap();
    next_completed(&mut events).await;

    handle
        .file_changed(dir.path().join("widget_a.wat"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(1400)).await;
    assert_eq!(validator.runs.load(Ordering::SeqCst), 1, "fired before the window");
    let states: Vec<ReloadState> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            HostEvent::StateChanged(s) => Some(s),
            _ => None,
        })
        .collect();
    assert_eq!(states.last(), Some(&ReloadState::Debouncing));

    next_completed(&mut events).await;
    assert_eq!(validator.runs.load(Ordering::SeqCst), 2);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_manual_reload_cancels_in_flight_run() {
    let dir = unit_dir();
    let validator = Arc::new(FakeValidator {
        block_first: true,
        ..FakeValidator::default()
    });
    let (orchestrator, handle, mut events) =
        ReloadOrchestrator::new(ReloadConfig::default(), validator.clone(), None);
    tokio::spawn(orchestrator.run());

    handle.load_unit(dir.path()).await.unwrap();
    // Wait until the first run is actually executing.
    loop {
        match events.recv().await.unwrap() {
            HostEvent::Progress { .. } => break,
            HostEvent::Completed { .. } => panic!("blocked run must not complete"),
            _ => {},
        }
    }
    handle.reload().await.unwrap();

    let (run, ok, _) = next_completed(&mut events).await;
    assert!(ok);
    assert_eq!(validator.runs.load(Ordering::SeqCst), 2);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let completed: Vec<RunId> = drain(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            HostEvent::Completed { run, .. } => Some(run),
            _ => None,
        })
        .collect();
    assert!(completed.is_empty(), "cancelled run delivered {completed:?}");
    assert_eq!(run.to_string(), "run-2");
    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_trigger_during_validation_sets_pending() {
    let dir = unit_dir();
    let validator = Arc::new(FakeValidator::default());
    let (orchestrator, handle, mut events) =
        ReloadOrchestrator::new(ReloadConfig::default(), validator.clone(), None);
    tokio::spawn(orchestrator.run());

    // Queue a trigger right behind the load, so it lands while validating.
    handle.load_unit(dir.path()).await.unwrap();
    handle
        .file_changed(dir.path().join("widget_a.wat"))
        .await
        .unwrap();

    next_completed(&mut events).await;
    next_completed(&mut events).await;
    assert_eq!(validator.runs.load(Ordering::SeqCst), 2);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_success_swaps_and_completed_is_last_for_run() {
    let dir = unit_dir();
    let (orchestrator, handle, mut events) = ReloadOrchestrator::new(
        ReloadConfig::default(),
        Arc::new(FakeValidator::default()),
        None,
    );
    tokio::spawn(orchestrator.run());

    handle.load_unit(dir.path()).await.unwrap();
    let mut seen = Vec::new();
    loop {
        let event = events.recv().await.unwrap();
        let done = matches!(event, HostEvent::Completed { .. });
        seen.push(event);
        if done {
            break;
        }
    }

    let hosted_at = seen
        .iter()
        .position(|e| matches!(e, HostEvent::Container(ContainerNotice::Hosted(_))))
        .expect("hosted notice");
    let last_progress = seen
        .iter()
        .rposition(|e| matches!(e, HostEvent::Progress { .. }))
        .unwrap();
    assert!(last_progress < hosted_at);
    assert!(matches!(
        seen.last(),
        Some(HostEvent::Completed { ok: true, hosted: Some(info), .. }) if info.display_name == "fake::build"
    ));

    let container = handle.container();
    let mut surface = Surface::new(4, 4);
    container.lock().unwrap().paint(&mut surface);
    assert_eq!(surface.fill, 0x00_00ff);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_load_unit_records_history_and_rejects_bad_roots() {
    let dir = unit_dir();
    let history = Arc::new(RecordingHistory::default());
    let (orchestrator, handle, mut events) = ReloadOrchestrator::new(
        ReloadConfig::default(),
        Arc::new(FakeValidator::default()),
        Some(history.clone() as Arc<dyn OpenHistory>),
    );
    tokio::spawn(orchestrator.run());

    let empty = TempDir::new().unwrap();
    let err = handle.load_unit(empty.path()).await.unwrap_err();
    assert!(matches!(err, HostError::DescriptorMissing(_)));

    let unit = handle.load_unit(dir.path()).await.unwrap();
    next_completed(&mut events).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let opened = history.opened.lock().unwrap();
    assert_eq!(opened.len(), 1);
    assert_eq!(opened[0].0, unit.root());
    drop(opened);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_auto_reload_toggle_reports_watch_status() {
    let dir = unit_dir();
    let (orchestrator, handle, mut events) = ReloadOrchestrator::new(
        ReloadConfig::default(),
        Arc::new(FakeValidator::default()),
        None,
    );
    tokio::spawn(orchestrator.run());

    handle.load_unit(dir.path()).await.unwrap();
    next_completed(&mut events).await;

    handle.set_auto_reload(true).await.unwrap();
    loop {
        if let HostEvent::WatchStatus { watching, files } = events.recv().await.unwrap() {
            assert!(watching);
            assert_eq!(files, 2);
            break;
        }
    }
    handle.set_auto_reload(false).await.unwrap();
    loop {
        if let HostEvent::WatchStatus { watching, files } = events.recv().await.unwrap() {
            assert!(!watching);
            assert_eq!(files, 0);
            break;
        }
    }
    handle.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_clears_container() {
    let dir = unit_dir();
    let (orchestrator, handle, mut events) = ReloadOrchestrator::new(
        ReloadConfig::default(),
        Arc::new(FakeValidator::default()),
        None,
    );
    let task = tokio::spawn(orchestrator.run());

    handle.load_unit(dir.path()).await.unwrap();
    next_completed(&mut events).await;
    handle.shutdown().await;
    task.await.unwrap();

    assert!(handle.container().lock().unwrap().is_empty());
    assert!(matches!(
        handle.reload().await,
        Err(HostError::OrchestratorClosed)
    ));
}

#[tokio::test]
async fn test_real_pipeline_failure_keeps_previous_capability() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("unit.ini"),
        "[source]\nmodule = widget_a\nentry_point = build\n",
    )
    .unwrap();
    let good = "(module\n  (func (export \"build\") (result i32) i32.const 1)\n  (func (export \"paint\") (param i32 i32 i32) (result i32) i32.const 0x112233)\n  (func (export \"on_event\") (param i32 i32 i32 i32) (result i32) i32.const 0))\n";
    fs::write(dir.path().join("widget_a.wat"), good).unwrap();

    let pipeline = Arc::new(Pipeline::new(DescriptorConfig::default()).unwrap());
    let (orchestrator, handle, mut events) =
        ReloadOrchestrator::new(ReloadConfig::default(), pipeline, None);
    tokio::spawn(orchestrator.run());

    handle.load_unit(dir.path()).await.unwrap();
    let (_, ok, _) = next_completed(&mut events).await;
    assert!(ok);

    fs::write(dir.path().join("widget_a.wat"), "(module\n  (func\n").unwrap();
    handle.reload().await.unwrap();
    let (_, ok, message) = next_completed(&mut events).await;
    assert!(!ok);
    assert!(message.starts_with("[SYNTAX] widget_a.wat:"), "{message}");

    let hosted = handle.container().lock().unwrap().hosted().unwrap();
    assert_eq!(hosted.display_name, "widget_a::build");
    handle.shutdown().await;
}
