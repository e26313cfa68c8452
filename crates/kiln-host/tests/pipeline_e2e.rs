//! End-to-end validation tests.
//!
//! Each test writes a source unit (descriptor plus `.wat` module) into a
//! temporary directory, runs the real pipeline over it and, where the run
//! succeeds, hosts the resulting capability in a container.

use std::fs;
use std::path::Path;

use kiln_host::{
    ContainerNotice, DescriptorConfig, HostContainer, HostError, InputEvent, Pipeline,
    PipelineEvent, SourceUnit, Stage, Surface, ValidationOutcome, resolve_unit,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WIDGET_A: &str = r#"(module
  (import "host" "log" (func $log (param i32)))
  (global $clicks (mut i32) (i32.const 0))
  (func (export "build") (result i32)
    i32.const 1)
  (func (export "paint") (param $handle i32) (param $w i32) (param $h i32) (result i32)
    i32.const 0x336699)
  (func (export "on_event") (param $handle i32) (param $kind i32) (param $a i32) (param $b i32) (result i32)
    global.get $clicks
    i32.const 1
    i32.add
    global.set $clicks
    global.get $clicks
    call $log
    i32.const 1))
"#;

struct Unit {
    dir: TempDir,
}

impl Unit {
    fn new(descriptor: &str, module_name: &str, module: &str) -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("unit.ini"), descriptor).unwrap();
        fs::write(dir.path().join(format!("{module_name}.wat")), module).unwrap();
        Self { dir }
    }

    fn widget(module: &str) -> Self {
        Self::new(
            "[source]\nmodule = widget_a\nentry_point = build\n",
            "widget_a",
            module,
        )
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn resolve(&self) -> SourceUnit {
        resolve_unit(self.path(), &DescriptorConfig::default()).unwrap()
    }
}

fn run(pipeline: &Pipeline, unit: &SourceUnit) -> (ValidationOutcome, Vec<PipelineEvent>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let outcome = pipeline
        .run(unit, &CancellationToken::new(), &tx)
        .expect("run was not cancelled");
    drop(tx);
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    (outcome, events)
}

fn percents(events: &[PipelineEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::Progress { percent, .. } => Some(*percent),
            PipelineEvent::Preflight { .. } => None,
        })
        .collect()
}

fn failure(outcome: ValidationOutcome) -> HostError {
    match outcome {
        ValidationOutcome::Failure { error, .. } => error,
        ValidationOutcome::Success { .. } => panic!("expected failure"),
    }
}

#[test]
fn test_widget_validates_and_hosts() {
    let unit = Unit::widget(WIDGET_A);
    let pipeline = Pipeline::new(DescriptorConfig::default()).unwrap();
    let (outcome, events) = run(&pipeline, &unit.resolve());

    assert!(outcome.is_success(), "{outcome:?}");
    assert_eq!(percents(&events), vec![10, 20, 30, 40, 45, 55, 70, 85, 100]);
    assert!(events.iter().all(|e| !matches!(e, PipelineEvent::Preflight { ok: false, .. })));

    let factory = outcome.factory().unwrap();
    assert_eq!(factory.entry_point(), "build");

    let mut container = HostContainer::new();
    let hosted = container.swap(factory.as_ref()).unwrap();
    assert_eq!(hosted.display_name, "widget_a::build");

    let mut surface = Surface::new(320, 240);
    container.paint(&mut surface);
    assert_eq!(surface.fill, 0x33_6699);
    assert!(container.dispatch(InputEvent::Click { x: 3, y: 4 }));
    assert!(!container.has_error());
    assert_eq!(pipeline.registry().lock().unwrap().len(), 1);
}

#[test]
fn test_reload_is_idempotent() {
    let unit = Unit::widget(WIDGET_A);
    let pipeline = Pipeline::new(DescriptorConfig::default()).unwrap();
    let mut container = HostContainer::new();

    let (first, _) = run(&pipeline, &unit.resolve());
    let first = container.swap(first.factory().unwrap().as_ref()).unwrap();
    let (second, _) = run(&pipeline, &unit.resolve());
    let second = container.swap(second.factory().unwrap().as_ref()).unwrap();

    assert_eq!(first.display_name, second.display_name);
    assert!(second.serial > first.serial);
    assert_eq!(pipeline.registry().lock().unwrap().len(), 1);
}

#[test]
fn test_edit_between_runs_is_picked_up() {
    let unit = Unit::widget(WIDGET_A);
    let pipeline = Pipeline::new(DescriptorConfig::default()).unwrap();
    let mut container = HostContainer::new();

    let (outcome, _) = run(&pipeline, &unit.resolve());
    container.swap(outcome.factory().unwrap().as_ref()).unwrap();

    fs::write(
        unit.path().join("widget_a.wat"),
        WIDGET_A.replace("0x336699", "0x00ff00"),
    )
    .unwrap();
    let (outcome, _) = run(&pipeline, &unit.resolve());
    container.swap(outcome.factory().unwrap().as_ref()).unwrap();

    let mut surface = Surface::new(10, 10);
    container.paint(&mut surface);
    assert_eq!(surface.fill, 0x00_ff00);
}

#[test]
fn test_descriptor_edit_is_honoured_by_stage_one() {
    let unit = Unit::widget(WIDGET_A);
    let stale = unit.resolve();
    fs::write(unit.path().join("unit.ini"), "[source]\nmodule = widget_a\n").unwrap();

    let pipeline = Pipeline::new(DescriptorConfig::default()).unwrap();
    let (outcome, _) = run(&pipeline, &stale);
    let error = failure(outcome);
    assert!(matches!(error, HostError::EntryPointMissing(_)), "{error}");
    assert!(error.to_string().contains("main_widget"));
}

#[test]
fn test_missing_descriptor_fails_at_stage_one() {
    let unit = Unit::widget(WIDGET_A);
    let resolved = unit.resolve();
    fs::remove_file(unit.path().join("unit.ini")).unwrap();

    let pipeline = Pipeline::new(DescriptorConfig::default()).unwrap();
    let (outcome, events) = run(&pipeline, &resolved);
    let error = failure(outcome);
    assert!(matches!(error, HostError::DescriptorMissing(_)));
    assert_eq!(percents(&events), vec![10, 20]);
    assert!(matches!(
        events.last(),
        Some(PipelineEvent::Preflight { ok: false, .. })
    ));
}

#[test]
fn test_syntax_error_reports_position() {
    let unit = Unit::widget(
        "(module\n  (func (export \"build\") (result i32)\n    i32.const 1)\n  (func $broken (result i32)\n    i32.konst 2))\n",
    );
    let pipeline = Pipeline::new(DescriptorConfig::default()).unwrap();
    let (outcome, events) = run(&pipeline, &unit.resolve());
    let error = failure(outcome);

    assert!(matches!(error, HostError::Syntax(_)));
    let rendered = error.to_string();
    assert!(
        rendered.starts_with("[SYNTAX] widget_a.wat:5:5 → "),
        "{rendered}"
    );
    assert_eq!(percents(&events).last(), Some(&40));
}

#[test]
fn test_static_failure_stops_before_load() {
    let unit = Unit::widget(
        "(module\n  (func (export \"build\") (result i32)\n    call $nowhere\n    i32.const 1))\n",
    );
    let pipeline = Pipeline::new(DescriptorConfig::default()).unwrap();
    let (outcome, events) = run(&pipeline, &unit.resolve());
    let error = failure(outcome);

    assert_eq!(error.stage(), Some(Stage::Static));
    assert_eq!(percents(&events).last(), Some(&45));
    assert!(pipeline.registry().lock().unwrap().is_empty());
}

#[test]
fn test_dependencies_are_reported() {
    let unit = Unit::widget(
        r#"(module
  (import "shapes" "circle" (func $circle (param i32) (result i32)))
  (func (export "build") (result i32) i32.const 1)
  (func (export "paint") (param i32 i32 i32) (result i32)
    i32.const 5
    call $circle)
  (func (export "on_event") (param i32 i32 i32 i32) (result i32) i32.const 0))
"#,
    );
    fs::write(unit.path().join("shapes.wat"), "(module)").unwrap();
    let pipeline = Pipeline::new(DescriptorConfig::default()).unwrap();
    let (outcome, events) = run(&pipeline, &unit.resolve());

    assert!(outcome.is_success(), "{outcome:?}");
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::Progress { percent: 60, message } if message == "Found dependencies: shapes"
    )));
}

#[test]
fn test_start_trap_is_load_error_with_line() {
    let unit = Unit::widget(
        "(module\n  (func $init\n    unreachable)\n  (start $init)\n  (func (export \"build\") (result i32) i32.const 1))\n",
    );
    let pipeline = Pipeline::new(DescriptorConfig::default()).unwrap();
    let (outcome, events) = run(&pipeline, &unit.resolve());
    let error = failure(outcome);

    assert!(matches!(error, HostError::ModuleLoad(_)), "{error}");
    let diag = &error.diagnostics()[0];
    assert_eq!(diag.line, Some(2));
    assert!(diag.message.contains("unreachable"), "{}", diag.message);
    assert_eq!(percents(&events).last(), Some(&70));
}

#[test]
fn test_missing_entry_point() {
    let unit = Unit::new(
        "[source]\nmodule = widget_a\nentry_point = create\n",
        "widget_a",
        WIDGET_A,
    );
    let pipeline = Pipeline::new(DescriptorConfig::default()).unwrap();
    let (outcome, events) = run(&pipeline, &unit.resolve());
    let error = failure(outcome);

    assert!(matches!(error, HostError::EntryPointMissing(_)));
    assert!(error.to_string().starts_with("[ENTRY] widget_a.wat"));
    assert_eq!(percents(&events).last(), Some(&85));
}

#[test]
fn test_trapping_entry_point_is_instantiation_error() {
    let unit = Unit::widget(&WIDGET_A.replace(
        "(func (export \"build\") (result i32)\n    i32.const 1)",
        "(func (export \"build\") (result i32)\n    unreachable)",
    ));
    let pipeline = Pipeline::new(DescriptorConfig::default()).unwrap();
    let (outcome, _) = run(&pipeline, &unit.resolve());
    assert!(outcome.is_success(), "entry point only runs at instantiation");

    let mut container = HostContainer::new();
    let error = container.swap(outcome.factory().unwrap().as_ref()).unwrap_err();
    assert!(matches!(error, HostError::Instantiation(_)));
    assert!(error.to_string().starts_with("[INSTANTIATION] widget_a.wat"));
    assert!(container.is_empty());
    assert!(matches!(
        container.take_notices().as_slice(),
        [ContainerNotice::InstantiationFailed { .. }]
    ));
}

#[test]
fn test_wrong_shape_is_instantiation_error() {
    let unit = Unit::widget("(module\n  (func (export \"build\") (result i32) i32.const 1))\n");
    let pipeline = Pipeline::new(DescriptorConfig::default()).unwrap();
    let (outcome, _) = run(&pipeline, &unit.resolve());

    let mut container = HostContainer::new();
    let error = container.swap(outcome.factory().unwrap().as_ref()).unwrap_err();
    assert!(error.to_string().contains("missing required export `paint`"));
}

#[test]
fn test_runtime_trap_degrades_container() {
    let unit = Unit::widget(
        r#"(module
  (import "gfx" "blend" (func $blend (param i32) (result i32)))
  (func (export "build") (result i32) i32.const 1)
  (func (export "paint") (param i32 i32 i32) (result i32)
    i32.const 1
    call $blend)
  (func (export "on_event") (param i32 i32 i32 i32) (result i32) i32.const 0))
"#,
    );
    let pipeline = Pipeline::new(DescriptorConfig::default()).unwrap();
    let (outcome, _) = run(&pipeline, &unit.resolve());
    assert!(outcome.is_success(), "optional imports are tolerated");

    let mut container = HostContainer::new();
    container.swap(outcome.factory().unwrap().as_ref()).unwrap();

    let mut surface = Surface::new(100, 100);
    container.paint(&mut surface);
    assert!(container.has_error());
    assert!(surface.overlay.unwrap().starts_with("Paint Error: "));
    // Still hosted, still answering.
    assert!(container.hosted().is_some());
    assert!(!container.dispatch(InputEvent::Key { code: 13 }));
}

#[test]
fn test_cancelled_run_has_no_outcome() {
    let unit = Unit::widget(WIDGET_A);
    let pipeline = Pipeline::new(DescriptorConfig::default()).unwrap();
    let cancel = CancellationToken::new();
    cancel.cancel();
    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(pipeline.run(&unit.resolve(), &cancel, &tx).is_none());
    assert!(pipeline.registry().lock().unwrap().is_empty());
}
