//! Reload orchestration.
//!
//! # Architecture
//!
//! ```text
//!            file trigger                 window elapses
//!   Idle ─────────────────▶ Debouncing ─────────────────▶ Validating ──▶ Success ─┐
//!    ▲   (trigger restarts the window)                      │  (trigger:        │
//!    │                                                      │   pending = true) ▼
//!    │                                                      └──────────▶ Failure ─┤
//!    └──────────────── pending? re-enter Debouncing : stay Idle ◀────────────────┘
//! ```
//!
//! A single actor task owns the state machine. Validation runs on a blocking
//! worker with a [`CancellationToken`]; at most one run is in flight. A manual
//! reload skips the debounce, and while validating it cancels the in-flight
//! run, waits for the worker to stop, and starts over. Cancelled runs never
//! deliver an outcome.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capability::CapabilityFactory;
use crate::container::{ContainerNotice, HostContainer, HostedInfo};
use crate::descriptor::{DescriptorConfig, resolve_unit};
use crate::error::{HostError, HostResult};
use crate::pipeline::{PipelineEvent, UnitValidator, ValidationOutcome};
use crate::unit::SourceUnit;
use crate::watcher::{WatchConfig, WatchSession, WatchSignal};

/// Default quiet window after the last file trigger.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1500);

/// Default capacity of the outbound event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Reload state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReloadState {
    Idle,
    Debouncing,
    Validating,
    Success,
    Failure,
}

impl fmt::Display for ReloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Debouncing => "debouncing",
            Self::Validating => "validating",
            Self::Success => "success",
            Self::Failure => "failure",
        };
        f.write_str(name)
    }
}

/// Identifies one validation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run-{}", self.0)
    }
}

/// Notifications for shells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Pipeline checkpoint.
    Progress {
        run: RunId,
        percent: u8,
        message: String,
    },
    /// A stage passed or failed.
    Preflight {
        run: RunId,
        ok: bool,
        message: String,
    },
    /// Terminal outcome; always the last event for its run.
    Completed {
        run: RunId,
        ok: bool,
        message: String,
        /// What is live after a successful swap.
        hosted: Option<HostedInfo>,
    },
    /// Container state change or fault.
    Container(ContainerNotice),
    /// Reload state transition.
    StateChanged(ReloadState),
    /// Watching toggled or rebuilt.
    WatchStatus { watching: bool, files: usize },
    /// A watched file changed.
    FileChanged { path: PathBuf },
}

impl HostEvent {
    fn from_pipeline(run: RunId, event: PipelineEvent) -> Self {
        match event {
            PipelineEvent::Progress { percent, message } => Self::Progress {
                run,
                percent,
                message,
            },
            PipelineEvent::Preflight { ok, message } => Self::Preflight { run, ok, message },
        }
    }
}

/// Records opened unit roots. Called off the orchestrator task; failures are
/// the implementor's to log.
pub trait OpenHistory: Send + Sync {
    /// Remember that `root` was opened at `opened_at`.
    fn record_opened(&self, root: &Path, opened_at: DateTime<Utc>);
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct ReloadConfig {
    pub debounce: Duration,
    pub watch: WatchConfig,
    pub descriptor: DescriptorConfig,
    /// Start with file watching enabled.
    pub auto_reload: bool,
    pub event_capacity: usize,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            watch: WatchConfig::default(),
            descriptor: DescriptorConfig::default(),
            auto_reload: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

enum Command {
    SetUnit(SourceUnit),
    Reload,
    Trigger(PathBuf),
    SetAutoReload(bool),
    Shutdown,
}

/// Cloneable control surface for a running [`ReloadOrchestrator`].
#[derive(Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::Sender<Command>,
    container: Arc<Mutex<HostContainer>>,
    descriptor: DescriptorConfig,
    history: Option<Arc<dyn OpenHistory>>,
}

impl OrchestratorHandle {
    /// Resolve the unit at `root`, make it current and validate it immediately.
    ///
    /// # Errors
    ///
    /// Returns the descriptor error if `root` is not a valid unit, or
    /// [`HostError::OrchestratorClosed`] if the orchestrator has stopped.
    pub async fn load_unit(&self, root: &Path) -> HostResult<SourceUnit> {
        let unit = resolve_unit(root, &self.descriptor)?;
        if let Some(history) = &self.history {
            let history = Arc::clone(history);
            let root = unit.root().to_path_buf();
            let opened_at = Utc::now();
            tokio::task::spawn_blocking(move || history.record_opened(&root, opened_at));
        }
        self.send(Command::SetUnit(unit.clone())).await?;
        Ok(unit)
    }

    /// Validate now, skipping the debounce.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::OrchestratorClosed`] if the orchestrator has stopped.
    pub async fn reload(&self) -> HostResult<()> {
        self.send(Command::Reload).await
    }

    /// Report a settled change from an external watcher.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::OrchestratorClosed`] if the orchestrator has stopped.
    pub async fn file_changed(&self, path: PathBuf) -> HostResult<()> {
        self.send(Command::Trigger(path)).await
    }

    /// Enable or disable file watching.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::OrchestratorClosed`] if the orchestrator has stopped.
    pub async fn set_auto_reload(&self, enabled: bool) -> HostResult<()> {
        self.send(Command::SetAutoReload(enabled)).await
    }

    /// Stop the orchestrator: cancel any run, stop watching, clear the container.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    /// Shared container; lock briefly to paint or dispatch input.
    #[must_use]
    pub fn container(&self) -> Arc<Mutex<HostContainer>> {
        Arc::clone(&self.container)
    }

    async fn send(&self, command: Command) -> HostResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HostError::OrchestratorClosed)
    }
}

struct ActiveRun {
    id: RunId,
    cancel: CancellationToken,
}

/// Aborts the watch session task when dropped.
struct WatchGuard(JoinHandle<()>);

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Owns the reload state machine. Drive it with [`run`](Self::run).
pub struct ReloadOrchestrator {
    config: ReloadConfig,
    validator: Arc<dyn UnitValidator>,
    container: Arc<Mutex<HostContainer>>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Sender<HostEvent>,
    unit: Option<SourceUnit>,
    state: ReloadState,
    pending_trigger: bool,
    deadline: Option<Instant>,
    last_run: u64,
    active: Option<ActiveRun>,
    run_task: Option<JoinHandle<Option<ValidationOutcome>>>,
    run_progress: Option<mpsc::UnboundedReceiver<PipelineEvent>>,
    auto_reload: bool,
    watch: Option<WatchGuard>,
    watch_tx: mpsc::Sender<WatchSignal>,
    watch_rx: mpsc::Receiver<WatchSignal>,
}

impl ReloadOrchestrator {
    /// Create an orchestrator, its control handle and its event stream.
    #[must_use]
    pub fn new(
        config: ReloadConfig,
        validator: Arc<dyn UnitValidator>,
        history: Option<Arc<dyn OpenHistory>>,
    ) -> (Self, OrchestratorHandle, mpsc::Receiver<HostEvent>) {
        let (command_tx, command_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(config.event_capacity.max(1));
        let (watch_tx, watch_rx) = mpsc::channel(64);
        let container = Arc::new(Mutex::new(HostContainer::new()));

        let handle = OrchestratorHandle {
            commands: command_tx,
            container: Arc::clone(&container),
            descriptor: config.descriptor.clone(),
            history,
        };
        let orchestrator = Self {
            auto_reload: config.auto_reload,
            config,
            validator,
            container,
            commands: command_rx,
            events: event_tx,
            unit: None,
            state: ReloadState::Idle,
            pending_trigger: false,
            deadline: None,
            last_run: 0,
            active: None,
            run_task: None,
            run_progress: None,
            watch: None,
            watch_tx,
            watch_rx,
        };
        (orchestrator, handle, event_rx)
    }

    /// Process commands, triggers and run completions until shut down.
    pub async fn run(mut self) {
        loop {
            let deadline = self.deadline;

            tokio::select! {
                biased;

                command = self.commands.recv() => {
                    match command {
                        Some(Command::Shutdown) | None => break,
                        Some(command) => self.handle_command(command).await,
                    }
                }

                Some(event) = next_progress(&mut self.run_progress) => {
                    self.forward_progress(event).await;
                }

                joined = join_run(&mut self.run_task) => {
                    self.finish_run(joined).await;
                }

                () = sleep_until_deadline(deadline) => {
                    self.start_run().await;
                }

                Some(signal) = self.watch_rx.recv() => {
                    self.on_watch_signal(signal).await;
                }
            }
        }
        self.stop().await;
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetUnit(unit) => {
                info!(root = %unit.root().display(), module = %unit.identity(), "Source unit loaded");
                self.unit = Some(unit);
                if self.auto_reload {
                    self.rebuild_watch().await;
                }
                self.manual_reload().await;
            },
            Command::Reload => self.manual_reload().await,
            Command::Trigger(path) => {
                self.emit(HostEvent::FileChanged { path }).await;
                self.on_trigger().await;
            },
            Command::SetAutoReload(enabled) => self.set_auto_reload(enabled).await,
            Command::Shutdown => {},
        }
    }

    async fn manual_reload(&mut self) {
        if self.unit.is_none() {
            warn!("Reload requested with no source unit loaded");
            return;
        }
        if self.run_task.is_some() {
            self.cancel_run().await;
        }
        self.pending_trigger = false;
        self.start_run().await;
    }

    async fn on_trigger(&mut self) {
        if self.unit.is_none() {
            return;
        }
        match self.state {
            ReloadState::Validating => {
                debug!("Change during validation, will re-run afterwards");
                self.pending_trigger = true;
            },
            ReloadState::Debouncing => {
                self.deadline = Some(self.debounce_deadline());
                debug!("Debounce window restarted");
            },
            ReloadState::Idle | ReloadState::Success | ReloadState::Failure => {
                self.deadline = Some(self.debounce_deadline());
                self.set_state(ReloadState::Debouncing).await;
            },
        }
    }

    fn debounce_deadline(&self) -> Instant {
        #[allow(clippy::arithmetic_side_effects)]
        // Instant + Duration cannot overflow in practice
        let deadline = Instant::now() + self.config.debounce;
        deadline
    }

    async fn start_run(&mut self) {
        self.deadline = None;
        let Some(unit) = self.unit.clone() else {
            self.set_state(ReloadState::Idle).await;
            return;
        };

        self.last_run = self.last_run.saturating_add(1);
        let id = RunId(self.last_run);
        let cancel = CancellationToken::new();
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let validator = Arc::clone(&self.validator);
        let token = cancel.clone();
        let task =
            tokio::task::spawn_blocking(move || validator.validate(&unit, &token, &progress_tx));

        self.active = Some(ActiveRun { id, cancel });
        self.run_task = Some(task);
        self.run_progress = Some(progress_rx);
        info!(run = %id, "Validation started");
        self.set_state(ReloadState::Validating).await;
    }

    async fn cancel_run(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(run = %active.id, "Cancelling in-flight validation");
            active.cancel.cancel();
        }
        self.run_progress = None;
        if let Some(task) = self.run_task.take() {
            // The outcome of a cancelled run is discarded whatever it is.
            if let Err(e) = task.await {
                warn!(error = %e, "Cancelled validation worker failed");
            }
        }
    }

    async fn forward_progress(&mut self, event: PipelineEvent) {
        let Some(run) = self.active.as_ref().map(|a| a.id) else {
            return;
        };
        self.emit(HostEvent::from_pipeline(run, event)).await;
    }

    async fn finish_run(&mut self, joined: Result<Option<ValidationOutcome>, JoinError>) {
        self.run_task = None;
        let Some(active) = self.active.take() else {
            return;
        };
        if let Some(mut progress) = self.run_progress.take() {
            while let Ok(event) = progress.try_recv() {
                self.emit(HostEvent::from_pipeline(active.id, event)).await;
            }
        }

        let outcome = match joined {
            Ok(Some(outcome)) if !active.cancel.is_cancelled() => outcome,
            Ok(_) => {
                debug!(run = %active.id, "Validation ended without an outcome");
                self.settle().await;
                return;
            },
            Err(e) => {
                warn!(run = %active.id, error = %e, "Validation worker crashed");
                self.set_state(ReloadState::Failure).await;
                self.emit(HostEvent::Completed {
                    run: active.id,
                    ok: false,
                    message: format!("validation worker crashed: {e}"),
                    hosted: None,
                })
                .await;
                self.settle().await;
                return;
            },
        };

        match outcome {
            ValidationOutcome::Success {
                unit,
                factory,
                message,
            } => {
                self.unit = Some(unit);
                self.set_state(ReloadState::Success).await;
                match self.swap_in(factory.as_ref()).await {
                    Ok(hosted) => {
                        info!(run = %active.id, capability = %hosted.display_name, "Reload succeeded");
                        self.emit(HostEvent::Completed {
                            run: active.id,
                            ok: true,
                            message,
                            hosted: Some(hosted),
                        })
                        .await;
                    },
                    Err(e) => {
                        warn!(run = %active.id, "Swap failed: {e}");
                        self.emit(HostEvent::Completed {
                            run: active.id,
                            ok: false,
                            message: e.to_string(),
                            hosted: None,
                        })
                        .await;
                    },
                }
            },
            ValidationOutcome::Failure { unit, error } => {
                if let Some(unit) = unit {
                    self.unit = Some(unit);
                }
                self.set_state(ReloadState::Failure).await;
                self.emit(HostEvent::Completed {
                    run: active.id,
                    ok: false,
                    message: error.to_string(),
                    hosted: None,
                })
                .await;
            },
        }

        if self.auto_reload {
            self.rebuild_watch().await;
        }
        self.settle().await;
    }

    async fn swap_in(&mut self, factory: &dyn CapabilityFactory) -> HostResult<HostedInfo> {
        let (result, notices) = {
            let mut container = self.container.lock().unwrap_or_else(PoisonError::into_inner);
            let result = container.begin_update().swap(factory);
            (result, container.take_notices())
        };
        for notice in notices {
            self.emit(HostEvent::Container(notice)).await;
        }
        result
    }

    async fn settle(&mut self) {
        self.set_state(ReloadState::Idle).await;
        if std::mem::take(&mut self.pending_trigger) {
            self.deadline = Some(self.debounce_deadline());
            self.set_state(ReloadState::Debouncing).await;
        }
    }

    async fn set_auto_reload(&mut self, enabled: bool) {
        self.auto_reload = enabled;
        if enabled {
            self.rebuild_watch().await;
        } else {
            self.watch = None;
            info!("File watching disabled");
            self.emit(HostEvent::WatchStatus {
                watching: false,
                files: 0,
            })
            .await;
        }
    }

    async fn rebuild_watch(&mut self) {
        self.watch = None;
        let Some(unit) = &self.unit else {
            self.emit(HostEvent::WatchStatus {
                watching: false,
                files: 0,
            })
            .await;
            return;
        };
        match WatchSession::new(unit.root(), self.config.watch.clone(), self.watch_tx.clone()) {
            Ok(session) => {
                let files = session.watch_set().len();
                self.watch = Some(WatchGuard(tokio::spawn(session.run())));
                self.emit(HostEvent::WatchStatus {
                    watching: true,
                    files,
                })
                .await;
            },
            Err(e) => {
                warn!(error = %e, "Failed to start watch session");
                self.emit(HostEvent::WatchStatus {
                    watching: false,
                    files: 0,
                })
                .await;
            },
        }
    }

    async fn on_watch_signal(&mut self, signal: WatchSignal) {
        // Signals queued by a session that has since been stopped.
        if !self.auto_reload || self.watch.is_none() {
            return;
        }
        match signal {
            WatchSignal::Changed(path) => {
                self.emit(HostEvent::FileChanged { path }).await;
                self.on_trigger().await;
            },
            WatchSignal::Error(message) => warn!(error = %message, "Watch session error"),
        }
    }

    async fn set_state(&mut self, state: ReloadState) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, "Reload state changed");
        self.state = state;
        self.emit(HostEvent::StateChanged(state)).await;
    }

    async fn emit(&self, event: HostEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Event receiver dropped");
        }
    }

    async fn stop(&mut self) {
        self.cancel_run().await;
        self.deadline = None;
        self.watch = None;
        let notices = {
            let mut container = self.container.lock().unwrap_or_else(PoisonError::into_inner);
            container.clear();
            container.take_notices()
        };
        for notice in notices {
            self.emit(HostEvent::Container(notice)).await;
        }
        info!("Reload orchestrator stopped");
    }
}

async fn next_progress(
    progress: &mut Option<mpsc::UnboundedReceiver<PipelineEvent>>,
) -> Option<PipelineEvent> {
    match progress {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn join_run(
    task: &mut Option<JoinHandle<Option<ValidationOutcome>>>,
) -> Result<Option<ValidationOutcome>, JoinError> {
    match task {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
