//! The six-stage validation pipeline.
//!
//! # Architecture
//!
//! ```text
//! descriptor ─▶ syntax ─▶ static ─▶ dependencies ─▶ load ─▶ entry point
//!     10/20/30      40        45          55(/60)        70        85 ─▶ 100
//! ```
//!
//! Stages run strictly in order and stop at the first failure. Progress and
//! preflight results are streamed over an [`EventSink`]; cancellation is
//! checked between stages, and a cancelled run produces no outcome at all.

pub mod analysis;
pub mod syntax;

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capability::CapabilityFactory;
use crate::descriptor::{DescriptorConfig, resolve_unit};
use crate::error::{Diagnostic, HostError, HostResult, Stage};
use crate::runtime::{ModuleLoader, ModuleRegistry};
use crate::unit::SourceUnit;

/// Progress reported while a pipeline runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// Checkpoint reached. Percentages are strictly increasing within a run.
    Progress { percent: u8, message: String },
    /// A stage passed or failed.
    Preflight { ok: bool, message: String },
}

/// Where pipeline events go.
pub type EventSink = mpsc::UnboundedSender<PipelineEvent>;

/// The terminal result of a non-cancelled run.
pub enum ValidationOutcome {
    /// Every stage passed; `factory` builds the validated capability.
    Success {
        unit: SourceUnit,
        factory: Arc<dyn CapabilityFactory>,
        message: String,
    },
    /// A stage failed. `unit` is the freshly resolved unit, if stage 1 got that far.
    Failure {
        unit: Option<SourceUnit>,
        error: HostError,
    },
}

impl ValidationOutcome {
    /// A success outcome with the standard message.
    #[must_use]
    pub fn success(unit: SourceUnit, factory: Arc<dyn CapabilityFactory>) -> Self {
        Self::Success {
            unit,
            factory,
            message: "Validation complete".to_string(),
        }
    }

    #[must_use]
    pub fn failure(unit: Option<SourceUnit>, error: HostError) -> Self {
        Self::Failure { unit, error }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Factory, present exactly when the outcome is a success.
    #[must_use]
    pub fn factory(&self) -> Option<&Arc<dyn CapabilityFactory>> {
        match self {
            Self::Success { factory, .. } => Some(factory),
            Self::Failure { .. } => None,
        }
    }

    /// Error, present exactly when the outcome is a failure.
    #[must_use]
    pub fn error(&self) -> Option<&HostError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }

    /// Success message or rendered diagnostic.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Success { message, .. } => message.clone(),
            Self::Failure { error, .. } => error.to_string(),
        }
    }
}

impl std::fmt::Debug for ValidationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success { unit, factory, .. } => f
                .debug_struct("Success")
                .field("unit", &unit.identity())
                .field("entry_point", &factory.entry_point())
                .finish(),
            Self::Failure { error, .. } => f.debug_struct("Failure").field("error", error).finish(),
        }
    }
}

/// Anything that can validate a unit on a worker thread.
pub trait UnitValidator: Send + Sync {
    /// Validate `unit`. Returns `None` when `cancel` fired between stages.
    fn validate(
        &self,
        unit: &SourceUnit,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Option<ValidationOutcome>;
}

struct Reporter<'a> {
    sink: &'a EventSink,
}

impl Reporter<'_> {
    fn progress(&self, percent: u8, message: impl Into<String>) {
        let message = message.into();
        debug!(percent, %message, "Validation progress");
        // Receiver gone means the run was abandoned; keep going until the next cancel check.
        let _ = self.sink.send(PipelineEvent::Progress { percent, message });
    }

    fn preflight(&self, ok: bool, message: impl Into<String>) {
        let _ = self.sink.send(PipelineEvent::Preflight {
            ok,
            message: message.into(),
        });
    }

    fn fail(&self, unit: Option<SourceUnit>, error: HostError) -> ValidationOutcome {
        warn!(stage = ?error.stage(), "Validation failed: {error}");
        self.preflight(false, error.to_string());
        ValidationOutcome::failure(unit, error)
    }
}

/// The real validation pipeline.
pub struct Pipeline {
    descriptor: DescriptorConfig,
    loader: ModuleLoader,
    registry: Arc<Mutex<ModuleRegistry>>,
}

impl Pipeline {
    /// Create a pipeline with an empty module registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the wasm engine cannot be created.
    pub fn new(descriptor: DescriptorConfig) -> HostResult<Self> {
        Ok(Self {
            descriptor,
            loader: ModuleLoader::new()?,
            registry: Arc::new(Mutex::new(ModuleRegistry::new())),
        })
    }

    /// Shared handle to the registry of loaded modules.
    #[must_use]
    pub fn registry(&self) -> Arc<Mutex<ModuleRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Run every stage against `unit`.
    ///
    /// Stage 1 re-resolves the descriptor, so edits to it since `unit` was
    /// built are honoured; the fresh unit is returned in the outcome.
    #[tracing::instrument(skip_all, fields(unit = %unit.identity()))]
    pub fn run(
        &self,
        unit: &SourceUnit,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Option<ValidationOutcome> {
        let report = Reporter { sink: events };
        let stopped = || {
            let cancelled = cancel.is_cancelled();
            if cancelled {
                debug!("Validation cancelled between stages");
            }
            cancelled
        };

        report.progress(10, "Starting validation...");

        // Descriptor
        report.progress(20, "Reading descriptor...");
        let unit = match resolve_unit(unit.root(), &self.descriptor) {
            Ok(fresh) => fresh,
            Err(e) => return Some(report.fail(None, e)),
        };
        report.progress(30, "Checking module file...");
        report.preflight(true, format!("Descriptor OK: {}", unit.module_file_name()));
        if stopped() {
            return None;
        }

        // Syntax
        report.progress(40, "Checking syntax...");
        let parsed = match syntax::check_syntax(unit.module_path()) {
            Ok(parsed) => parsed,
            Err(e) => return Some(report.fail(Some(unit), e)),
        };
        report.preflight(true, "Syntax OK");
        if stopped() {
            return None;
        }

        // Static analysis
        report.progress(45, "Running static analysis...");
        let analyzed = match analysis::analyze(&parsed) {
            Ok(analyzed) => analyzed,
            Err(e) => return Some(report.fail(Some(unit), e)),
        };
        report.preflight(true, "Static analysis OK");
        if stopped() {
            return None;
        }

        // Dependencies
        report.progress(55, "Analyzing dependencies...");
        let dependencies = analysis::discover_dependencies(
            &unit,
            &analyzed.imports,
            &self.descriptor.module_extension,
        );
        if !dependencies.is_empty() {
            report.progress(
                60,
                format!("Found dependencies: {}", dependencies.join(", ")),
            );
        }
        if stopped() {
            return None;
        }

        // Dynamic load
        report.progress(70, "Loading module...");
        let loaded = {
            let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            self.loader.load(&mut registry, &unit, &parsed, &analyzed)
        };
        let loaded = match loaded {
            Ok(loaded) => loaded,
            Err(e) => return Some(report.fail(Some(unit), e)),
        };
        report.preflight(true, "Module loaded");
        if stopped() {
            return None;
        }

        // Entry point
        report.progress(85, "Checking entry point...");
        let Some(factory) = loaded.lookup(unit.entry_point()) else {
            let error = HostError::EntryPointMissing(Diagnostic::new(
                Stage::Entry,
                unit.module_file_name(),
                format!(
                    "entry point `{}` is not exported by module `{}`",
                    unit.entry_point(),
                    unit.identity()
                ),
            ));
            return Some(report.fail(Some(unit), error));
        };
        report.preflight(true, format!("Entry point `{}` found", unit.entry_point()));

        report.progress(100, "Validation complete");
        info!(entry_point = %unit.entry_point(), "Validation succeeded");
        Some(ValidationOutcome::success(unit, factory))
    }
}

impl UnitValidator for Pipeline {
    fn validate(
        &self,
        unit: &SourceUnit,
        cancel: &CancellationToken,
        events: &EventSink,
    ) -> Option<ValidationOutcome> {
        self.run(unit, cancel, events)
    }
}
