//! Kiln Host - validate, load and hot-reload sandboxed source units.
//!
//! A source unit is a directory holding an `.ini` descriptor and the
//! WebAssembly text module it names. This crate provides:
//!
//! - [`descriptor`]: locating and parsing the descriptor into a [`SourceUnit`]
//! - [`pipeline`]: six-stage validation with progress checkpoints
//! - [`runtime`]: compiling, linking and starting modules per identity
//! - [`container`]: a crash-isolating host for one live capability
//! - [`watcher`]: change detection over the unit's files
//! - [`orchestrator`]: the debounced reload state machine tying it together
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use kiln_host::prelude::*;
//!
//! let pipeline = Arc::new(Pipeline::new(DescriptorConfig::default())?);
//! let (orchestrator, handle, mut events) =
//!     ReloadOrchestrator::new(ReloadConfig::default(), pipeline, None);
//! tokio::spawn(orchestrator.run());
//!
//! handle.load_unit(Path::new("./widget")).await?;
//! while let Some(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod barrier;
pub mod capability;
pub mod container;
pub mod descriptor;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod runtime;
pub mod unit;
pub mod watcher;

pub use capability::{
    Capability, CapabilityError, CapabilityFactory, CapabilityResult, InputEvent, Surface,
};
pub use container::{ContainerNotice, HostContainer, HostedInfo, UpdateGuard};
pub use descriptor::{DescriptorConfig, resolve_unit};
pub use error::{Diagnostic, HostError, HostResult, Stage};
pub use orchestrator::{
    HostEvent, OpenHistory, OrchestratorHandle, ReloadConfig, ReloadOrchestrator, ReloadState,
    RunId,
};
pub use pipeline::{EventSink, Pipeline, PipelineEvent, UnitValidator, ValidationOutcome};
pub use runtime::{LoadedModule, ModuleLoader, ModuleRegistry};
pub use unit::{ModuleIdentity, SourceUnit};
pub use watcher::{ChangeDecision, WatchConfig, WatchSession, WatchSet, WatchSignal};

/// Prelude module - commonly used types for convenience.
///
/// Use `use kiln_host::prelude::*;` to import all essential types.
pub mod prelude {
    pub use crate::{
        CapabilityFactory, DescriptorConfig, HostContainer, HostError, HostEvent, HostResult,
        InputEvent, OrchestratorHandle, Pipeline, ReloadConfig, ReloadOrchestrator, ReloadState,
        SourceUnit, Surface, ValidationOutcome,
    };
}
