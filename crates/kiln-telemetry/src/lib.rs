//! Kiln Telemetry - logging setup for the Kiln widget host.
//!
//! Installs a global `tracing` subscriber with an `EnvFilter`, one of four
//! output formats, and a stdout, stderr or rolling-file target.
//!
//! # Example
//!
//! ```rust,no_run
//! use kiln_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), kiln_telemetry::TelemetryError> {
//! let config = LogConfig::new("info")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("kiln_host::watcher=debug");
//!
//! setup_logging(&config)?;
//! tracing::info!("host starting");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{
    FileLogConfig, FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging,
    setup_logging,
};
