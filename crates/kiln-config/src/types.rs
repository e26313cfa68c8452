//! Configuration types for the Kiln host.
//!
//! These types carry no dependency on `kiln-host`; the CLI converts them into
//! host types at startup. Every struct implements [`Default`] with the same
//! values as the embedded `defaults.toml`, so a bare `[section]` header in
//! TOML yields a working configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Reload orchestration (debounce, auto-reload, event buffer).
    pub reload: ReloadSection,
    /// File watching over a unit's directory.
    pub watch: WatchSection,
    /// Descriptor resolution defaults.
    pub descriptor: DescriptorSection,
    /// Logging level, format and target.
    pub logging: LoggingSection,
    /// Recently opened units.
    pub history: HistorySection,
}

/// `[reload]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadSection {
    /// Quiet window after the last change before validation starts.
    pub debounce_ms: u64,
    /// Start hosting with file watching enabled.
    pub auto_reload: bool,
    /// Capacity of the outbound event channel.
    pub event_capacity: usize,
}

impl Default for ReloadSection {
    fn default() -> Self {
        Self {
            debounce_ms: 1500,
            auto_reload: false,
            event_capacity: 256,
        }
    }
}

impl ReloadSection {
    /// Debounce window as a [`Duration`].
    #[must_use]
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// `[watch]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchSection {
    /// Modification-time slack below which a change is ignored.
    pub slack_ms: u64,
    /// Delay before re-checking a file that vanished.
    pub recheck_delay_ms: u64,
    /// Extensions (without the dot) of files that belong to the watch set.
    pub extensions: Vec<String>,
}

impl Default for WatchSection {
    fn default() -> Self {
        Self {
            slack_ms: 100,
            recheck_delay_ms: 1000,
            extensions: vec!["wat".to_owned(), "ini".to_owned(), "css".to_owned()],
        }
    }
}

impl WatchSection {
    /// Timestamp slack as a [`Duration`].
    #[must_use]
    pub fn slack(&self) -> Duration {
        Duration::from_millis(self.slack_ms)
    }

    /// Recheck delay as a [`Duration`].
    #[must_use]
    pub fn recheck_delay(&self) -> Duration {
        Duration::from_millis(self.recheck_delay_ms)
    }
}

/// `[descriptor]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorSection {
    /// Extension appended to the descriptor's `module` stem.
    pub module_extension: String,
    /// Entry point used when the descriptor names none.
    pub default_entry_point: String,
}

impl Default for DescriptorSection {
    fn default() -> Self {
        Self {
            module_extension: "wat".to_owned(),
            default_entry_point: "main_widget".to_owned(),
        }
    }
}

/// `[logging]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Default level: trace, debug, info, warn or error.
    pub level: String,
    /// Output format: pretty, compact, json or full.
    pub format: String,
    /// Output target: stderr, stdout or file.
    pub target: String,
    /// Log directory when `target = "file"`.
    pub directory: Option<PathBuf>,
    /// Extra `EnvFilter` directives, e.g. `kiln_host::watcher=debug`.
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            target: "stderr".to_owned(),
            directory: None,
            directives: Vec::new(),
        }
    }
}

/// `[history]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySection {
    /// Most entries kept in the recent-units list.
    pub max_entries: usize,
    /// History file; defaults to `~/.kiln/recent.json`.
    pub path: Option<PathBuf>,
}

impl Default for HistorySection {
    fn default() -> Self {
        Self {
            max_entries: 10,
            path: None,
        }
    }
}
