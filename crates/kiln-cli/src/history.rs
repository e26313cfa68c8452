//! Recently opened units, persisted as JSON under `~/.kiln`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::Context;
use chrono::{DateTime, Utc};
use kiln_host::OpenHistory;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// History file name inside `~/.kiln`.
const HISTORY_FILE: &str = "recent.json";

/// One remembered unit root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RecentEntry {
    pub(crate) path: PathBuf,
    pub(crate) last_opened: DateTime<Utc>,
}

/// Most-recent-first list of opened unit roots, deduplicated and capped.
pub(crate) struct RecentHistory {
    path: PathBuf,
    max_entries: usize,
    write_lock: Mutex<()>,
}

impl RecentHistory {
    pub(crate) fn new(path: PathBuf, max_entries: usize) -> Self {
        Self {
            path,
            max_entries: max_entries.max(1),
            write_lock: Mutex::new(()),
        }
    }

    /// History at the configured path, or `~/.kiln/recent.json`.
    pub(crate) fn from_config(cfg: &kiln_config::Config) -> anyhow::Result<Self> {
        let path = match &cfg.history.path {
            Some(path) => path.clone(),
            None => kiln_config::loader::kiln_home()?.join(HISTORY_FILE),
        };
        Ok(Self::new(path, cfg.history.max_entries))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Entries, most recent first. A missing file is an empty history.
    pub(crate) fn entries(&self) -> anyhow::Result<Vec<RecentEntry>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", self.path.display()));
            },
        };
        let mut entries: Vec<RecentEntry> = serde_json::from_str(&content)
            .with_context(|| format!("parsing {}", self.path.display()))?;
        entries.sort_by(|a, b| b.last_opened.cmp(&a.last_opened));
        entries.truncate(self.max_entries);
        Ok(entries)
    }

    /// Move `root` to the front with timestamp `at`.
    pub(crate) fn record(&self, root: &Path, at: DateTime<Utc>) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.entries().unwrap_or_else(|e| {
            warn!(error = %e, "Discarding unreadable history");
            Vec::new()
        });
        entries.retain(|entry| entry.path != root);
        entries.insert(
            0,
            RecentEntry {
                path: root.to_path_buf(),
                last_opened: at,
            },
        );
        entries.truncate(self.max_entries);
        self.write(&entries)
    }

    /// Forget every entry.
    pub(crate) fn clear(&self) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write(&[])
    }

    fn write(&self, entries: &[RecentEntry]) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, json).with_context(|| format!("writing {}", staging.display()))?;
        fs::rename(&staging, &self.path)
            .with_context(|| format!("replacing {}", self.path.display()))?;
        debug!(path = %self.path.display(), count = entries.len(), "History saved");
        Ok(())
    }
}

impl OpenHistory for RecentHistory {
    fn record_opened(&self, root: &Path, opened_at: DateTime<Utc>) {
        if let Err(e) = self.record(root, opened_at) {
            warn!(root = %root.display(), error = %e, "Failed to record opened unit");
        }
    }
}
