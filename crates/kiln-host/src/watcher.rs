//! File watching for the active source unit.
//!
//! # Architecture
//!
//! ```text
//! filesystem events (notify)
//!   → keep paths in the watch set
//!   → file gone?       → drop from set, recheck after 1s, re-add if it came back
//!   → mtime > last + 100ms slack? → record mtime, emit WatchSignal::Changed
//!   → otherwise ignore (duplicate notification)
//! ```
//!
//! A session is built from a fresh scan of the unit root and lives until its
//! task is aborted or dropped; dropping the `notify` watcher releases every
//! subscription.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{HostError, HostResult};

/// Extensions watched by default.
pub const DEFAULT_EXTENSIONS: &[&str] = &["wat", "ini", "css"];

/// Modification-time slack under which a notification is a duplicate.
pub const DEFAULT_SLACK: Duration = Duration::from_millis(100);

/// Delay before checking whether a vanished file came back.
pub const DEFAULT_RECHECK_DELAY: Duration = Duration::from_secs(1);

/// Directory names never scanned.
pub const IGNORED_DIRS: &[&str] = &["target", ".git", ".kiln", "node_modules"];

/// Configuration for a watch session.
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// File extensions (without dot) that belong to the watch set.
    pub extensions: Vec<String>,
    pub slack: Duration,
    pub recheck_delay: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            extensions: DEFAULT_EXTENSIONS.iter().map(ToString::to_string).collect(),
            slack: DEFAULT_SLACK,
            recheck_delay: DEFAULT_RECHECK_DELAY,
        }
    }
}

/// Watched file → last observed modification time.
#[derive(Debug, Clone, Default)]
pub struct WatchSet {
    entries: HashMap<PathBuf, SystemTime>,
}

impl WatchSet {
    /// Scan `root` recursively for files with one of `extensions`.
    ///
    /// # Errors
    ///
    /// Returns an error if `root` itself cannot be read.
    pub fn scan(root: &Path, extensions: &[String]) -> std::io::Result<Self> {
        let mut paths = Vec::new();
        collect_watch_paths(root, extensions, &mut paths)?;
        let entries = paths
            .into_iter()
            .filter_map(|path| {
                let modified = fs::metadata(&path).and_then(|m| m.modified()).ok()?;
                Some((path, modified))
            })
            .collect();
        Ok(Self { entries })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        self.entries.contains_key(path)
    }

    #[must_use]
    pub fn last_modified(&self, path: &Path) -> Option<SystemTime> {
        self.entries.get(path).copied()
    }

    /// Watched paths, sorted.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.entries.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn record(&mut self, path: PathBuf, modified: SystemTime) {
        self.entries.insert(path, modified);
    }

    fn remove(&mut self, path: &Path) -> Option<SystemTime> {
        self.entries.remove(path)
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

/// What a raw change notification amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDecision {
    /// A settled change; a reload should be requested.
    Trigger,
    /// The file vanished; check again after the recheck delay.
    Recheck,
    /// Duplicate, unwatched, or already awaiting a recheck.
    Ignored,
}

/// Emitted by a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchSignal {
    /// A watched file changed.
    Changed(PathBuf),
    /// Non-fatal watcher error.
    Error(String),
}

/// Watches one source unit root.
pub struct WatchSession {
    root: PathBuf,
    config: WatchConfig,
    set: WatchSet,
    /// Paths dropped from the set, waiting for their recheck.
    vanished: HashSet<PathBuf>,
    signal_tx: mpsc::Sender<WatchSignal>,
}

impl WatchSession {
    /// Build a session over a fresh scan of `root`.
    ///
    /// # Errors
    ///
    /// Returns [`HostError::Watch`] if the root cannot be scanned.
    pub fn new(
        root: &Path,
        config: WatchConfig,
        signal_tx: mpsc::Sender<WatchSignal>,
    ) -> HostResult<Self> {
        let set = WatchSet::scan(root, &config.extensions)
            .map_err(|e| HostError::Watch(format!("cannot scan {}: {e}", root.display())))?;
        debug!(root = %root.display(), files = set.len(), "Watch set built");
        Ok(Self {
            root: root.to_path_buf(),
            config,
            set,
            vanished: HashSet::new(),
            signal_tx,
        })
    }

    #[must_use]
    pub fn watch_set(&self) -> &WatchSet {
        &self.set
    }

    /// Classify a change notification for `path`.
    pub fn on_file_changed(&mut self, path: &Path) -> ChangeDecision {
        if !self.set.contains(path) {
            return ChangeDecision::Ignored;
        }
        let modified = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(_) => {
                self.set.remove(path);
                self.vanished.insert(path.to_path_buf());
                debug!(path = %path.display(), "Watched file vanished, scheduling recheck");
                return ChangeDecision::Recheck;
            },
        };

        let last = self.set.last_modified(path).unwrap_or(SystemTime::UNIX_EPOCH);
        let threshold = last.checked_add(self.config.slack).unwrap_or(last);
        if modified > threshold {
            self.set.record(path.to_path_buf(), modified);
            ChangeDecision::Trigger
        } else {
            debug!(path = %path.display(), "Duplicate change notification ignored");
            ChangeDecision::Ignored
        }
    }

    /// Re-add `path` if it reappeared since it vanished. Returns whether it did.
    pub fn recheck(&mut self, path: &Path) -> bool {
        if !self.vanished.remove(path) {
            return false;
        }
        match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(modified) => {
                self.set.record(path.to_path_buf(), modified);
                debug!(path = %path.display(), "Vanished file reappeared, watching again");
                true
            },
            Err(_) => {
                debug!(path = %path.display(), "Vanished file still missing, dropped from watch set");
                false
            },
        }
    }

    /// Stop watching everything.
    pub fn disable(&mut self) {
        self.set.clear();
        self.vanished.clear();
    }

    /// Run the session until aborted or until the signal receiver drops.
    pub async fn run(mut self) {
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();
        let mut watcher = match RecommendedWatcher::new(
            move |res| {
                let _ = raw_tx.send(res);
            },
            notify::Config::default(),
        ) {
            Ok(watcher) => watcher,
            Err(e) => {
                warn!(error = %e, "Failed to create filesystem watcher");
                let _ = self
                    .signal_tx
                    .send(WatchSignal::Error(format!("filesystem watcher: {e}")))
                    .await;
                return;
            },
        };
        if let Err(e) = watcher.watch(&self.root, RecursiveMode::Recursive) {
            warn!(root = %self.root.display(), error = %e, "Failed to watch unit root");
            let _ = self
                .signal_tx
                .send(WatchSignal::Error(format!(
                    "cannot watch {}: {e}",
                    self.root.display()
                )))
                .await;
            return;
        }
        info!(root = %self.root.display(), files = self.set.len(), "Watching source unit");

        let mut rechecks: HashMap<PathBuf, Instant> = HashMap::new();

        loop {
            let next_deadline = rechecks.values().copied().min();

            tokio::select! {
                biased;

                () = async {
                    match next_deadline {
                        Some(deadline) => tokio::time::sleep_until(deadline).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    let now = Instant::now();
                    let due: Vec<PathBuf> = rechecks
                        .iter()
                        .filter(|(_, deadline)| **deadline <= now)
                        .map(|(path, _)| path.clone())
                        .collect();
                    for path in due {
                        rechecks.remove(&path);
                        self.recheck(&path);
                    }
                }

                event = raw_rx.recv() => {
                    match event {
                        Some(Ok(ev)) => {
                            if !self.handle_raw_event(&ev, &mut rechecks).await {
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Filesystem watcher error");
                            if self.signal_tx.send(WatchSignal::Error(e.to_string())).await.is_err() {
                                debug!("Signal receiver dropped, stopping watch session");
                                return;
                            }
                        }
                        None => {
                            debug!("Filesystem watcher channel closed, stopping");
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Returns `false` once the signal receiver is gone.
    async fn handle_raw_event(
        &mut self,
        event: &Event,
        rechecks: &mut HashMap<PathBuf, Instant>,
    ) -> bool {
        match event.kind {
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {},
            _ => return true,
        }

        for path in &event.paths {
            match self.on_file_changed(path) {
                ChangeDecision::Trigger => {
                    info!(path = %path.display(), kind = ?event.kind, "Source file changed");
                    if self
                        .signal_tx
                        .send(WatchSignal::Changed(path.clone()))
                        .await
                        .is_err()
                    {
                        debug!("Signal receiver dropped, stopping watch session");
                        return false;
                    }
                },
                ChangeDecision::Recheck => {
                    #[allow(clippy::arithmetic_side_effects)]
                    // Instant + Duration cannot overflow in practice
                    let deadline = Instant::now() + self.config.recheck_delay;
                    rechecks.insert(path.clone(), deadline);
                },
                ChangeDecision::Ignored => {},
            }
        }
        true
    }
}

/// Check if a path contains any ignored directory component.
fn is_in_ignored_dir(path: &Path) -> bool {
    path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|s| IGNORED_DIRS.contains(&s))
    })
}

/// Recursively collect watchable files, skipping [`IGNORED_DIRS`].
fn collect_watch_paths(
    dir: &Path,
    extensions: &[String],
    paths: &mut Vec<PathBuf>,
) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            if is_in_ignored_dir(Path::new(&entry.file_name())) {
                continue;
            }
            if let Err(e) = collect_watch_paths(&path, extensions, paths) {
                debug!(path = %path.display(), error = %e, "Skipping unreadable directory");
            }
        } else if file_type.is_file()
            && path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|ext| extensions.iter().any(|w| w.eq_ignore_ascii_case(ext)))
        {
            paths.push(path);
        }
    }
    Ok(())
}
