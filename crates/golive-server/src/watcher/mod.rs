//! Filesystem change watching.
//!
//! Wraps a recursive `notify` watcher rooted at the served directory. Raw
//! events are filtered through the ignore patterns, debounced per path, and
//! handed to a callback from a background task. Only mutations after the
//! watcher starts are reported; the existing tree is never replayed.

mod debouncer;
mod ignore;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::task::JoinHandle;

use crate::error::ServerError;
use debouncer::EventDebouncer;
pub(crate) use ignore::IgnoreSet;

/// Kind of filesystem change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    /// File or directory was created.
    Created,
    /// File contents or metadata changed.
    Modified,
    /// File or directory was removed.
    Removed,
}

impl ChangeKind {
    /// Map a notify event kind; access and unknown events are dropped.
    fn from_notify(kind: EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Self::Created),
            EventKind::Modify(_) => Some(Self::Modified),
            EventKind::Remove(_) => Some(Self::Removed),
            _ => None,
        }
    }
}

/// A debounced change under the watched root.
#[derive(Clone, Debug)]
pub struct ChangeEvent {
    /// Absolute path that changed.
    pub path: PathBuf,
    /// What happened to it.
    pub kind: ChangeKind,
    /// When the change was emitted.
    pub timestamp: SystemTime,
}

/// Recursive watcher for the served directory.
pub struct ChangeWatcher {
    root: PathBuf,
    watcher: Option<RecommendedWatcher>,
    task: Option<JoinHandle<()>>,
}

impl ChangeWatcher {
    /// Start watching `root`.
    ///
    /// `on_change` runs on a tokio task once per debounced event. Must be
    /// called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if an ignore pattern is invalid or the OS watcher
    /// cannot be created.
    pub fn start<F>(
        root: &Path,
        ignore_patterns: &[String],
        debounce: Duration,
        on_change: F,
    ) -> Result<Self, ServerError>
    where
        F: Fn(ChangeEvent) + Send + 'static,
    {
        Self::with_ignore(root, IgnoreSet::new(ignore_patterns)?, debounce, on_change)
    }

    /// Start watching `root` with ignore patterns compiled up front.
    pub(crate) fn with_ignore<F>(
        root: &Path,
        ignore: IgnoreSet,
        debounce: Duration,
        on_change: F,
    ) -> Result<Self, ServerError>
    where
        F: Fn(ChangeEvent) + Send + 'static,
    {
        let patterns: Vec<String> = ignore.patterns().map(str::to_owned).collect();
        // notify reports canonical paths, so strip against the canonical root
        let root = root.canonicalize().map_err(notify::Error::io)?;

        let debouncer = Arc::new(EventDebouncer::new(debounce));
        let watcher_debouncer = Arc::clone(&debouncer);
        let watcher_root = root.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "File watcher error");
                    return;
                }
            };
            let Some(kind) = ChangeKind::from_notify(event.kind) else {
                return;
            };
            for path in event.paths {
                let Ok(relative) = path.strip_prefix(&watcher_root) else {
                    continue;
                };
                if ignore.is_ignored(relative) {
                    continue;
                }
                tracing::debug!(path = %path.display(), ?kind, "Recorded filesystem event");
                watcher_debouncer.record(path, kind);
            }
        })?;
        watcher.watch(&root, RecursiveMode::Recursive)?;

        let poll_interval = (debounce / 2).clamp(Duration::from_millis(5), Duration::from_millis(50));
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            loop {
                interval.tick().await;
                for event in debouncer.drain_ready() {
                    on_change(event);
                }
            }
        });

        tracing::info!(root = %root.display(), ignore = ?patterns, "Watching for changes");

        Ok(Self {
            root,
            watcher: Some(watcher),
            task: Some(task),
        })
    }

    /// Canonical root being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether the watcher is still active.
    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Release the OS watch handles and stop delivering events.
    ///
    /// Calling it again is a no-op.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if self.watcher.take().is_some() {
            tracing::debug!(root = %self.root.display(), "Stopped watching");
        }
    }
}

impl Drop for ChangeWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
