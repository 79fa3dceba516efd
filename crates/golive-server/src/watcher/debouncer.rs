//! Per-path event debouncing.
//!
//! Editors usually emit several filesystem events for a single save. The
//! debouncer folds them into one [`ChangeEvent`] per path once the path has
//! been quiet for the debounce window, or has been held back long enough.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use super::{ChangeEvent, ChangeKind};

/// How many debounce windows a path that keeps changing may be held back.
const MAX_WINDOWS: u32 = 5;

/// Event waiting for its quiet period to end.
struct Pending {
    kind: ChangeKind,
    first_seen: Instant,
    deadline: Instant,
}

/// Thread-safe event debouncer.
///
/// Each new event for a pending path pushes its deadline back by one window,
/// but never past `MAX_WINDOWS` windows after the first event, so a file
/// rewritten continuously still reloads.
pub(crate) struct EventDebouncer {
    pending: Mutex<HashMap<PathBuf, Pending>>,
    window: Duration,
    max_delay: Duration,
}

impl EventDebouncer {
    pub(crate) fn new(window: Duration) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            window,
            max_delay: window * MAX_WINDOWS,
        }
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<PathBuf, Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a raw event. Called from the notify callback thread.
    pub(crate) fn record(&self, path: PathBuf, kind: ChangeKind) {
        let now = Instant::now();
        let mut pending = self.pending();

        let Some(current) = pending.get_mut(&path) else {
            pending.insert(
                path,
                Pending {
                    kind,
                    first_seen: now,
                    deadline: now + self.window,
                },
            );
            return;
        };

        if let Some(kind) = merge(current.kind, kind) {
            current.kind = kind;
            current.deadline = (now + self.window).min(current.first_seen + self.max_delay);
        } else {
            pending.remove(&path);
        }
    }

    /// Take every event whose quiet period has ended.
    pub(crate) fn drain_ready(&self) -> Vec<ChangeEvent> {
        let now = Instant::now();
        let mut ready = Vec::new();

        self.pending().retain(|path, event| {
            if event.deadline > now {
                return true;
            }
            ready.push(ChangeEvent {
                path: path.clone(),
                kind: event.kind,
                timestamp: SystemTime::now(),
            });
            false
        });
        ready
    }
}

/// Fold a new event into the one already pending for the same path.
///
/// `None` means the two cancel out: the file appeared and vanished again
/// inside one window.
#[allow(clippy::match_same_arms)]
fn merge(pending: ChangeKind, new: ChangeKind) -> Option<ChangeKind> {
    use ChangeKind::{Created, Modified, Removed};

    match (pending, new) {
        (Created, Removed) => None,
        (Created, _) => Some(Created),
        (Modified, kind) => Some(kind),
        (Removed, Created) => Some(Modified),
        (Removed, _) => Some(Removed),
    }
}
