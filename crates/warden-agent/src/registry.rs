//! Registry of running backup trackers
//!
//! Maps a scheduled backup name to the cancellation token of its tracker.
//! The map is a `DashMap`, so each operation only holds a shard lock for the
//! duration of the map access. Waiting for cancelled trackers to finish is
//! the caller's job (see the schedule watcher's task tracker).

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Schedule name → tracker cancellation token
#[derive(Default)]
pub struct WatcherRegistry {
    active: DashMap<String, CancellationToken>,
}

impl WatcherRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            active: DashMap::new(),
        }
    }

    /// Register a tracker for `name` unless one is already registered.
    ///
    /// The token handed to `start` is a child of `parent`, so cancelling the
    /// parent reaches every tracker. `start` runs after the map entry is
    /// released and only when a new entry was created. Returns whether a
    /// tracker was started.
    pub fn start_if_absent<F>(&self, name: &str, parent: &CancellationToken, start: F) -> bool
    where
        F: FnOnce(CancellationToken),
    {
        let token = match self.active.entry(name.to_string()) {
            Entry::Occupied(_) => {
                debug!(schedule = %name, "backup tracker already running");
                return false;
            }
            Entry::Vacant(slot) => {
                let token = parent.child_token();
                slot.insert(token.clone());
                token
            }
        };

        info!(schedule = %name, "starting backup tracker");
        start(token);
        true
    }

    /// Cancel and deregister the tracker for `name`
    pub fn stop(&self, name: &str) -> bool {
        if let Some((_, token)) = self.active.remove(name) {
            info!(schedule = %name, "stopping backup tracker");
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Cancel and deregister every tracker, returning how many there were
    ///
    /// Every removed entry is cancelled in the same pass, so a tracker
    /// registered concurrently is either cancelled here or left registered.
    pub fn stop_all(&self) -> usize {
        let mut count = 0;
        self.active.retain(|_, token| {
            token.cancel();
            count += 1;
            false
        });
        if count > 0 {
            info!(count = count, "stopped all backup trackers");
        }
        count
    }

    /// Whether a tracker is registered for `name`
    pub fn contains(&self, name: &str) -> bool {
        self.active.contains_key(name)
    }

    /// Number of registered trackers
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no tracker is registered
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Registered schedule names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
