//! Per-series exclusive locks.
//!
//! The table only remembers keys that are currently held, so it stays as
//! small as the number of allocations in flight. Waiters for one key never
//! block holders of another.

use std::collections::HashSet;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::SeriesError;
use crate::key::SeriesKey;

#[derive(Default)]
pub struct SeriesLocks {
    held: Mutex<HashSet<SeriesKey>>,
    released: Condvar,
}

impl SeriesLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait up to `timeout` for exclusive ownership of `key`.
    pub fn acquire(
        self: &Arc<Self>,
        key: &SeriesKey,
        timeout: Duration,
    ) -> Result<SeriesGuard, SeriesError> {
        // A timeout too large to add to the clock means wait forever.
        let deadline = Instant::now().checked_add(timeout);
        let mut held = self.held_set();

        if held.contains(key) {
            debug!("SeriesLocks: waiting for {}", key);
        }
        while held.contains(key) {
            // Wakeups are shared by all keys; the loop re-checks ours.
            held = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(SeriesError::SeriesLocked {
                            key: key.to_string(),
                            waited: timeout,
                        });
                    }
                    self.released
                        .wait_timeout(held, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .released
                    .wait(held)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }

        held.insert(key.clone());
        Ok(SeriesGuard {
            locks: Arc::clone(self),
            key: key.clone(),
        })
    }

    /// Whether `key` is currently held by someone.
    pub fn is_held(&self, key: &SeriesKey) -> bool {
        self.held_set().contains(key)
    }

    /// Number of keys currently held.
    pub fn held_count(&self) -> usize {
        self.held_set().len()
    }

    // The set is only ever mutated by single insert/remove calls, so a
    // panic elsewhere cannot leave it half-updated.
    fn held_set(&self) -> MutexGuard<'_, HashSet<SeriesKey>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Ownership of one series key. Dropping it releases the key.
pub struct SeriesGuard {
    locks: Arc<SeriesLocks>,
    key: SeriesKey,
}

impl SeriesGuard {
    pub fn key(&self) -> &SeriesKey {
        &self.key
    }
}

impl Drop for SeriesGuard {
    fn drop(&mut self) {
        self.locks.held_set().remove(&self.key);
        self.locks.released.notify_all();
    }
}

impl std::fmt::Debug for SeriesGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesGuard").field("key", &self.key).finish()
    }
}
