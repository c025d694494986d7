//! Idempotency guard: at most one real execution per command key per window.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

/// Result of asking the guard for permission to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The key was stamped with `at`; the caller may run
    Admitted { at: DateTime<Utc> },
    /// The key ran at `last_run`, inside the window
    Suppressed { last_run: DateTime<Utc> },
}

/// `command_key -> last execution time`, behind one lock.
///
/// The lock is held only for the check-and-stamp, never while an action runs.
pub struct DedupGuard {
    window: Duration,
    purge_after: Duration,
    last_run: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl DedupGuard {
    /// Entries older than `window * purge_factor` are dropped on each check.
    #[must_use]
    pub fn new(window: Duration, purge_factor: u32) -> Self {
        Self {
            window,
            purge_after: window * i32::try_from(purge_factor.max(1)).unwrap_or(i32::MAX),
            last_run: Mutex::new(HashMap::new()),
        }
    }

    /// Atomically check the window for `key` and stamp it if clear.
    pub async fn try_acquire(&self, key: &str, now: DateTime<Utc>) -> Admission {
        let mut last_run = self.last_run.lock().await;

        let purge_after = self.purge_after;
        let before = last_run.len();
        last_run.retain(|_, at| now - *at < purge_after);
        if last_run.len() < before {
            debug!("Purged {} stale dedup entries", before - last_run.len());
        }

        if let Some(&last) = last_run.get(key) {
            if now - last < self.window {
                return Admission::Suppressed { last_run: last };
            }
        }
        last_run.insert(key.to_string(), now);
        Admission::Admitted { at: now }
    }

    /// Drop the stamp for `key` if it is still the one taken at `at`.
    ///
    /// Used when an attempt failed transiently so a retry is not suppressed.
    pub async fn release(&self, key: &str, at: DateTime<Utc>) {
        let mut last_run = self.last_run.lock().await;
        if last_run.get(key) == Some(&at) {
            last_run.remove(key);
        }
    }

    /// Number of tracked keys.
    pub async fn len(&self) -> usize {
        self.last_run.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.last_run.lock().await.is_empty()
    }
}
