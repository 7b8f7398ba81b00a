//! Keyed, cancellable one-shot timers.
//!
//! At most one timer is live per key: scheduling again aborts the previous
//! one, so any number of start/cancel cycles never leaves two timers armed
//! for the same workspace.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

struct TimerEntry {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Registry of idle timers keyed by workspace id.
#[derive(Clone, Default)]
pub struct IdleTimers {
    timers: Arc<Mutex<HashMap<String, TimerEntry>>>,
    generation: Arc<AtomicU64>,
}

impl std::fmt::Debug for IdleTimers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleTimers")
            .field("scheduled", &self.timers.lock().len())
            .finish()
    }
}

impl IdleTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the timer for `key`, replacing any timer already armed.
    ///
    /// When it fires, the entry is removed before `on_fire` runs, so
    /// cancelling from inside the callback is a no-op.
    pub fn schedule<F, Fut>(&self, key: &str, delay: Duration, on_fire: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let timers = self.timers.clone();
        let owned_key = key.to_string();

        let mut guard = self.timers.lock();
        if let Some(previous) = guard.remove(key) {
            previous.handle.abort();
        }

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let current = {
                let mut timers = timers.lock();
                let matches = timers
                    .get(&owned_key)
                    .is_some_and(|entry| entry.generation == generation);
                if matches {
                    timers.remove(&owned_key);
                }
                matches
            };
            if current {
                debug!(key = %owned_key, "Idle timer fired");
                on_fire().await;
            }
        });

        guard.insert(key.to_string(), TimerEntry { generation, handle });
        debug!(key, delay_secs = delay.as_secs(), "Idle timer scheduled");
    }

    /// Disarm the timer for `key`. Returns whether one was armed.
    pub fn cancel(&self, key: &str) -> bool {
        match self.timers.lock().remove(key) {
            Some(entry) => {
                entry.handle.abort();
                debug!(key, "Idle timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, key: &str) -> bool {
        self.timers.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.timers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.lock().is_empty()
    }

    /// Disarm everything.
    pub fn cancel_all(&self) {
        for (_, entry) in self.timers.lock().drain() {
            entry.handle.abort();
        }
    }
}
