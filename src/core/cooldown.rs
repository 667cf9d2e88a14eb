//! Per-key cooldown between fetch attempts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

use super::cache_key::CacheKey;

/// Default minimum gap between fetch attempts for one key.
pub const DEFAULT_COOLDOWN_WINDOW: Duration = Duration::from_millis(1000);
/// Extra time an attempt record lives past its window before removal.
pub const DEFAULT_COOLDOWN_GRACE: Duration = Duration::from_secs(1);

/// Records the last fetch attempt per key.
///
/// Each record is deleted `window + grace` after it was made, by a timer
/// task when a runtime is available and otherwise on the next
/// [`mark_attempt`](Self::mark_attempt).
#[derive(Debug, Clone)]
pub struct CooldownThrottle {
    window: Duration,
    grace: Duration,
    attempts: Arc<Mutex<HashMap<CacheKey, Instant>>>,
}

impl Default for CooldownThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN_WINDOW, DEFAULT_COOLDOWN_GRACE)
    }
}

impl CooldownThrottle {
    #[must_use]
    pub fn new(window: Duration, grace: Duration) -> Self {
        Self {
            window,
            grace,
            attempts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// True iff an attempt for `key` was made less than one window ago.
    #[must_use]
    pub fn is_in_cooldown(&self, key: &CacheKey) -> bool {
        let attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        attempts
            .get(key)
            .is_some_and(|last| last.elapsed() < self.window)
    }

    /// Record an attempt for `key` now.
    pub fn mark_attempt(&self, key: &CacheKey) {
        let lifetime = self.window + self.grace;
        let runtime = tokio::runtime::Handle::try_current().ok();
        if runtime.is_none() {
            self.purge_older_than(lifetime);
        }

        let now = Instant::now();
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), now);

        if let Some(handle) = runtime {
            let attempts = Arc::clone(&self.attempts);
            let key = key.clone();
            handle.spawn(async move {
                tokio::time::sleep(lifetime).await;
                let mut attempts = attempts.lock().unwrap_or_else(PoisonError::into_inner);
                // A newer attempt owns its own timer.
                if attempts.get(&key) == Some(&now) {
                    attempts.remove(&key);
                }
            });
        }
    }

    /// Drop every attempt record, ending all cooldowns now.
    pub fn reset(&self) {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of live attempt records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.attempts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn purge_older_than(&self, lifetime: Duration) {
        let mut attempts = self.attempts.lock().unwrap_or_else(PoisonError::into_inner);
        attempts.retain(|_, at| at.elapsed() < lifetime);
    }
}
