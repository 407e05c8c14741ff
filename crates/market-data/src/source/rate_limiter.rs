//! Minimum-interval call spacing per source.
//!
//! Every caller reserves the next free slot for a source under a lock and
//! then sleeps until that slot, so spacing holds across all concurrent
//! workers no matter how requests are batched.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

pub struct RateLimiter {
    /// Earliest instant the next call to each source may start.
    next_slot: Mutex<HashMap<String, Instant>>,
    default_interval: Duration,
}

impl RateLimiter {
    pub fn new(default_interval: Duration) -> Self {
        Self {
            next_slot: Mutex::new(HashMap::new()),
            default_interval,
        }
    }

    fn lock_slots(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.next_slot.lock().unwrap_or_else(|poisoned| {
            warn!("Rate limiter mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Reserve a slot for `source` and return how long to wait for it.
    fn reserve(&self, source: &str, interval: Duration) -> Duration {
        let mut slots = self.lock_slots();
        let now = Instant::now();
        let slot = slots.entry(source.to_string()).or_insert(now);

        let start = (*slot).max(now);
        *slot = start + interval;
        start - now
    }

    /// Wait until `source` may be called, using the larger of the
    /// configured interval and `min_interval`.
    pub async fn acquire(&self, source: &str, min_interval: Duration) {
        let interval = self.default_interval.max(min_interval);
        let wait = self.reserve(source, interval);

        if wait > Duration::ZERO {
            debug!("Rate limiter: waiting {:?} for source '{}'", wait, source);
            tokio::time::sleep(wait).await;
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}
