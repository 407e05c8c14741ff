//! Hit/miss counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::CacheTier;

#[derive(Debug, Default)]
pub struct CacheStats {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    store_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    fetches: AtomicU64,
    errors: AtomicU64,
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatsSnapshot {
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub store_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub fetches: u64,
    pub errors: u64,
}

impl CacheStatsSnapshot {
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.disk_hits + self.store_hits
    }

    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

impl CacheStats {
    pub(crate) fn record_hit(&self, tier: CacheTier) {
        let counter = match tier {
            CacheTier::Memory => &self.memory_hits,
            CacheTier::Disk => &self.disk_hits,
            CacheTier::Store => &self.store_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_fetch(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            memory_hits: self.memory_hits.load(Ordering::Relaxed),
            disk_hits: self.disk_hits.load(Ordering::Relaxed),
            store_hits: self.store_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
