//! Tiered cache keyed by request fingerprint.
//!
//! Tiers, fastest first:
//! - memory: LRU within a byte budget
//! - disk: gzip JSON files with metadata sidecars, survives restarts
//! - structured store: oversized entries plus an indexed copy of price rows
//!
//! Cache failures are logged and counted, never returned to readers; a
//! failed read is a miss.

mod disk;
mod manager;
mod memory;
mod payload;
mod stats;
mod store;

pub use disk::DiskTier;
pub use manager::{CacheManager, Placement};
pub use memory::{MemoryTier, TierWrite};
pub use payload::CachePayload;
pub use stats::{CacheStats, CacheStatsSnapshot};
pub use store::{InMemorySeriesStore, SeriesStore, StoredEntry};

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::config::DataConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheTier {
    Memory,
    Disk,
    Store,
}

/// Budgets and limits for the tiers, in bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheSettings {
    pub memory_budget: usize,
    pub disk_budget: usize,
    pub memory_entry_limit: usize,
    pub disk_entry_limit: usize,
    pub default_ttl: Duration,
    /// Disk tier directory; no disk tier when `None`.
    pub dir: Option<PathBuf>,
}

impl CacheSettings {
    pub fn from_config(config: &DataConfig) -> Self {
        let bytes = |v: u64| usize::try_from(v).unwrap_or(usize::MAX);
        Self {
            memory_budget: bytes(config.cache_memory_budget),
            disk_budget: bytes(config.cache_disk_budget),
            memory_entry_limit: bytes(config.memory_entry_limit),
            disk_entry_limit: bytes(config.disk_entry_limit),
            default_ttl: config.default_ttl(),
            dir: Some(config.cache_dir.clone()),
        }
    }

    /// Memory tier only, as used by tests and short-lived tools.
    pub fn memory_only(memory_budget: usize, default_ttl: Duration) -> Self {
        Self {
            memory_budget,
            disk_budget: memory_budget,
            memory_entry_limit: memory_budget,
            disk_entry_limit: memory_budget,
            default_ttl,
            dir: None,
        }
    }
}
