//! Tiered cache front.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use log::{debug, warn};
use tokio::sync::OnceCell;

use tickvault_market_data::{RequestFingerprint, Symbol, TimeSeriesRecord};

use super::disk::DiskTier;
use super::memory::MemoryTier;
use super::stats::{CacheStats, CacheStatsSnapshot};
use super::store::{SeriesStore, StoredEntry};
use super::{CachePayload, CacheSettings, CacheTier};
use crate::errors::{CacheError, Result};

/// Tiers an entry was written to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Placement {
    pub memory: bool,
    pub disk: bool,
    pub store: bool,
}

impl Placement {
    pub fn is_cached(&self) -> bool {
        self.memory || self.disk || self.store
    }
}

pub struct CacheManager {
    memory: MemoryTier,
    disk: Option<DiskTier>,
    store: Option<Arc<dyn SeriesStore>>,
    settings: CacheSettings,
    stats: CacheStats,
    /// Fetches in flight, keyed by fingerprint. Callers arriving while a
    /// fetch runs wait on its cell and receive the same payload.
    inflight: DashMap<String, Arc<OnceCell<Arc<CachePayload>>>>,
}

impl CacheManager {
    /// Build the tiers. The disk tier is opened when `settings.dir` is set.
    pub fn open(settings: CacheSettings) -> Result<Self> {
        let disk = match &settings.dir {
            Some(dir) => Some(DiskTier::open(
                dir.clone(),
                settings.disk_budget,
                settings.disk_entry_limit,
            )?),
            None => None,
        };
        Ok(Self {
            memory: MemoryTier::new(settings.memory_budget),
            disk,
            store: None,
            settings,
            stats: CacheStats::default(),
            inflight: DashMap::new(),
        })
    }

    pub fn with_store(mut self, store: Arc<dyn SeriesStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Look an entry up fastest tier first. Disk and store hits are copied
    /// into memory when they fit.
    pub async fn get(&self, fingerprint: &RequestFingerprint) -> Option<Arc<CachePayload>> {
        let found = self.lookup(fingerprint.as_str());
        match &found {
            Some((tier, _)) => self.stats.record_hit(*tier),
            None => self.stats.record_miss(),
        }
        found.map(|(_, payload)| payload)
    }

    fn lookup(&self, key: &str) -> Option<(CacheTier, Arc<CachePayload>)> {
        let now = Utc::now();

        if let Some(payload) = self.memory.get(key, now) {
            return Some((CacheTier::Memory, payload));
        }

        if let Some(disk) = &self.disk {
            match disk.get(key, now) {
                Ok(Some((payload, expires_at))) => {
                    let payload = Arc::new(payload);
                    self.promote(key, &payload, expires_at);
                    return Some((CacheTier::Disk, payload));
                }
                Ok(None) => {}
                Err(e) => {
                    self.stats.record_error();
                    warn!("Disk cache read failed for {}: {}", key, e);
                }
            }
        }

        if let Some(store) = &self.store {
            match store.get_entry(key) {
                Ok(Some(entry)) if entry.expires_at > now => {
                    let payload = Arc::new(entry.payload);
                    self.promote(key, &payload, entry.expires_at);
                    return Some((CacheTier::Store, payload));
                }
                // Expired store entries are left for purge_expired.
                Ok(_) => {}
                Err(e) => {
                    self.stats.record_error();
                    warn!("Store cache read failed for {}: {}", key, e);
                }
            }
        }

        None
    }

    fn promote(&self, key: &str, payload: &Arc<CachePayload>, expires_at: chrono::DateTime<Utc>) {
        let size = match payload.to_json() {
            Ok(bytes) => bytes.len(),
            Err(_) => return,
        };
        if size <= self.settings.memory_entry_limit {
            let write = self.memory.put(key, payload.clone(), size, expires_at);
            self.stats.record_evictions(write.evicted);
        }
    }

    /// Store `payload` under `fingerprint`.
    ///
    /// Any existing entry is removed from every tier first. The target tier
    /// is chosen by encoded size: small entries go to memory and disk,
    /// medium ones to disk, large ones to the structured store (or disk
    /// when no store is attached). Price rows are also indexed in the store.
    /// Failures are logged; the returned placement says what was written.
    pub async fn put(
        &self,
        fingerprint: &RequestFingerprint,
        payload: CachePayload,
        ttl: Option<Duration>,
    ) -> Placement {
        let key = fingerprint.as_str();
        self.invalidate(fingerprint).await;

        let size = match payload.to_json() {
            Ok(bytes) => bytes.len(),
            Err(e) => {
                self.stats.record_error();
                warn!("Cannot encode cache entry {}: {}", key, e);
                return Placement::default();
            }
        };
        let ttl = ttl.unwrap_or(self.settings.default_ttl);
        let created_at = Utc::now();
        let expires_at = created_at
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(3650));

        let mut placement = Placement::default();
        let payload = Arc::new(payload);

        if size <= self.settings.memory_entry_limit {
            let write = self.memory.put(key, payload.clone(), size, expires_at);
            self.stats.record_evictions(write.evicted);
            placement.memory = write.stored;
        }

        let wants_store = size > self.settings.disk_entry_limit && self.store.is_some();
        if !wants_store {
            placement.disk = self.put_disk(key, &payload, expires_at);
        }

        if let Some(store) = &self.store {
            if wants_store {
                let entry = StoredEntry {
                    key: key.to_string(),
                    payload: (*payload).clone(),
                    created_at,
                    expires_at,
                };
                match store.put_entry(&entry).await {
                    Ok(()) => placement.store = true,
                    Err(e) => {
                        self.stats.record_error();
                        warn!("Store cache write failed for {}: {}", key, e);
                    }
                }
            }

            if let Some(records) = payload.as_prices() {
                if let Err(e) = store.upsert_series(records).await {
                    self.stats.record_error();
                    warn!("Series index write failed for {}: {}", key, e);
                }
            }
        }

        debug!(
            "Cached {} ({} bytes, {} items) memory={} disk={} store={}",
            key,
            size,
            payload.len(),
            placement.memory,
            placement.disk,
            placement.store
        );
        placement
    }

    fn put_disk(
        &self,
        key: &str,
        payload: &CachePayload,
        expires_at: chrono::DateTime<Utc>,
    ) -> bool {
        let Some(disk) = &self.disk else {
            return false;
        };
        match disk.put(key, payload, expires_at) {
            Ok(write) => {
                self.stats.record_evictions(write.evicted);
                write.stored
            }
            Err(e) => {
                self.stats.record_error();
                warn!("Disk cache write failed for {}: {}", key, e);
                false
            }
        }
    }

    /// Drop the entry from every tier. Returns the number of tiers that held it.
    pub async fn invalidate(&self, fingerprint: &RequestFingerprint) -> usize {
        let key = fingerprint.as_str();
        let mut removed = usize::from(self.memory.remove(key));

        if let Some(disk) = &self.disk {
            match disk.remove(key) {
                Ok(hit) => removed += usize::from(hit),
                Err(e) => {
                    self.stats.record_error();
                    warn!("Disk cache invalidate failed for {}: {}", key, e);
                }
            }
        }
        if let Some(store) = &self.store {
            match store.remove_entry(key).await {
                Ok(hit) => removed += usize::from(hit),
                Err(e) => {
                    self.stats.record_error();
                    warn!("Store cache invalidate failed for {}: {}", key, e);
                }
            }
        }
        removed
    }

    /// Sweep expired entries out of every tier.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut purged = self.memory.purge_expired(now);

        if let Some(disk) = &self.disk {
            match disk.purge_expired(now) {
                Ok(n) => purged += n,
                Err(e) => warn!("Disk cache purge failed: {}", e),
            }
        }
        if let Some(store) = &self.store {
            match store.purge_expired(now).await {
                Ok(n) => purged += n,
                Err(e) => warn!("Store cache purge failed: {}", e),
            }
        }
        if purged > 0 {
            debug!("Purged {} expired cache entries", purged);
        }
        purged
    }

    /// Stored price rows for one symbol between `start` and `end` inclusive.
    pub fn range_query(
        &self,
        symbol: &Symbol,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TimeSeriesRecord>> {
        match &self.store {
            Some(store) => store.range_query(symbol, start, end),
            None => Err(CacheError::Store("no structured store attached".to_string()).into()),
        }
    }

    /// Return the cached payload, or run `fetch` and cache its result.
    ///
    /// Concurrent callers for the same fingerprint share one fetch: the
    /// first runs `fetch` and the rest receive its payload, whether or not
    /// it could be cached. If the fetch fails, the next waiter runs its own.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        fingerprint: &RequestFingerprint,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<Arc<CachePayload>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachePayload>>,
    {
        if let Some(payload) = self.get(fingerprint).await {
            return Ok(payload);
        }

        let key = fingerprint.as_str().to_string();
        let cell = self
            .inflight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_try_init(|| self.load(fingerprint, ttl, fetch))
            .await
            .map(Arc::clone);

        // Later callers go through the tiers again. A failed cell stays while
        // other waiters still hold it so one of them can retry.
        self.inflight.remove_if(&key, |_, current| {
            Arc::ptr_eq(current, &cell)
                && (current.initialized() || Arc::strong_count(current) <= 2)
        });

        result
    }

    async fn load<F, Fut>(
        &self,
        fingerprint: &RequestFingerprint,
        ttl: Option<Duration>,
        fetch: F,
    ) -> Result<Arc<CachePayload>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CachePayload>>,
    {
        // A previous flight may have filled the entry after our first lookup.
        if let Some((tier, payload)) = self.lookup(fingerprint.as_str()) {
            self.stats.record_hit(tier);
            return Ok(payload);
        }

        self.stats.record_fetch();
        let payload = fetch().await?;
        if payload.is_empty() {
            return Ok(Arc::new(payload));
        }
        self.put(fingerprint, payload.clone(), ttl).await;
        Ok(Arc::new(payload))
    }

    pub fn memory_entries(&self) -> usize {
        self.memory.len()
    }

    pub fn disk_entries(&self) -> usize {
        self.disk.as_ref().map_or(0, DiskTier::len)
    }
}
