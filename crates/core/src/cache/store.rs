//! Structured store tier.
//!
//! Holds oversized cache entries by fingerprint and an indexed copy of
//! every price row, queryable by symbol and date range. Rows are keyed on
//! (symbol, date); a later upsert replaces the earlier row.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use tickvault_market_data::{Symbol, TimeSeriesRecord};

use super::CachePayload;
use crate::errors::{CacheError, Result};

/// A cache entry as kept by the structured store.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredEntry {
    pub key: String,
    pub payload: CachePayload,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Storage interface for the structured tier.
#[async_trait]
pub trait SeriesStore: Send + Sync {
    /// Insert or replace an entry by key.
    async fn put_entry(&self, entry: &StoredEntry) -> Result<()>;

    fn get_entry(&self, key: &str) -> Result<Option<StoredEntry>>;

    async fn remove_entry(&self, key: &str) -> Result<bool>;

    /// Delete entries expired at `now`; returns how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Insert or replace rows by (symbol, date).
    async fn upsert_series(&self, records: &[TimeSeriesRecord]) -> Result<usize>;

    /// Rows for `symbol` with `start <= date <= end`, ordered by date.
    fn range_query(
        &self,
        symbol: &Symbol,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TimeSeriesRecord>>;
}

/// Process-local [`SeriesStore`], used in tests and memory-only setups.
#[derive(Default)]
pub struct InMemorySeriesStore {
    entries: RwLock<HashMap<String, StoredEntry>>,
    rows: RwLock<BTreeMap<(Symbol, NaiveDate), TimeSeriesRecord>>,
}

impl InMemorySeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.read().map(|rows| rows.len()).unwrap_or(0)
    }
}

fn poisoned<T>(_: T) -> crate::errors::Error {
    CacheError::Store("in-memory store lock poisoned".to_string()).into()
}

#[async_trait]
impl SeriesStore for InMemorySeriesStore {
    async fn put_entry(&self, entry: &StoredEntry) -> Result<()> {
        self.entries
            .write()
            .map_err(poisoned)?
            .insert(entry.key.clone(), entry.clone());
        Ok(())
    }

    fn get_entry(&self, key: &str) -> Result<Option<StoredEntry>> {
        Ok(self.entries.read().map_err(poisoned)?.get(key).cloned())
    }

    async fn remove_entry(&self, key: &str) -> Result<bool> {
        Ok(self.entries.write().map_err(poisoned)?.remove(key).is_some())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut entries = self.entries.write().map_err(poisoned)?;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        Ok(before - entries.len())
    }

    async fn upsert_series(&self, records: &[TimeSeriesRecord]) -> Result<usize> {
        let mut rows = self.rows.write().map_err(poisoned)?;
        for record in records {
            rows.insert((record.symbol.clone(), record.date), record.clone());
        }
        Ok(records.len())
    }

    fn range_query(
        &self,
        symbol: &Symbol,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TimeSeriesRecord>> {
        if start > end {
            return Ok(Vec::new());
        }
        let rows = self.rows.read().map_err(poisoned)?;
        Ok(rows
            .range((symbol.clone(), start)..=(symbol.clone(), end))
            .map(|(_, record)| record.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn row(symbol: &str, d: u32, close: f64) -> TimeSeriesRecord {
        TimeSeriesRecord::new(symbol, ymd(d), "UQER").with_field("close", Some(close))
    }

    #[tokio::test]
    async fn test_range_query_is_bounded_and_ordered() {
        let store = InMemorySeriesStore::new();
        store
            .upsert_series(&[row("AAA", 4, 3.0), row("AAA", 2, 1.0), row("AAA", 3, 2.0), row("BBB", 3, 9.0)])
            .await
            .unwrap();

        let rows = store.range_query(&Symbol::new("AAA"), ymd(2), ymd(3)).unwrap();
        let closes: Vec<_> = rows.iter().map(|r| r.close()).collect();
        assert_eq!(closes, vec![Some(1.0), Some(2.0)]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_same_day() {
        let store = InMemorySeriesStore::new();
        store.upsert_series(&[row("AAA", 2, 1.0)]).await.unwrap();
        store.upsert_series(&[row("AAA", 2, 1.5)]).await.unwrap();

        assert_eq!(store.row_count(), 1);
        let rows = store.range_query(&Symbol::new("AAA"), ymd(1), ymd(31)).unwrap();
        assert_eq!(rows[0].close(), Some(1.5));
    }

    #[tokio::test]
    async fn test_purge_expired_entries() {
        let store = InMemorySeriesStore::new();
        let now = Utc::now();
        for (key, expires_at) in [("a", now - chrono::Duration::seconds(1)), ("b", now + chrono::Duration::hours(1))] {
            store
                .put_entry(&StoredEntry {
                    key: key.to_string(),
                    payload: CachePayload::Symbols(vec![]),
                    created_at: now,
                    expires_at,
                })
                .await
                .unwrap();
        }

        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
        assert!(store.get_entry("a").unwrap().is_none());
        assert!(store.get_entry("b").unwrap().is_some());
    }
}
