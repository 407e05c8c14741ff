use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use log::debug;

use super::model::{CacheEntryRow, SeriesRow, DATE_FORMAT};
use crate::db::{get_connection, Database, DbPool, WriteHandle};
use crate::errors::{IntoCore, StorageError};
use crate::schema::cache_entries::dsl as entries_dsl;
use crate::schema::series_rows::dsl as rows_dsl;
use tickvault_core::cache::{SeriesStore, StoredEntry};
use tickvault_core::errors::Result;
use tickvault_market_data::{Symbol, TimeSeriesRecord};

/// Structured cache tier on SQLite: oversized entries in `cache_entries`,
/// indexed price rows in `series_rows`.
pub struct SqliteSeriesStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SqliteSeriesStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    pub fn from_database(db: &Database) -> Self {
        Self::new(db.pool().clone(), db.writer().clone())
    }

    pub fn row_count(&self) -> Result<usize> {
        let mut conn = get_connection(&self.pool)?;
        let count: i64 = rows_dsl::series_rows.count().get_result(&mut conn).into_core()?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

#[async_trait]
impl SeriesStore for SqliteSeriesStore {
    async fn put_entry(&self, entry: &StoredEntry) -> Result<()> {
        let row = CacheEntryRow::try_from(entry).into_core()?;
        self.writer
            .exec(move |conn| {
                diesel::replace_into(entries_dsl::cache_entries)
                    .values(&row)
                    .execute(conn)
                    .into_core()?;
                Ok(())
            })
            .await
    }

    fn get_entry(&self, key: &str) -> Result<Option<StoredEntry>> {
        let mut conn = get_connection(&self.pool)?;
        let row = entries_dsl::cache_entries
            .find(key)
            .select(CacheEntryRow::as_select())
            .first::<CacheEntryRow>(&mut conn)
            .optional()
            .into_core()?;

        row.map(|row| StoredEntry::try_from(row).into_core())
            .transpose()
    }

    async fn remove_entry(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        let removed = self
            .writer
            .exec(move |conn| {
                diesel::delete(entries_dsl::cache_entries.find(key))
                    .execute(conn)
                    .into_core()
            })
            .await?;
        Ok(removed > 0)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now.timestamp_millis();
        let purged = self
            .writer
            .exec(move |conn| {
                diesel::delete(entries_dsl::cache_entries.filter(entries_dsl::expires_at.le(cutoff)))
                    .execute(conn)
                    .into_core()
            })
            .await?;
        if purged > 0 {
            debug!("Purged {} expired store entries", purged);
        }
        Ok(purged)
    }

    async fn upsert_series(&self, records: &[TimeSeriesRecord]) -> Result<usize> {
        let rows = records
            .iter()
            .map(SeriesRow::try_from)
            .collect::<std::result::Result<Vec<_>, StorageError>>()
            .into_core()?;

        self.writer
            .exec(move |conn| {
                for chunk in rows.chunks(1_000) {
                    diesel::replace_into(rows_dsl::series_rows)
                        .values(chunk)
                        .execute(conn)
                        .into_core()?;
                }
                Ok(rows.len())
            })
            .await
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
        let mut conn = get_connection(&self.pool)?;
        let rows = rows_dsl::series_rows
            .filter(rows_dsl::symbol.eq(symbol.as_str()))
            .filter(rows_dsl::date.ge(start.format(DATE_FORMAT).to_string()))
            .filter(rows_dsl::date.le(end.format(DATE_FORMAT).to_string()))
            .order(rows_dsl::date.asc())
            .select(SeriesRow::as_select())
            .load::<SeriesRow>(&mut conn)
            .into_core()?;

        rows.into_iter()
            .map(|row| TimeSeriesRecord::try_from(row).into_core())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickvault_core::cache::CachePayload;

    fn ymd(m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, m, d).unwrap()
    }

    fn row(symbol: &str, date: NaiveDate, close: Option<f64>) -> TimeSeriesRecord {
        TimeSeriesRecord::new(symbol, date, "TUSHARE")
            .with_field("close", close)
            .with_field("volume", Some(1200.0))
    }

    #[tokio::test]
    async fn test_range_query_uses_date_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in(dir.path()).unwrap();
        let store = SqliteSeriesStore::from_database(&db);

        store
            .upsert_series(&[
                row("000001.SZ", ymd(1, 31), Some(9.1)),
                row("000001.SZ", ymd(2, 1), Some(9.3)),
                row("000001.SZ", ymd(2, 2), None),
                row("000002.SZ", ymd(2, 1), Some(20.0)),
            ])
            .await
            .unwrap();

        let rows = store
            .range_query(&Symbol::new("000001.SZ"), ymd(2, 1), ymd(2, 29))
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, ymd(2, 1));
        assert_eq!(rows[0].close(), Some(9.3));
        assert_eq!(rows[1].fields.get("close"), Some(&None));
        assert!(store
            .range_query(&Symbol::new("000001.SZ"), ymd(3, 1), ymd(2, 1))
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_upsert_series_replaces_same_day() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in(dir.path()).unwrap();
        let store = SqliteSeriesStore::from_database(&db);

        store.upsert_series(&[row("AAA", ymd(1, 2), Some(1.0))]).await.unwrap();
        store.upsert_series(&[row("AAA", ymd(1, 2), Some(1.5))]).await.unwrap();

        assert_eq!(store.row_count().unwrap(), 1);
        let rows = store.range_query(&Symbol::new("AAA"), ymd(1, 1), ymd(1, 31)).unwrap();
        assert_eq!(rows[0].close(), Some(1.5));
    }

    #[tokio::test]
    async fn test_entries_round_trip_and_purge() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in(dir.path()).unwrap();
        let store = SqliteSeriesStore::from_database(&db);
        let now = Utc::now();

        for (key, expires_at) in [
            ("stale", now - chrono::Duration::seconds(5)),
            ("fresh", now + chrono::Duration::hours(1)),
        ] {
            store
                .put_entry(&StoredEntry {
                    key: key.to_string(),
                    payload: CachePayload::Symbols(vec![Symbol::new("AAA")]),
                    created_at: now,
                    expires_at,
                })
                .await
                .unwrap();
        }

        let fresh = store.get_entry("fresh").unwrap().unwrap();
        assert_eq!(fresh.payload, CachePayload::Symbols(vec![Symbol::new("AAA")]));
        assert_eq!(fresh.expires_at.timestamp_millis(), (now + chrono::Duration::hours(1)).timestamp_millis());

        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
        assert!(store.get_entry("stale").unwrap().is_none());
        assert!(store.remove_entry("fresh").await.unwrap());
        assert!(!store.remove_entry("fresh").await.unwrap());
    }
}
