//! Row shapes of the `cache_entries` and `series_rows` tables.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;

use tickvault_core::cache::{CachePayload, StoredEntry};
use tickvault_market_data::TimeSeriesRecord;

use crate::errors::StorageError;

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";

fn timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis).unwrap_or_default()
}

#[derive(Queryable, Selectable, Insertable, Clone, Debug, PartialEq)]
#[diesel(table_name = crate::schema::cache_entries)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CacheEntryRow {
    pub key: String,
    /// Always `store`; the memory and disk tiers keep their own indexes.
    pub tier: String,
    pub kind: String,
    /// JSON-encoded [`CachePayload`].
    pub payload: String,
    pub created_at: i64,
    pub expires_at: i64,
}

impl TryFrom<&StoredEntry> for CacheEntryRow {
    type Error = StorageError;

    fn try_from(entry: &StoredEntry) -> Result<Self, Self::Error> {
        Ok(Self {
            key: entry.key.clone(),
            tier: "store".to_string(),
            kind: entry.payload.kind().to_string(),
            payload: serde_json::to_string(&entry.payload)?,
            created_at: entry.created_at.timestamp_millis(),
            expires_at: entry.expires_at.timestamp_millis(),
        })
    }
}

impl TryFrom<CacheEntryRow> for StoredEntry {
    type Error = StorageError;

    fn try_from(row: CacheEntryRow) -> Result<Self, Self::Error> {
        let payload: CachePayload = serde_json::from_str(&row.payload)?;
        Ok(StoredEntry {
            key: row.key,
            payload,
            created_at: timestamp(row.created_at),
            expires_at: timestamp(row.expires_at),
        })
    }
}

#[derive(Queryable, Selectable, Insertable, Clone, Debug, PartialEq)]
#[diesel(table_name = crate::schema::series_rows)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SeriesRow {
    pub symbol: String,
    pub date: String,
    pub source: String,
    /// JSON object of field name to value or null.
    pub fields: String,
    pub fetched_at: i64,
}

impl TryFrom<&TimeSeriesRecord> for SeriesRow {
    type Error = StorageError;

    fn try_from(record: &TimeSeriesRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            symbol: record.symbol.to_string(),
            date: record.date.format(DATE_FORMAT).to_string(),
            source: record.source.clone(),
            fields: serde_json::to_string(&record.fields)?,
            fetched_at: record.fetched_at.timestamp_millis(),
        })
    }
}

impl TryFrom<SeriesRow> for TimeSeriesRecord {
    type Error = StorageError;

    fn try_from(row: SeriesRow) -> Result<Self, Self::Error> {
        let date = NaiveDate::parse_from_str(&row.date, DATE_FORMAT)
            .map_err(|e| StorageError::InvalidValue(format!("date '{}': {}", row.date, e)))?;
        let fields: BTreeMap<String, Option<f64>> = serde_json::from_str(&row.fields)?;

        let mut record = TimeSeriesRecord::new(row.symbol, date, row.source);
        record.fields = fields;
        record.fetched_at = timestamp(row.fetched_at);
        Ok(record)
    }
}
