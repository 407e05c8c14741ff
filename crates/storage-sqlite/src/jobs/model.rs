//! Row shape of the `download_jobs` table.

use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;

use tickvault_core::downloader::{DownloadJob, JobStatus};
use tickvault_market_data::Symbol;

use crate::errors::StorageError;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A `download_jobs` row as stored: dates as ISO strings, symbol lists as
/// JSON arrays, timestamps as Unix milliseconds.
#[derive(Queryable, Selectable, Insertable, Clone, Debug, PartialEq)]
#[diesel(table_name = crate::schema::download_jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobRow {
    pub run_id: String,
    pub job_key: String,
    pub symbols: String,
    pub start_date: String,
    pub end_date: String,
    pub status: String,
    pub attempt_count: i64,
    pub last_error: Option<String>,
    pub partial: bool,
    pub missing: String,
    pub records_stored: i64,
    pub quality_score: Option<f64>,
    pub source: Option<String>,
    pub updated_at: i64,
}

impl TryFrom<&DownloadJob> for JobRow {
    type Error = StorageError;

    fn try_from(job: &DownloadJob) -> Result<Self, Self::Error> {
        Ok(Self {
            run_id: job.run_id.clone(),
            job_key: job.job_key.clone(),
            symbols: serde_json::to_string(&job.symbols)?,
            start_date: job.start.format(DATE_FORMAT).to_string(),
            end_date: job.end.format(DATE_FORMAT).to_string(),
            status: job.status.as_str().to_string(),
            attempt_count: i64::from(job.attempt_count),
            last_error: job.last_error.clone(),
            partial: job.partial,
            missing: serde_json::to_string(&job.missing)?,
            records_stored: i64::try_from(job.records_stored).unwrap_or(i64::MAX),
            quality_score: job.quality_score,
            source: job.source.clone(),
            updated_at: job.updated_at.timestamp_millis(),
        })
    }
}

impl TryFrom<JobRow> for DownloadJob {
    type Error = StorageError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let date = |value: &str| {
            NaiveDate::parse_from_str(value, DATE_FORMAT)
                .map_err(|e| StorageError::InvalidValue(format!("date '{}': {}", value, e)))
        };
        let status: JobStatus = row
            .status
            .parse()
            .map_err(|_| StorageError::InvalidValue(format!("job status '{}'", row.status)))?;
        let symbols: Vec<Symbol> = serde_json::from_str(&row.symbols)?;
        let missing: Vec<Symbol> = serde_json::from_str(&row.missing)?;

        Ok(DownloadJob {
            start: date(&row.start_date)?,
            end: date(&row.end_date)?,
            run_id: row.run_id,
            job_key: row.job_key,
            symbols,
            status,
            attempt_count: u32::try_from(row.attempt_count).unwrap_or(0),
            last_error: row.last_error,
            partial: row.partial,
            missing,
            records_stored: usize::try_from(row.records_stored).unwrap_or(0),
            quality_score: row.quality_score,
            source: row.source,
            updated_at: DateTime::<Utc>::from_timestamp_millis(row.updated_at)
                .unwrap_or_default(),
        })
    }
}
