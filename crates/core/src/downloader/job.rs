//! Download job records and their state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use tickvault_market_data::{join_symbols, Symbol};

use crate::errors::{Error, Result};

/// Job lifecycle.
///
/// ```text
/// pending -> in_progress -> succeeded
///                        -> failed_retryable -> pending
///                        -> failed_permanent
/// ```
///
/// An interrupted `in_progress` job goes back to `pending` on resume, and
/// `retry_failed` moves `failed_permanent` back to `pending`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Succeeded,
    FailedRetryable,
    FailedPermanent,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Succeeded => "succeeded",
            JobStatus::FailedRetryable => "failed_retryable",
            JobStatus::FailedPermanent => "failed_permanent",
        }
    }

    /// Succeeded and permanently failed jobs are never picked up again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::FailedPermanent)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (InProgress, Succeeded)
                | (InProgress, FailedRetryable)
                | (InProgress, FailedPermanent)
                | (InProgress, Pending)
                | (FailedRetryable, Pending)
                | (FailedRetryable, FailedPermanent)
                | (FailedPermanent, Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "in_progress" => Ok(JobStatus::InProgress),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed_retryable" => Ok(JobStatus::FailedRetryable),
            "failed_permanent" => Ok(JobStatus::FailedPermanent),
            other => Err(Error::Unexpected(format!("unknown job status '{}'", other))),
        }
    }
}

/// One unit of download work: a symbol or symbol group over a date range.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadJob {
    pub run_id: String,
    /// The symbol, or the comma-joined symbol group.
    pub job_key: String,
    pub symbols: Vec<Symbol>,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub last_error: Option<String>,
    /// Succeeded, but some symbols or records are absent.
    pub partial: bool,
    pub missing: Vec<Symbol>,
    pub records_stored: usize,
    pub quality_score: Option<f64>,
    pub source: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DownloadJob {
    pub fn new(run_id: impl Into<String>, symbols: Vec<Symbol>, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            run_id: run_id.into(),
            job_key: join_symbols(&symbols),
            symbols,
            start,
            end,
            status: JobStatus::Pending,
            attempt_count: 0,
            last_error: None,
            partial: false,
            missing: Vec::new(),
            records_stored: 0,
            quality_score: None,
            source: None,
            updated_at: Utc::now(),
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::Unexpected(format!(
                "job {} cannot move from {} to {}",
                self.job_key, self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// A worker picked the job up; counts as one attempt.
    pub fn claim(&mut self) -> Result<()> {
        self.transition(JobStatus::InProgress)?;
        self.attempt_count += 1;
        Ok(())
    }

    pub fn succeed(&mut self, records_stored: usize, missing: Vec<Symbol>, partial: bool) -> Result<()> {
        self.transition(JobStatus::Succeeded)?;
        self.records_stored = records_stored;
        self.partial = partial || !missing.is_empty();
        self.missing = missing;
        self.last_error = None;
        Ok(())
    }

    pub fn fail_retryable(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::FailedRetryable)?;
        self.last_error = Some(error.into());
        Ok(())
    }

    pub fn fail_permanent(&mut self, error: impl Into<String>) -> Result<()> {
        self.transition(JobStatus::FailedPermanent)?;
        self.last_error = Some(error.into());
        Ok(())
    }

    /// Back to pending: after a backoff, an interrupted run, or a manual retry.
    pub fn requeue(&mut self) -> Result<()> {
        self.transition(JobStatus::Pending)
    }

    /// Whether a resumed run should pick this job up.
    pub fn is_resumable(&self, max_retries: u32) -> bool {
        match self.status {
            JobStatus::Pending | JobStatus::InProgress => true,
            JobStatus::FailedRetryable => self.attempt_count < max_retries,
            JobStatus::Succeeded | JobStatus::FailedPermanent => false,
        }
    }
}
