//! Run reporting.

use chrono::{DateTime, Utc};
use serde::Serialize;

use tickvault_market_data::QualityReport;

use super::job::{DownloadJob, JobStatus};

/// A job that failed permanently, with the error that ended it.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    pub job_key: String,
    pub attempts: u32,
    pub error: String,
}

/// What one execution of a run did.
///
/// Counts cover the jobs executed in this pass; `skipped` counts jobs that
/// were already finished when the pass started.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub total_jobs: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed_permanent: usize,
    pub skipped: usize,
    /// Jobs left pending or retryable, e.g. after an abort.
    pub unfinished: usize,
    pub records_stored: usize,
    pub quality: QualityReport,
    pub failures: Vec<JobFailure>,
    pub aborted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    pub(crate) fn new(run_id: &str, total_jobs: usize, skipped: usize) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            total_jobs,
            succeeded: 0,
            partial: 0,
            failed_permanent: 0,
            skipped,
            unfinished: 0,
            records_stored: 0,
            quality: QualityReport::empty(run_id),
            failures: Vec::new(),
            aborted: false,
            started_at: now,
            finished_at: now,
        }
    }

    /// Count a job in its final state for this pass.
    pub(crate) fn record(&mut self, job: &DownloadJob) {
        match job.status {
            JobStatus::Succeeded if job.partial => self.partial += 1,
            JobStatus::Succeeded => self.succeeded += 1,
            JobStatus::FailedPermanent => {
                self.failed_permanent += 1;
                self.failures.push(JobFailure {
                    job_key: job.job_key.clone(),
                    attempts: job.attempt_count,
                    error: job.last_error.clone().unwrap_or_default(),
                });
            }
            JobStatus::Pending | JobStatus::InProgress | JobStatus::FailedRetryable => {
                self.unfinished += 1;
            }
        }
        if job.status == JobStatus::Succeeded {
            self.records_stored += job.records_stored;
        }
    }

    pub(crate) fn add_quality(&mut self, report: &QualityReport) {
        self.quality.merge(report);
    }

    pub(crate) fn finish(&mut self) {
        self.failures.sort_by(|a, b| a.job_key.cmp(&b.job_key));
        self.finished_at = Utc::now();
    }

    /// Jobs executed in this pass.
    pub fn executed(&self) -> usize {
        self.succeeded + self.partial + self.failed_permanent + self.unfinished
    }

    /// Every executed job failed permanently.
    pub fn is_total_failure(&self) -> bool {
        self.failed_permanent > 0 && self.failed_permanent == self.executed()
    }
}

/// Progress of a run as recorded in the job store.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatus {
    pub run_id: String,
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub succeeded: usize,
    pub partial: usize,
    pub failed_retryable: usize,
    pub failed_permanent: usize,
    /// Finished jobs over all jobs.
    pub progress_rate: f64,
    /// Succeeded jobs over finished jobs.
    pub success_rate: f64,
}

impl RunStatus {
    pub fn from_jobs(run_id: &str, jobs: &[DownloadJob]) -> Self {
        let count = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();
        let succeeded = count(JobStatus::Succeeded);
        let failed_permanent = count(JobStatus::FailedPermanent);
        let finished = succeeded + failed_permanent;
        let ratio = |n: usize, of: usize| if of == 0 { 0.0 } else { n as f64 / of as f64 };

        Self {
            run_id: run_id.to_string(),
            total: jobs.len(),
            pending: count(JobStatus::Pending),
            in_progress: count(JobStatus::InProgress),
            succeeded,
            partial: jobs
                .iter()
                .filter(|j| j.status == JobStatus::Succeeded && j.partial)
                .count(),
            failed_retryable: count(JobStatus::FailedRetryable),
            failed_permanent,
            progress_rate: ratio(finished, jobs.len()),
            success_rate: ratio(succeeded, finished),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.succeeded + self.failed_permanent == self.total
    }
}
