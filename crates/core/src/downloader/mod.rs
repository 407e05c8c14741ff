//! Resumable bulk downloads.
//!
//! A run splits its symbols into jobs of `batch_size` and drives each job
//! through fetch, processing, quality checks and caching. Every state
//! change is written to the [`JobStore`] before the next one, so a crashed
//! or aborted run picks up where it stopped via [`Downloader::resume`].
//!
//! ```text
//! run ──► jobs (pending) ──► worker pool (max_workers)
//!                               │
//!                               ├─► SourceManager   (failover, health)
//!                               ├─► DataProcessor   (normalise, fill)
//!                               ├─► QualityChecker  (exclude, score)
//!                               └─► CacheManager    (tiers, series rows)
//! ```

mod abort;
mod job;
mod store;
mod summary;

pub use abort::AbortSignal;
pub use job::{DownloadJob, JobStatus};
pub use store::{InMemoryJobStore, JobStore};
pub use summary::{JobFailure, RunStatus, RunSummary};

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::{stream, StreamExt};
use log::{debug, info, warn};
use uuid::Uuid;

use tickvault_market_data::{
    BackoffPolicy, DataProcessor, Expectation, MarketDataError, QualityChecker, QualityReport,
    RequestFingerprint, RetryDecision, SourceManager, Symbol, TimeSeriesRecord,
};

use crate::cache::{CacheManager, CachePayload};
use crate::config::DataConfig;
use crate::errors::{DatabaseError, Error, Result};

/// Settings the downloader takes from [`DataConfig`].
#[derive(Clone, Debug)]
pub struct DownloaderConfig {
    pub batch_size: usize,
    pub max_workers: usize,
    pub policy: BackoffPolicy,
    /// TTL for cached job results; `None` uses the cache default.
    pub cache_ttl: Option<Duration>,
}

impl DownloaderConfig {
    pub fn from_config(config: &DataConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_workers: config.max_workers,
            policy: config.backoff_policy(),
            cache_ttl: None,
        }
    }
}

/// How one job ended in this pass.
struct JobOutcome {
    job: DownloadJob,
    report: Option<QualityReport>,
    fatal: Option<MarketDataError>,
}

impl JobOutcome {
    fn finished(job: DownloadJob) -> Self {
        Self {
            job,
            report: None,
            fatal: None,
        }
    }
}

/// Data a successful attempt produced.
struct Attempt {
    source: String,
    records: Vec<TimeSeriesRecord>,
    missing: Vec<Symbol>,
    report: QualityReport,
}

pub struct Downloader {
    sources: Arc<SourceManager>,
    cache: Arc<CacheManager>,
    jobs: Arc<dyn JobStore>,
    processor: DataProcessor,
    checker: QualityChecker,
    config: DownloaderConfig,
    abort: AbortSignal,
}

impl Downloader {
    pub fn new(
        sources: Arc<SourceManager>,
        cache: Arc<CacheManager>,
        jobs: Arc<dyn JobStore>,
        config: &DataConfig,
    ) -> Self {
        Self::with_parts(
            sources,
            cache,
            jobs,
            DataProcessor::new(config.processor_config()),
            QualityChecker::with_config(
                config.quality_thresholds.clone(),
                config.quality_weights.clone(),
            ),
            DownloaderConfig::from_config(config),
        )
    }

    pub fn with_parts(
        sources: Arc<SourceManager>,
        cache: Arc<CacheManager>,
        jobs: Arc<dyn JobStore>,
        processor: DataProcessor,
        checker: QualityChecker,
        config: DownloaderConfig,
    ) -> Self {
        Self {
            sources,
            cache,
            jobs,
            processor,
            checker,
            config,
            abort: AbortSignal::new(),
        }
    }

    /// Handle that stops dispatching new jobs and cuts backoff sleeps short.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn job_store(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    /// Start a new run over `symbols` between `start` and `end` inclusive.
    pub async fn run(
        &self,
        symbols: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RunSummary> {
        if start > end {
            return Err(MarketDataError::Validation {
                message: format!("start {} is after end {}", start, end),
            }
            .into());
        }

        let mut seen = HashSet::new();
        let symbols: Vec<Symbol> = symbols
            .iter()
            .filter(|s| !s.is_empty() && seen.insert((*s).clone()))
            .cloned()
            .collect();

        let run_id = Uuid::now_v7().to_string();
        let jobs: Vec<DownloadJob> = symbols
            .chunks(self.config.batch_size.max(1))
            .map(|chunk| DownloadJob::new(run_id.clone(), chunk.to_vec(), start, end))
            .collect();

        self.jobs.upsert_jobs(&jobs).await?;
        info!(
            "Run {}: {} symbols in {} jobs ({} to {})",
            run_id,
            symbols.len(),
            jobs.len(),
            start,
            end
        );

        self.execute(&run_id, jobs).await
    }

    /// Continue a run from its stored job states. Finished jobs are skipped.
    pub async fn resume(&self, run_id: &str) -> Result<RunSummary> {
        let jobs = self.load_run(run_id)?;
        info!("Resuming run {} ({} jobs)", run_id, jobs.len());
        self.execute(run_id, jobs).await
    }

    /// Put permanently failed jobs back to pending with a fresh retry budget,
    /// then resume the run.
    pub async fn retry_failed(&self, run_id: &str) -> Result<RunSummary> {
        let mut jobs = self.load_run(run_id)?;
        let mut requeued = Vec::new();

        for job in jobs.iter_mut().filter(|j| j.status == JobStatus::FailedPermanent) {
            job.requeue()?;
            job.attempt_count = 0;
            requeued.push(job.clone());
        }

        if !requeued.is_empty() {
            self.jobs.upsert_jobs(&requeued).await?;
        }
        info!("Run {}: retrying {} failed jobs", run_id, requeued.len());
        self.execute(run_id, jobs).await
    }

    pub fn run_status(&self, run_id: &str) -> Result<RunStatus> {
        let jobs = self.load_run(run_id)?;
        Ok(RunStatus::from_jobs(run_id, &jobs))
    }

    fn load_run(&self, run_id: &str) -> Result<Vec<DownloadJob>> {
        let jobs = self.jobs.list_jobs(run_id)?;
        if jobs.is_empty() {
            return Err(DatabaseError::NotFound(format!("run {}", run_id)).into());
        }
        Ok(jobs)
    }

    async fn execute(&self, run_id: &str, jobs: Vec<DownloadJob>) -> Result<RunSummary> {
        let total = jobs.len();
        let mut runnable = Vec::new();
        let mut skipped = 0;

        for mut job in jobs {
            match job.status {
                JobStatus::Succeeded | JobStatus::FailedPermanent => skipped += 1,
                JobStatus::Pending => runnable.push(job),
                JobStatus::InProgress | JobStatus::FailedRetryable => {
                    if job.is_resumable(self.config.policy.max_retries) {
                        // Interrupted mid-attempt or mid-backoff.
                        job.requeue()?;
                        self.jobs.upsert_job(&job).await?;
                        runnable.push(job);
                    } else {
                        job.fail_permanent(
                            job.last_error.clone().unwrap_or_else(|| "retries exhausted".to_string()),
                        )?;
                        self.jobs.upsert_job(&job).await?;
                        skipped += 1;
                    }
                }
            }
        }

        debug!("Run {}: {} runnable, {} already finished", run_id, runnable.len(), skipped);

        let halted = AtomicBool::new(false);
        let halted = &halted;
        let outcomes: Vec<Result<JobOutcome>> = stream::iter(runnable)
            .map(|job| async move {
                if halted.load(Ordering::SeqCst) || self.abort.is_aborted() {
                    return Ok(JobOutcome::finished(job));
                }
                let outcome = self.execute_job(job).await;
                if matches!(&outcome, Ok(o) if o.fatal.is_some()) {
                    halted.store(true, Ordering::SeqCst);
                }
                outcome
            })
            .buffer_unordered(self.config.max_workers.max(1))
            .collect()
            .await;

        let mut summary = RunSummary::new(run_id, total, skipped);
        let mut fatal = None;
        let mut store_error = None;

        for outcome in outcomes {
            match outcome {
                Ok(outcome) => {
                    summary.record(&outcome.job);
                    if let Some(report) = &outcome.report {
                        summary.add_quality(report);
                    }
                    if fatal.is_none() {
                        fatal = outcome.fatal;
                    }
                }
                Err(e) => {
                    warn!("Run {}: job bookkeeping failed: {}", run_id, e);
                    store_error.get_or_insert(e);
                }
            }
        }

        summary.aborted = self.abort.is_aborted();
        summary.finish();

        info!(
            "Run {} finished: {} succeeded, {} partial, {} failed, {} skipped, {} unfinished, quality {:.1}",
            run_id,
            summary.succeeded,
            summary.partial,
            summary.failed_permanent,
            summary.skipped,
            summary.unfinished,
            summary.quality.score
        );

        if let Some(e) = store_error {
            return Err(e);
        }
        if let Some(e) = fatal {
            return Err(e.into());
        }
        if summary.is_total_failure() {
            return Err(Error::RunFailed {
                run_id: run_id.to_string(),
                summary: Box::new(summary),
            });
        }
        Ok(summary)
    }

    async fn execute_job(&self, mut job: DownloadJob) -> Result<JobOutcome> {
        loop {
            job.claim()?;
            self.jobs.upsert_job(&job).await?;

            let err = match self.attempt(&job).await {
                Ok(done) => {
                    job.source = Some(done.source);
                    job.quality_score = Some(done.report.score);
                    let partial = done.report.records_excluded > 0;
                    job.succeed(done.records.len(), done.missing, partial)?;
                    self.jobs.upsert_job(&job).await?;
                    debug!("Job {} succeeded (partial: {})", job.job_key, job.partial);
                    return Ok(JobOutcome {
                        job,
                        report: Some(done.report),
                        fatal: None,
                    });
                }
                Err(err) => err,
            };

            match self.config.policy.decide(&err, job.attempt_count) {
                RetryDecision::Abort => {
                    warn!("Job {} hit a fatal error, stopping run: {}", job.job_key, err);
                    job.fail_permanent(err.to_string())?;
                    self.jobs.upsert_job(&job).await?;
                    return Ok(JobOutcome {
                        job,
                        report: None,
                        fatal: Some(err),
                    });
                }
                RetryDecision::GiveUp => {
                    if matches!(err, MarketDataError::NotFound { .. }) {
                        info!("Job {}: no data at any source", job.job_key);
                        let missing = job.symbols.clone();
                        job.succeed(0, missing, true)?;
                    } else {
                        warn!(
                            "Job {} failed permanently after {} attempts: {}",
                            job.job_key, job.attempt_count, err
                        );
                        job.fail_permanent(err.to_string())?;
                    }
                    self.jobs.upsert_job(&job).await?;
                    return Ok(JobOutcome::finished(job));
                }
                RetryDecision::RetryAfter(delay) => {
                    debug!(
                        "Job {} attempt {} failed, retrying in {:?}: {}",
                        job.job_key, job.attempt_count, delay, err
                    );
                    job.fail_retryable(err.to_string())?;
                    self.jobs.upsert_job(&job).await?;

                    if self.abort.sleep_or_abort(delay).await {
                        return Ok(JobOutcome::finished(job));
                    }
                    job.requeue()?;
                }
            }
        }
    }

    async fn attempt(&self, job: &DownloadJob) -> std::result::Result<Attempt, MarketDataError> {
        let fetched = self
            .sources
            .fetch_price_series(&job.symbols, job.start, job.end, None)
            .await?;

        let processed = self.processor.process(fetched.data);
        let expectation = Expectation::new(job.symbols.clone(), job.start, job.end);
        let checked = self.checker.check(&job.job_key, processed.records, &expectation);

        if checked.records.is_empty() && checked.report.records_excluded > 0 {
            warn!(
                "Job {}: all {} records failed consistency checks",
                job.job_key, checked.report.records_excluded
            );
        }

        let mut missing = processed.missing;
        for symbol in &job.symbols {
            let present = checked.records.iter().any(|r| &r.symbol == symbol);
            if !present && !missing.contains(symbol) {
                missing.push(symbol.clone());
            }
        }
        missing.sort();

        if !checked.records.is_empty() {
            let fingerprint = RequestFingerprint::for_price_series(&job.symbols, job.start, job.end);
            self.cache
                .put(
                    &fingerprint,
                    CachePayload::Prices(checked.records.clone()),
                    self.config.cache_ttl,
                )
                .await;
        }

        Ok(Attempt {
            source: fetched.source,
            records: checked.records,
            missing,
            report: checked.report,
        })
    }
}
