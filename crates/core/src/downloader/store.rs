//! Job progress storage.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::job::DownloadJob;
use crate::errors::{DatabaseError, Result};

/// Persistence for download jobs, keyed by (run id, job key).
///
/// A resumed run is rebuilt from this store alone, so every state
/// transition is written through `upsert_job` before the next one starts.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert or replace a job.
    async fn upsert_job(&self, job: &DownloadJob) -> Result<()>;

    /// Insert or replace many jobs in one write.
    async fn upsert_jobs(&self, jobs: &[DownloadJob]) -> Result<()>;

    fn get_job(&self, run_id: &str, job_key: &str) -> Result<Option<DownloadJob>>;

    /// Jobs of a run ordered by job key.
    fn list_jobs(&self, run_id: &str) -> Result<Vec<DownloadJob>>;

    fn list_runs(&self) -> Result<Vec<String>>;

    async fn delete_run(&self, run_id: &str) -> Result<usize>;
}

/// Process-local [`JobStore`]; progress is lost with the process.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<BTreeMap<(String, String), DownloadJob>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned<T>(_: T) -> crate::errors::Error {
    DatabaseError::Internal("job store lock poisoned".to_string()).into()
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn upsert_job(&self, job: &DownloadJob) -> Result<()> {
        self.jobs
            .write()
            .map_err(poisoned)?
            .insert((job.run_id.clone(), job.job_key.clone()), job.clone());
        Ok(())
    }

    async fn upsert_jobs(&self, jobs: &[DownloadJob]) -> Result<()> {
        let mut stored = self.jobs.write().map_err(poisoned)?;
        for job in jobs {
            stored.insert((job.run_id.clone(), job.job_key.clone()), job.clone());
        }
        Ok(())
    }

    fn get_job(&self, run_id: &str, job_key: &str) -> Result<Option<DownloadJob>> {
        Ok(self
            .jobs
            .read()
            .map_err(poisoned)?
            .get(&(run_id.to_string(), job_key.to_string()))
            .cloned())
    }

    fn list_jobs(&self, run_id: &str) -> Result<Vec<DownloadJob>> {
        Ok(self
            .jobs
            .read()
            .map_err(poisoned)?
            .iter()
            .filter(|((run, _), _)| run == run_id)
            .map(|(_, job)| job.clone())
            .collect())
    }

    fn list_runs(&self) -> Result<Vec<String>> {
        let jobs = self.jobs.read().map_err(poisoned)?;
        let mut runs: Vec<String> = jobs.keys().map(|(run, _)| run.clone()).collect();
        runs.dedup();
        Ok(runs)
    }

    async fn delete_run(&self, run_id: &str) -> Result<usize> {
        let mut jobs = self.jobs.write().map_err(poisoned)?;
        let before = jobs.len();
        jobs.retain(|(run, _), _| run != run_id);
        Ok(before - jobs.len())
    }
}
