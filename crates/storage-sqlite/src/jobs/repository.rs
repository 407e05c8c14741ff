use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;
use log::debug;

use super::model::JobRow;
use crate::db::{get_connection, Database, DbPool, WriteHandle};
use crate::errors::{IntoCore, StorageError};
use crate::schema::download_jobs::dsl as jobs_dsl;
use tickvault_core::downloader::{DownloadJob, JobStore};
use tickvault_core::errors::Result;

/// [`JobStore`] backed by the `download_jobs` table.
///
/// Reads go through the pool; every write goes through the writer actor.
pub struct SqliteJobStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SqliteJobStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    pub fn from_database(db: &Database) -> Self {
        Self::new(db.pool().clone(), db.writer().clone())
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn upsert_job(&self, job: &DownloadJob) -> Result<()> {
        let row = JobRow::try_from(job).into_core()?;
        self.writer
            .exec(move |conn| {
                diesel::replace_into(jobs_dsl::download_jobs)
                    .values(&row)
                    .execute(conn)
                    .into_core()?;
                Ok(())
            })
            .await
    }

    async fn upsert_jobs(&self, jobs: &[DownloadJob]) -> Result<()> {
        let rows = jobs
            .iter()
            .map(JobRow::try_from)
            .collect::<std::result::Result<Vec<_>, StorageError>>()
            .into_core()?;
        let count = rows.len();

        self.writer
            .exec(move |conn| {
                for chunk in rows.chunks(500) {
                    diesel::replace_into(jobs_dsl::download_jobs)
                        .values(chunk)
                        .execute(conn)
                        .into_core()?;
                }
                Ok(())
            })
            .await?;
        debug!("Upserted {} download jobs", count);
        Ok(())
    }

    fn get_job(&self, run_id: &str, job_key: &str) -> Result<Option<DownloadJob>> {
        let mut conn = get_connection(&self.pool)?;
        let row = jobs_dsl::download_jobs
            .filter(jobs_dsl::run_id.eq(run_id))
            .filter(jobs_dsl::job_key.eq(job_key))
            .select(JobRow::as_select())
            .first::<JobRow>(&mut conn)
            .optional()
            .into_core()?;

        row.map(|row| DownloadJob::try_from(row).into_core())
            .transpose()
    }

    fn list_jobs(&self, run_id: &str) -> Result<Vec<DownloadJob>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = jobs_dsl::download_jobs
            .filter(jobs_dsl::run_id.eq(run_id))
            .order(jobs_dsl::job_key.asc())
            .select(JobRow::as_select())
            .load::<JobRow>(&mut conn)
            .into_core()?;

        rows.into_iter()
            .map(|row| DownloadJob::try_from(row).into_core())
            .collect()
    }

    fn list_runs(&self) -> Result<Vec<String>> {
        let mut conn = get_connection(&self.pool)?;
        jobs_dsl::download_jobs
            .select(jobs_dsl::run_id)
            .distinct()
            .order(jobs_dsl::run_id.asc())
            .load::<String>(&mut conn)
            .into_core()
    }

    async fn delete_run(&self, run_id: &str) -> Result<usize> {
        let run_id = run_id.to_string();
        self.writer
            .exec(move |conn| {
                diesel::delete(jobs_dsl::download_jobs.filter(jobs_dsl::run_id.eq(run_id)))
                    .execute(conn)
                    .into_core()
            })
            .await
    }
}
