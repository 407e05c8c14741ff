use std::any::Any;

use diesel::SqliteConnection;
use log::debug;
use tokio::sync::{mpsc, oneshot};

use super::{get_connection, DbPool};
use crate::errors::StorageError;
use tickvault_core::errors::{DatabaseError, Error, Result};

// A write job runs against the actor's connection inside an open transaction.
type Job<T> = Box<dyn FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static>;

type ErasedReply = Result<Box<dyn Any + Send + 'static>>;

/// Handle for sending jobs to the writer actor.
#[derive(Clone)]
pub struct WriteHandle {
    #[allow(clippy::type_complexity)]
    tx: mpsc::Sender<(Job<Box<dyn Any + Send + 'static>>, oneshot::Sender<ErasedReply>)>,
}

impl WriteHandle {
    /// Run `job` on the writer connection inside an immediate transaction.
    ///
    /// The transaction commits when the job returns `Ok` and rolls back
    /// otherwise.
    pub async fn exec<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static + Any,
    {
        let (ret_tx, ret_rx) = oneshot::channel();

        self.tx
            .send((
                Box::new(move |c| job(c).map(|v| Box::new(v) as Box<dyn Any + Send>)),
                ret_tx,
            ))
            .await
            .map_err(|_| actor_stopped())?;

        let boxed = ret_rx.await.map_err(|_| actor_stopped())??;
        boxed
            .downcast::<T>()
            .map(|v| *v)
            .map_err(|_| Error::Database(DatabaseError::Internal("writer result type mismatch".to_string())))
    }
}

fn actor_stopped() -> Error {
    Error::Database(DatabaseError::ConnectionFailed(
        "SQLite writer actor has stopped".to_string(),
    ))
}

/// Spawn the single writer. It owns one pooled connection for its whole
/// life and runs jobs one at a time, each in its own immediate transaction.
pub fn spawn_writer(pool: &DbPool) -> Result<WriteHandle> {
    let mut conn = get_connection(pool)?;
    let (tx, mut rx) =
        mpsc::channel::<(Job<Box<dyn Any + Send + 'static>>, oneshot::Sender<ErasedReply>)>(1024);

    tokio::spawn(async move {
        while let Some((job, reply_tx)) = rx.recv().await {
            let result = run_in_transaction(&mut conn, job);
            if let Err(e) = &result {
                debug!("Write job rolled back: {}", e);
            }
            // The caller may have gone away; nothing to do then.
            let _ = reply_tx.send(result);
        }
        debug!("SQLite writer actor stopped");
    });

    Ok(WriteHandle { tx })
}

fn run_in_transaction(
    conn: &mut SqliteConnection,
    job: Job<Box<dyn Any + Send + 'static>>,
) -> ErasedReply {
    // The job's own error is handed back unchanged; only begin and commit
    // failures go through StorageError.
    let mut job_error = None;
    let result = conn.immediate_transaction::<_, StorageError, _>(|c| {
        job(c).map_err(|e| {
            let message = e.to_string();
            job_error = Some(e);
            StorageError::CoreError(message)
        })
    });
    result.map_err(|e| job_error.take().unwrap_or_else(|| e.into()))
}

#[cfg(test)]
mod tests {
    use crate::db::Database;
    use crate::errors::IntoCore;
    use crate::schema::series_rows;
    use diesel::prelude::*;
    use tickvault_core::errors::Error;

    #[tokio::test]
    async fn test_failed_job_rolls_back() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in(dir.path()).unwrap();

        let result: Result<(), Error> = db
            .writer()
            .exec(|conn| {
                diesel::insert_into(series_rows::table)
                    .values((
                        series_rows::symbol.eq("AAA"),
                        series_rows::date.eq("2024-01-02"),
                        series_rows::source.eq("UQER"),
                        series_rows::fields.eq("{}"),
                        series_rows::fetched_at.eq(0i64),
                    ))
                    .execute(conn)
                    .into_core()?;
                Err(Error::Unexpected("abort".to_string()))
            })
            .await;
        assert!(matches!(result, Err(Error::Unexpected(_))));

        let mut conn = db.connection().unwrap();
        let count: i64 = series_rows::table.count().get_result(&mut conn).unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_returns_job_value() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in(dir.path()).unwrap();

        let value = db.writer().exec(|_| Ok(42usize)).await.unwrap();
        assert_eq!(value, 42);
    }
}
