//! Storage-specific error types for SQLite operations.
//!
//! Errors from Diesel, the connection pool and row decoding are wrapped
//! here and converted to the database-agnostic types of `tickvault_core`
//! before they leave the crate.

use diesel::result::Error as DieselError;
use thiserror::Error;
use tickvault_core::errors::{DatabaseError, Error};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database connection failed: {0}")]
    ConnectionFailed(#[from] diesel::ConnectionError),

    #[error("Connection pool error: {0}")]
    PoolError(#[from] r2d2::Error),

    #[error("Query execution failed: {0}")]
    QueryFailed(#[from] DieselError),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),

    #[error("Core error: {0}")]
    CoreError(String),
}

/// Convert core Error to StorageError (for the write actor's transaction wrapper)
impl From<Error> for StorageError {
    fn from(err: Error) -> Self {
        StorageError::CoreError(err.to_string())
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::ConnectionFailed(e) => {
                Error::Database(DatabaseError::ConnectionFailed(e.to_string()))
            }
            StorageError::PoolError(e) => {
                Error::Database(DatabaseError::ConnectionFailed(e.to_string()))
            }
            StorageError::QueryFailed(DieselError::NotFound) => {
                Error::Database(DatabaseError::NotFound("Record not found".to_string()))
            }
            StorageError::QueryFailed(e) => Error::Database(DatabaseError::QueryFailed(e.to_string())),
            StorageError::MigrationFailed(e) => Error::Database(DatabaseError::SchemaFailed(e)),
            StorageError::SerializationError(e) => {
                Error::Database(DatabaseError::Internal(e.to_string()))
            }
            StorageError::InvalidValue(e) => Error::Database(DatabaseError::Internal(e)),
            StorageError::CoreError(e) => Error::Database(DatabaseError::Internal(e)),
        }
    }
}

/// Extension trait for converting storage-layer Results to core Results.
///
/// Provides `.into_core()` on any `Result` whose error converts into
/// [`StorageError`].
pub trait IntoCore<T> {
    fn into_core(self) -> tickvault_core::Result<T>;
}

impl<T, E> IntoCore<T> for std::result::Result<T, E>
where
    E: Into<StorageError>,
{
    fn into_core(self) -> tickvault_core::Result<T> {
        self.map_err(|e| Error::from(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_rows_maps_to_not_found() {
        let result: std::result::Result<(), DieselError> = Err(DieselError::NotFound);
        assert!(matches!(
            result.into_core(),
            Err(Error::Database(DatabaseError::NotFound(_)))
        ));
    }

    #[test]
    fn test_migration_errors_keep_their_class() {
        let err: Error = StorageError::MigrationFailed("bad version".to_string()).into();
        assert!(matches!(err, Error::Database(DatabaseError::SchemaFailed(_))));
    }
}
