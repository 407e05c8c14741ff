//! Core error types for tickvault.
//!
//! This module defines storage-agnostic error types. SQLite errors are
//! converted to these types by the storage crate.

use thiserror::Error;

use crate::downloader::RunSummary;
use tickvault_market_data::errors::MarketDataError;

/// Type alias for Result using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Root error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Market data operation failed: {0}")]
    MarketData(#[from] MarketDataError),

    #[error("Cache operation failed: {0}")]
    Cache(#[from] CacheError),

    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Failed to load configuration: {0}")]
    ConfigIO(String),

    #[error("Invalid configuration value: {0}")]
    InvalidConfigValue(String),

    /// Every job of a run failed permanently.
    #[error("Run {run_id} failed: {} jobs failed permanently", summary.failed_permanent)]
    RunFailed {
        run_id: String,
        summary: Box<RunSummary>,
    },

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    /// Credential failures stop a run and should reach the operator.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::MarketData(MarketDataError::Auth { .. }))
    }
}

/// Errors from the cache tiers.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Structured store failed: {0}")]
    Store(String),

    /// A disk entry could not be decoded; it is dropped from the tier.
    #[error("Corrupt cache entry {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("Cache entry {key} is {size} bytes, above the tier limit of {limit}")]
    EntryTooLarge { key: String, size: usize, limit: usize },
}

/// Storage-agnostic database errors.
///
/// Uses `String` for details so the storage crate can convert its own
/// errors into this format.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("Database query failed: {0}")]
    QueryFailed(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Schema setup failed: {0}")]
    SchemaFailed(String),

    #[error("Internal database error: {0}")]
    Internal(String),
}
