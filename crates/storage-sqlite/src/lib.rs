//! SQLite storage implementation for tickvault.
//!
//! This crate implements the store traits defined in `tickvault-core` with
//! Diesel on SQLite:
//! - connection pooling (`r2d2`) and embedded migrations
//! - a single writer actor running each write in an immediate transaction
//! - [`SqliteJobStore`]: download progress in `download_jobs`
//! - [`SqliteSeriesStore`]: the structured cache tier in `cache_entries`
//!   and `series_rows`
//!
//! ```text
//!   core (cache, downloader)
//!            │  SeriesStore / JobStore
//!            ▼
//!   storage-sqlite (this crate)
//!            │
//!            ▼
//!        SQLite DB
//! ```

pub mod db;
pub mod errors;
pub mod jobs;
pub mod schema;
pub mod series;

// Re-export database utilities
pub use db::{
    create_pool, get_connection, get_db_path, run_migrations, spawn_writer, Database,
    DbConnection, DbPool, WriteHandle,
};

// Re-export storage errors and conversion helpers
pub use errors::{IntoCore, StorageError};

pub use jobs::SqliteJobStore;
pub use series::SqliteSeriesStore;

// Re-export from tickvault-core for convenience
pub use tickvault_core::errors::{DatabaseError, Error, Result};
