//! Tickvault Core - caching, resumable downloads and the consumer API.
//!
//! This crate sits on top of `tickvault-market-data`. It is storage-agnostic
//! and defines the store traits that the `storage-sqlite` crate implements;
//! in-memory implementations ship here for tests and ephemeral setups.

pub mod cache;
pub mod config;
pub mod context;
pub mod downloader;
pub mod errors;
pub mod telemetry;

pub use cache::{CacheManager, CachePayload, CacheSettings, CacheStatsSnapshot, SeriesStore};
pub use config::DataConfig;
pub use context::{DataContext, DataContextBuilder};
pub use downloader::{
    AbortSignal, DownloadJob, Downloader, DownloaderConfig, JobStatus, JobStore, RunStatus,
    RunSummary,
};

// Re-export error types
pub use errors::Error;
pub use errors::Result;
