//! Tickvault Market Data Crate
//!
//! Provider-agnostic acquisition of time-series market data.
//!
//! # Overview
//!
//! The crate covers everything between a vendor API and a clean batch:
//! - Vendor adapters behind one trait (Tushare, Uqer, Yahoo Finance)
//! - A classified error taxonomy with one shared backoff policy
//! - Source orchestration with failover, health tracking and call spacing
//! - Post-fetch processing (coercion, de-duplication, fill policies)
//! - Quality checks producing a scored report
//!
//! # Architecture
//!
//! ```text
//! +------------------+
//! |  SourceManager   |  (priority order, failover, cool-down)
//! +------------------+
//!          |
//!          v
//! +------------------+
//! |  DataProvider    |  (Tushare, Uqer, Yahoo)
//! +------------------+
//!          |  RawBatch
//!          v
//! +------------------+
//! |  DataProcessor   |  (coercion, dedup, fill)
//! +------------------+
//!          |  TimeSeriesRecord
//!          v
//! +------------------+
//! |  QualityChecker  |  (QualityReport)
//! +------------------+
//! ```
//!
//! Caching and download jobs live in `tickvault-core`.

pub mod errors;
pub mod models;
pub mod processor;
pub mod provider;
pub mod quality;
pub mod source;

pub use errors::{BackoffPolicy, Failover, MarketDataError, RetryClass, RetryDecision};

pub use models::{
    fields, join_symbols, RawBatch, RawRecord, ReferenceKind, ReferenceRecord,
    RequestFingerprint, SourceId, Symbol, TimeSeriesRecord,
};

pub use provider::tushare::TushareProvider;
pub use provider::uqer::UqerProvider;
pub use provider::yahoo::YahooProvider;
pub use provider::{DataProvider, ProviderCapabilities, RateLimit};

pub use processor::{
    DataProcessor, FillPolicies, FillPolicy, ProcessedBatch, ProcessingStats, ProcessorConfig,
};

pub use quality::{
    Expectation, IssueClass, QualityChecker, QualityIssue, QualityOutcome, QualityReport,
    QualityThresholds, QualityWeights, Severity,
};

pub use source::{
    FetchDiagnostics, Fetched, GroupOutcome, HealthConfig, HealthState, HealthTracker,
    ProviderHealth, RateLimiter, SkipReason, SourceManager, SourceManagerConfig,
};
