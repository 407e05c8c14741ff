//! Source orchestration.
//!
//! This module provides:
//! - Priority ordering and failover across providers
//! - Per-source health tracking with cool-down
//! - Minimum-interval call spacing shared by all workers
//! - Per-call diagnostics

mod diagnostics;
mod health;
mod manager;
mod rate_limiter;

pub use diagnostics::{FetchDiagnostics, SkipReason, SourceAttempt};
pub use health::{HealthConfig, HealthState, HealthTracker, ProviderHealth};
pub use manager::{Fetched, GroupOutcome, SourceManager, SourceManagerConfig};
pub use rate_limiter::RateLimiter;
