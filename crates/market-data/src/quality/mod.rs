//! Data quality checks.
//!
//! Validates processed batches before they are stored:
//! - Missing-rate against the expected (symbol, weekday) grid
//! - Z-score outliers per symbol and field
//! - OHLC/volume consistency (hard failures, records excluded)
//! - Gaps inside a symbol's series
//! - Extreme day-over-day close moves (informational)

mod checker;
mod report;

pub use checker::{Expectation, QualityChecker, QualityOutcome, QualityThresholds, QualityWeights};
pub use report::{IssueClass, QualityIssue, QualityReport, Severity};
