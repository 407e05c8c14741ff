//! Error types and retry classification for the market data crate.
//!
//! This module provides:
//! - [`MarketDataError`]: The main error enum for all provider and source operations
//! - [`RetryClass`]: Classification for determining failover and retry behavior
//! - [`BackoffPolicy`]: The retry policy shared by the source manager and the downloader

mod retry;

pub use retry::{BackoffPolicy, Failover, RetryClass, RetryDecision};

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during market data operations.
///
/// Adapters never surface vendor-specific errors. Every failure is mapped
/// onto one of these classes, and each class maps onto a [`RetryClass`].
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// Credentials were rejected. Fatal for the whole run.
    #[error("Authentication failed: {provider} - {message}")]
    Auth {
        /// The provider that rejected the credentials
        provider: String,
        /// The message returned by the provider
        message: String,
    },

    /// The provider throttled the request (HTTP 429 or a vendor quota code).
    #[error("Rate limited: {provider}")]
    RateLimited {
        /// The provider that rate limited the request
        provider: String,
        /// Delay suggested by the provider, if any
        retry_after: Option<Duration>,
    },

    /// Network failure, 5xx, or a vendor-side hiccup.
    #[error("Transient failure: {provider} - {message}")]
    Transient {
        /// The provider that failed
        provider: String,
        /// Description of the failure
        message: String,
    },

    /// The provider call exceeded the per-call timeout.
    #[error("Timeout: {provider}")]
    Timeout {
        /// The provider that timed out
        provider: String,
    },

    /// The requested item does not exist at the provider.
    /// Terminal for the item only.
    #[error("Not found: {symbol} ({provider})")]
    NotFound {
        /// The provider that reported the item missing
        provider: String,
        /// The symbol or symbol group that was requested
        symbol: String,
    },

    /// The provider cannot serve this kind of request.
    #[error("Operation '{operation}' not supported by {provider}")]
    NotSupported {
        /// Name of the unsupported operation
        operation: String,
        /// The provider that does not support it
        provider: String,
    },

    /// Data failed hard validation.
    #[error("Validation failed: {message}")]
    Validation {
        /// Description of the validation failure
        message: String,
    },

    /// The provider answered with a payload we could not decode.
    #[error("Failed to parse {provider} response: {message}")]
    Parse {
        /// The provider that sent the payload
        provider: String,
        /// Decoder error
        message: String,
    },

    /// Every configured source was skipped (cooling down) before any call was made.
    #[error("No sources available")]
    NoSourcesAvailable,

    /// Every eligible source was attempted and at least one failed with a
    /// retryable error.
    #[error("All sources failed: {summary}")]
    AllSourcesFailed {
        /// Per-source attempt summary
        summary: String,
        /// Whether any of the failures was a rate limit
        rate_limited: bool,
    },

    /// A network error occurred while communicating with a provider.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl MarketDataError {
    /// Returns the retry classification for this error.
    ///
    /// # Examples
    ///
    /// ```
    /// use tickvault_market_data::errors::{MarketDataError, RetryClass};
    ///
    /// let error = MarketDataError::RateLimited { provider: "TUSHARE".to_string(), retry_after: None };
    /// assert_eq!(error.retry_class(), RetryClass::FailoverWithPenalty);
    ///
    /// let error = MarketDataError::Auth { provider: "UQER".to_string(), message: "bad token".to_string() };
    /// assert_eq!(error.retry_class(), RetryClass::Fatal);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Auth { .. } => RetryClass::Fatal,

            Self::NotFound { .. } | Self::Validation { .. } => RetryClass::Terminal,

            Self::RateLimited { .. }
            | Self::Transient { .. }
            | Self::Timeout { .. }
            | Self::Network(_)
            | Self::NoSourcesAvailable
            | Self::AllSourcesFailed { .. } => RetryClass::FailoverWithPenalty,

            Self::NotSupported { .. } | Self::Parse { .. } => RetryClass::NextProvider,
        }
    }

    /// Whether the error was caused by provider throttling.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::AllSourcesFailed { rate_limited, .. } => *rate_limited,
            _ => false,
        }
    }

    /// Provider-suggested delay, if one was sent.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
