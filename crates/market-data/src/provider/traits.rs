//! Data provider trait definition.

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::errors::MarketDataError;
use crate::models::{RawBatch, ReferenceKind, ReferenceRecord, Symbol};

use super::capabilities::{ProviderCapabilities, RateLimit};

/// Trait for market data providers.
///
/// Implement this trait to add a new vendor. Adapters translate the
/// vendor's payloads into [`RawBatch`] rows and its failures into the
/// [`MarketDataError`] classes; they hold no state beyond their HTTP client.
///
/// Each call makes exactly one upstream request. The source manager splits
/// symbol lists so that no call exceeds `max_symbols_per_call`.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use tickvault_market_data::provider::{DataProvider, ProviderCapabilities};
///
/// struct MyProvider {
///     token: String,
/// }
///
/// #[async_trait]
/// impl DataProvider for MyProvider {
///     fn id(&self) -> &'static str {
///         "MY_PROVIDER"
///     }
///
///     fn capabilities(&self) -> ProviderCapabilities {
///         ProviderCapabilities {
///             supports_price_series: true,
///             supports_symbol_list: false,
///             reference_kinds: &[],
///             max_symbols_per_call: 1,
///         }
///     }
///
///     // ... implement fetch_price_series
/// }
/// ```
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Unique identifier, e.g. "TUSHARE". Used for priority configuration,
    /// health tracking and logging.
    fn id(&self) -> &'static str;

    /// Provider priority for ordering when no explicit priority is configured.
    ///
    /// Lower values = higher priority. Default is 10.
    fn priority(&self) -> u8 {
        10
    }

    fn capabilities(&self) -> ProviderCapabilities;

    fn rate_limit(&self) -> RateLimit {
        RateLimit::default()
    }

    /// Largest symbol group one reference call of `kind` accepts.
    fn max_reference_symbols_per_call(&self, kind: ReferenceKind) -> usize {
        let _ = kind;
        self.capabilities().max_symbols_per_call
    }

    /// List the symbols this provider can serve.
    async fn list_symbols(&self) -> Result<Vec<Symbol>, MarketDataError> {
        Err(MarketDataError::NotSupported {
            operation: "list_symbols".to_string(),
            provider: self.id().to_string(),
        })
    }

    /// Fetch daily rows for `symbols` between `start` and `end` (inclusive).
    ///
    /// Symbols the provider has no data for are reported in
    /// [`RawBatch::missing`]. When none of the symbols exist the call fails
    /// with [`MarketDataError::NotFound`].
    async fn fetch_price_series(
        &self,
        symbols: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawBatch, MarketDataError>;

    /// Fetch reference data of the given kind.
    async fn fetch_reference_data(
        &self,
        symbols: &[Symbol],
        kind: ReferenceKind,
    ) -> Result<Vec<ReferenceRecord>, MarketDataError> {
        let _ = symbols;
        Err(MarketDataError::NotSupported {
            operation: format!("reference:{}", kind),
            provider: self.id().to_string(),
        })
    }
}
