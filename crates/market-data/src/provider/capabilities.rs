//! Provider capabilities and rate limiting configuration.

use std::time::Duration;

use crate::models::ReferenceKind;

/// Describes what a data provider can do.
///
/// Used by the source manager to skip providers that cannot serve a
/// request without counting it against their health.
#[derive(Clone, Debug)]
pub struct ProviderCapabilities {
    /// Whether the provider serves daily price series.
    pub supports_price_series: bool,

    /// Whether the provider can list tradable symbols.
    pub supports_symbol_list: bool,

    /// Reference data kinds this provider serves.
    pub reference_kinds: &'static [ReferenceKind],

    /// Largest symbol group a single call accepts.
    pub max_symbols_per_call: usize,
}

impl ProviderCapabilities {
    pub fn supports_reference(&self, kind: ReferenceKind) -> bool {
        self.reference_kinds.contains(&kind)
    }
}

/// Rate limiting hints declared by a provider.
///
/// The source manager spaces calls by the larger of this interval and the
/// configured global interval.
#[derive(Clone, Debug)]
pub struct RateLimit {
    /// Minimum delay between two calls to this provider.
    pub min_interval: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(100),
        }
    }
}
