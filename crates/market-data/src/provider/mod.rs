//! Data provider abstractions and implementations.
//!
//! This module contains:
//! - The `DataProvider` trait that all adapters implement
//! - Provider capabilities and rate limiting hints
//! - Concrete adapters (Tushare, Uqer, Yahoo)
//!
//! Adapters only translate. Failover, health tracking, spacing and timeouts
//! live in the source manager.

mod capabilities;
pub(crate) mod http;
mod traits;

pub mod tushare;
pub mod uqer;
pub mod yahoo;

pub use capabilities::{ProviderCapabilities, RateLimit};
pub use traits::DataProvider;

use std::collections::HashSet;

use crate::models::{RawRecord, Symbol};

/// Requested symbols with no row in `records`, in request order.
pub(crate) fn missing_symbols(requested: &[Symbol], records: &[RawRecord]) -> Vec<Symbol> {
    let present: HashSet<&Symbol> = records.iter().map(|r| &r.symbol).collect();
    requested
        .iter()
        .filter(|s| !present.contains(s))
        .cloned()
        .collect()
}
