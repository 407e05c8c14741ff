//! Data models for market data acquisition.

mod fingerprint;
mod reference;
mod series;

pub use fingerprint::{RequestFingerprint, OP_PRICE_SERIES, OP_REFERENCE, OP_SYMBOL_LIST};
pub use reference::{ReferenceKind, ReferenceRecord};
pub use series::{fields, join_symbols, RawBatch, RawRecord, Symbol, TimeSeriesRecord};

use std::borrow::Cow;

/// Source identifier (e.g., "TUSHARE", "UQER", "YAHOO").
pub type SourceId = Cow<'static, str>;
