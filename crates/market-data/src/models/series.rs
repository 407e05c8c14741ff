//! Time-series records before and after processing.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known field names shared by adapters, processor and quality checks.
pub mod fields {
    pub const OPEN: &str = "open";
    pub const HIGH: &str = "high";
    pub const LOW: &str = "low";
    pub const CLOSE: &str = "close";
    pub const VOLUME: &str = "volume";
    pub const AMOUNT: &str = "amount";
    pub const PRE_CLOSE: &str = "pre_close";
    pub const ADJ_CLOSE: &str = "adj_close";
    pub const PCT_CHANGE: &str = "pct_change";
}

/// Opaque instrument identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(Arc::from(value.as_ref().trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Joins symbols into the comma-separated form used for job keys and logs.
pub fn join_symbols(symbols: &[Symbol]) -> String {
    symbols
        .iter()
        .map(Symbol::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

/// One vendor row, exactly as the adapter received it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub symbol: Symbol,
    /// Date in whatever shape the vendor uses (string, number, timestamp).
    pub date: Value,
    pub fields: Map<String, Value>,
    pub fetched_at: DateTime<Utc>,
}

impl RawRecord {
    pub fn new(symbol: impl Into<Symbol>, date: Value, fields: Map<String, Value>) -> Self {
        Self {
            symbol: symbol.into(),
            date,
            fields,
            fetched_at: Utc::now(),
        }
    }
}

/// Rows returned by a single adapter call.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBatch {
    pub source: String,
    pub records: Vec<RawRecord>,
    /// Requested symbols the source had no data for.
    #[serde(default)]
    pub missing: Vec<Symbol>,
}

impl RawBatch {
    pub fn new(source: impl Into<String>, records: Vec<RawRecord>) -> Self {
        Self {
            source: source.into(),
            records,
            missing: Vec::new(),
        }
    }

    pub fn with_missing(mut self, missing: Vec<Symbol>) -> Self {
        self.missing = missing;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A coerced, de-duplicated observation for one symbol on one date.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesRecord {
    pub symbol: Symbol,
    pub date: NaiveDate,
    pub fields: BTreeMap<String, Option<f64>>,
    pub fetched_at: DateTime<Utc>,
    pub source: String,
}

impl TimeSeriesRecord {
    pub fn new(symbol: impl Into<Symbol>, date: NaiveDate, source: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            date,
            fields: BTreeMap::new(),
            fetched_at: Utc::now(),
            source: source.into(),
        }
    }

    pub fn with_field(mut self, name: &str, value: Option<f64>) -> Self {
        self.fields.insert(name.to_string(), value);
        self
    }

    /// Value of a field, `None` when absent or missing.
    pub fn get(&self, field: &str) -> Option<f64> {
        self.fields.get(field).copied().flatten()
    }

    pub fn open(&self) -> Option<f64> {
        self.get(fields::OPEN)
    }

    pub fn high(&self) -> Option<f64> {
        self.get(fields::HIGH)
    }

    pub fn low(&self) -> Option<f64> {
        self.get(fields::LOW)
    }

    pub fn close(&self) -> Option<f64> {
        self.get(fields::CLOSE)
    }

    pub fn volume(&self) -> Option<f64> {
        self.get(fields::VOLUME)
    }
}
