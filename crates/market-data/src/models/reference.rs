use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Symbol;

/// Categories of non-time-series data a provider may serve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    /// Listing and company information.
    Profile,
    /// Periodic financial indicators.
    Financials,
    /// Constituents and weights of an index.
    IndexComponents,
    /// Exchange trading days.
    TradingCalendar,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Financials => "financials",
            Self::IndexComponents => "index_components",
            Self::TradingCalendar => "trading_calendar",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "profile" => Ok(Self::Profile),
            "financials" => Ok(Self::Financials),
            "index_components" => Ok(Self::IndexComponents),
            "trading_calendar" => Ok(Self::TradingCalendar),
            other => Err(format!("unknown reference kind: {}", other)),
        }
    }
}

/// One reference row: a loose attribute map keyed by the vendor's field names.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    pub symbol: Symbol,
    pub kind: ReferenceKind,
    pub attributes: BTreeMap<String, Value>,
    pub source: String,
}
