//! Values the cache holds.

use serde::{Deserialize, Serialize};

use tickvault_market_data::{ReferenceRecord, Symbol, TimeSeriesRecord};

use crate::errors::CacheError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum CachePayload {
    Prices(Vec<TimeSeriesRecord>),
    Reference(Vec<ReferenceRecord>),
    Symbols(Vec<Symbol>),
}

impl CachePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            CachePayload::Prices(_) => "prices",
            CachePayload::Reference(_) => "reference",
            CachePayload::Symbols(_) => "symbols",
        }
    }

    pub fn len(&self) -> usize {
        match self {
            CachePayload::Prices(records) => records.len(),
            CachePayload::Reference(records) => records.len(),
            CachePayload::Symbols(symbols) => symbols.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> Result<Vec<u8>, CacheError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, CacheError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn as_prices(&self) -> Option<&[TimeSeriesRecord]> {
        match self {
            CachePayload::Prices(records) => Some(records),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_tagged_json_shape() {
        let payload = CachePayload::Symbols(vec![Symbol::new("600000.SH")]);
        let json = String::from_utf8(payload.to_json().unwrap()).unwrap();
        assert_eq!(json, r#"{"kind":"symbols","data":["600000.SH"]}"#);
    }

    #[test]
    fn test_prices_survive_json() {
        let record = TimeSeriesRecord::new("AAA", NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(), "UQER")
            .with_field("close", Some(10.5))
            .with_field("volume", None);
        let payload = CachePayload::Prices(vec![record]);

        let decoded = CachePayload::from_json(&payload.to_json().unwrap()).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.as_prices().map(|r| r.len()), Some(1));
    }
}
