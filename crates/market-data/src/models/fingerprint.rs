//! Deterministic cache keys for data requests.
//!
//! A fingerprint is `"{operation}_{md5(canonical json of params)}"`. Object
//! keys are sorted before hashing and symbol lists are sorted and
//! de-duplicated, so two requests that ask for the same data always map to
//! the same key regardless of argument order.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::{ReferenceKind, Symbol};

pub const OP_PRICE_SERIES: &str = "price_series";
pub const OP_REFERENCE: &str = "reference";
pub const OP_SYMBOL_LIST: &str = "symbol_list";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestFingerprint(String);

impl RequestFingerprint {
    /// Fingerprint an arbitrary operation and parameter object.
    pub fn new(operation: &str, params: &Value) -> Self {
        let canonical = canonicalize(params).to_string();
        let digest = md5::compute(canonical.as_bytes());
        Self(format!("{}_{:x}", operation, digest))
    }

    pub fn for_price_series(symbols: &[Symbol], start: NaiveDate, end: NaiveDate) -> Self {
        Self::new(
            OP_PRICE_SERIES,
            &json!({
                "symbols": normalized_symbols(symbols),
                "start": start.format("%Y-%m-%d").to_string(),
                "end": end.format("%Y-%m-%d").to_string(),
            }),
        )
    }

    pub fn for_reference(symbols: &[Symbol], kind: ReferenceKind) -> Self {
        Self::new(
            OP_REFERENCE,
            &json!({
                "symbols": normalized_symbols(symbols),
                "kind": kind.as_str(),
            }),
        )
    }

    pub fn for_symbol_list() -> Self {
        Self::new(OP_SYMBOL_LIST, &json!({}))
    }

    /// Rebuild a fingerprint from a stored key.
    pub fn from_key(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The operation prefix of the key.
    pub fn operation(&self) -> &str {
        self.0
            .rsplit_once('_')
            .map(|(op, _)| op)
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for RequestFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn normalized_symbols(symbols: &[Symbol]) -> Vec<&str> {
    let mut list: Vec<&str> = symbols.iter().map(Symbol::as_str).collect();
    list.sort_unstable();
    list.dedup();
    list
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_key_shape() {
        let fp = RequestFingerprint::for_price_series(
            &[Symbol::new("000001.SZ")],
            date(2024, 1, 2),
            date(2024, 1, 31),
        );
        let (op, digest) = fp.as_str().rsplit_once('_').unwrap();
        assert_eq!(op, "price_series");
        assert_eq!(fp.operation(), "price_series");
        assert_eq!(digest.len(), 32);
    }

    #[test]
    fn test_param_order_does_not_matter() {
        let a = RequestFingerprint::new("daily", &json!({"a": 1, "b": {"y": 2, "x": 3}}));
        let b = RequestFingerprint::new("daily", &json!({"b": {"x": 3, "y": 2}, "a": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_ranges_differ() {
        let symbols = [Symbol::new("AAA")];
        let a = RequestFingerprint::for_price_series(&symbols, date(2024, 1, 1), date(2024, 1, 31));
        let b = RequestFingerprint::for_price_series(&symbols, date(2024, 1, 1), date(2024, 2, 1));
        assert_ne!(a, b);
    }

    #[test]
    fn test_reference_kind_is_part_of_key() {
        let symbols = [Symbol::new("AAA")];
        assert_ne!(
            RequestFingerprint::for_reference(&symbols, ReferenceKind::Profile),
            RequestFingerprint::for_reference(&symbols, ReferenceKind::Financials)
        );
    }

    proptest! {
        #[test]
        fn prop_symbol_order_and_duplicates_are_ignored(
            symbols in proptest::collection::vec("[A-Z]{1,4}", 1..8)
        ) {
            let forward: Vec<Symbol> = symbols.iter().map(Symbol::new).collect();
            let mut backward: Vec<Symbol> = symbols.iter().rev().map(Symbol::new).collect();
            backward.push(backward[0].clone());

            let start = date(2024, 3, 1);
            let end = date(2024, 3, 29);
            prop_assert_eq!(
                RequestFingerprint::for_price_series(&forward, start, end),
                RequestFingerprint::for_price_series(&backward, start, end)
            );
        }
    }
}
