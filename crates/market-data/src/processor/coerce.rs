//! Vendor value coercion.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate};
use lazy_static::lazy_static;
use serde_json::Value;

use crate::models::fields;

lazy_static! {
    /// Vendor column names (lower-cased) mapped onto canonical field names.
    static ref FIELD_ALIASES: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("vol", fields::VOLUME);
        m.insert("turnovervol", fields::VOLUME);
        m.insert("openprice", fields::OPEN);
        m.insert("highestprice", fields::HIGH);
        m.insert("lowestprice", fields::LOW);
        m.insert("closeprice", fields::CLOSE);
        m.insert("precloseprice", fields::PRE_CLOSE);
        m.insert("turnovervalue", fields::AMOUNT);
        m.insert("adjclose", fields::ADJ_CLOSE);
        m.insert("adj close", fields::ADJ_CLOSE);
        m
    };
}

const MISSING_MARKERS: &[&str] = &["", "nan", "--", "-", "none", "null", "n/a"];

/// Lower-case a vendor field name and resolve known aliases.
pub fn normalize_field_name(name: &str) -> String {
    let lowered = name.trim().to_ascii_lowercase();
    FIELD_ALIASES
        .get(lowered.as_str())
        .map(|canonical| canonical.to_string())
        .unwrap_or(lowered)
}

/// Parse a vendor number. Missing markers and non-finite values become `None`.
pub fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => {
            let trimmed = s.trim();
            if MISSING_MARKERS.contains(&trimmed.to_ascii_lowercase().as_str()) {
                return None;
            }
            trimmed
                .replace(',', "")
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
        }
        _ => None,
    }
}

/// Parse a vendor date: `YYYY-MM-DD`, `YYYYMMDD`, `YYYY/MM/DD`, RFC 3339,
/// or a unix timestamp in seconds or milliseconds.
pub fn coerce_date(value: &Value) -> Option<NaiveDate> {
    match value {
        Value::String(s) => parse_date_str(s.trim()),
        Value::Number(n) => n.as_i64().and_then(date_from_integer),
        _ => None,
    }
}

fn parse_date_str(s: &str) -> Option<NaiveDate> {
    if s.is_empty() {
        return None;
    }
    for format in ["%Y-%m-%d", "%Y%m%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return Some(date);
        }
    }
    if let Ok(datetime) = DateTime::parse_from_rfc3339(s) {
        return Some(datetime.date_naive());
    }
    // "2024-01-02 00:00:00" and similar
    if let Some((day, _)) = s.split_once(' ') {
        return NaiveDate::parse_from_str(day, "%Y-%m-%d").ok();
    }
    s.parse::<i64>().ok().and_then(date_from_integer)
}

fn date_from_integer(n: i64) -> Option<NaiveDate> {
    // Compact calendar dates like 20240102.
    if (19_000_101..=29_991_231).contains(&n) {
        let (y, md) = (n / 10_000, n % 10_000);
        return NaiveDate::from_ymd_opt(y as i32, (md / 100) as u32, (md % 100) as u32);
    }
    let seconds = if n.abs() >= 100_000_000_000 { n / 1000 } else { n };
    DateTime::from_timestamp(seconds, 0).map(|dt| dt.date_naive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_dates() {
        assert_eq!(coerce_date(&json!("2024-01-02")), Some(ymd(2024, 1, 2)));
        assert_eq!(coerce_date(&json!("20240102")), Some(ymd(2024, 1, 2)));
        assert_eq!(coerce_date(&json!("2024/01/02")), Some(ymd(2024, 1, 2)));
        assert_eq!(coerce_date(&json!("2024-01-02T15:00:00+00:00")), Some(ymd(2024, 1, 2)));
        assert_eq!(coerce_date(&json!("2024-01-02 00:00:00")), Some(ymd(2024, 1, 2)));
        assert_eq!(coerce_date(&json!(20240102)), Some(ymd(2024, 1, 2)));
        assert_eq!(coerce_date(&json!(1_704_153_600)), Some(ymd(2024, 1, 2)));
        assert_eq!(coerce_date(&json!(1_704_153_600_000i64)), Some(ymd(2024, 1, 2)));
        assert_eq!(coerce_date(&json!("yesterday")), None);
        assert_eq!(coerce_date(&json!(null)), None);
    }

    #[test]
    fn test_numbers() {
        assert_eq!(coerce_number(&json!(9.32)), Some(9.32));
        assert_eq!(coerce_number(&json!(1158000)), Some(1_158_000.0));
        assert_eq!(coerce_number(&json!(" 9.32 ")), Some(9.32));
        assert_eq!(coerce_number(&json!("1,158,000")), Some(1_158_000.0));
        assert_eq!(coerce_number(&json!("NaN")), None);
        assert_eq!(coerce_number(&json!("--")), None);
        assert_eq!(coerce_number(&json!("")), None);
        assert_eq!(coerce_number(&json!("None")), None);
        assert_eq!(coerce_number(&json!(null)), None);
        assert_eq!(coerce_number(&json!(true)), None);
    }

    #[test]
    fn test_field_names() {
        assert_eq!(normalize_field_name("vol"), "volume");
        assert_eq!(normalize_field_name("openPrice"), "open");
        assert_eq!(normalize_field_name("turnoverValue"), "amount");
        assert_eq!(normalize_field_name("Close"), "close");
        assert_eq!(normalize_field_name("pe_ttm"), "pe_ttm");
    }
}
