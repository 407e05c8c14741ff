//! Gap handling per field class.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::models::{fields, TimeSeriesRecord};

/// How missing values of one field class are treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FillPolicy {
    /// Carry the symbol's last known value forward.
    ForwardFill,
    /// Remove the record.
    Drop,
    /// Keep the record with the value marked missing.
    LeaveMissing,
}

/// Field classes a fill policy applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldClass {
    Price,
    Volume,
    Other,
}

impl FieldClass {
    pub fn of(field: &str) -> Self {
        match field {
            fields::OPEN
            | fields::HIGH
            | fields::LOW
            | fields::CLOSE
            | fields::PRE_CLOSE
            | fields::ADJ_CLOSE => FieldClass::Price,
            fields::VOLUME | fields::AMOUNT => FieldClass::Volume,
            _ => FieldClass::Other,
        }
    }
}

/// One explicit policy per field class.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillPolicies {
    pub price: FillPolicy,
    pub volume: FillPolicy,
    pub other: FillPolicy,
}

impl Default for FillPolicies {
    fn default() -> Self {
        Self {
            price: FillPolicy::ForwardFill,
            volume: FillPolicy::LeaveMissing,
            other: FillPolicy::LeaveMissing,
        }
    }
}

impl FillPolicies {
    pub fn for_field(&self, field: &str) -> FillPolicy {
        match FieldClass::of(field) {
            FieldClass::Price => self.price,
            FieldClass::Volume => self.volume,
            FieldClass::Other => self.other,
        }
    }
}

/// Counts produced by [`apply`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct FillCounts {
    pub filled: usize,
    pub dropped: usize,
}

/// Apply fill policies to one symbol's records, already sorted by date.
///
/// A value is missing when the field is absent from a record but present
/// in another record of the same symbol, or when it is present as `None`.
pub(crate) fn apply(
    records: Vec<TimeSeriesRecord>,
    policies: &FillPolicies,
) -> (Vec<TimeSeriesRecord>, FillCounts) {
    let names: BTreeSet<String> = records
        .iter()
        .flat_map(|r| r.fields.keys().cloned())
        .collect();

    let mut counts = FillCounts::default();
    let mut last_known: BTreeMap<String, f64> = BTreeMap::new();
    let mut kept = Vec::with_capacity(records.len());

    for mut record in records {
        let mut drop_record = false;

        for name in &names {
            match record.fields.get(name).copied().flatten() {
                Some(value) => {
                    last_known.insert(name.clone(), value);
                }
                None => match policies.for_field(name) {
                    FillPolicy::ForwardFill => {
                        let previous = last_known.get(name).copied();
                        if previous.is_some() {
                            counts.filled += 1;
                        }
                        record.fields.insert(name.clone(), previous);
                    }
                    FillPolicy::Drop => drop_record = true,
                    FillPolicy::LeaveMissing => {
                        record.fields.insert(name.clone(), None);
                    }
                },
            }
        }

        if drop_record {
            counts.dropped += 1;
        } else {
            kept.push(record);
        }
    }

    (kept, counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn series() -> Vec<TimeSeriesRecord> {
        vec![
            TimeSeriesRecord::new("AAA", day(2), "TEST")
                .with_field("close", Some(10.0))
                .with_field("volume", Some(100.0)),
            TimeSeriesRecord::new("AAA", day(3), "TEST")
                .with_field("close", None)
                .with_field("volume", Some(120.0)),
            TimeSeriesRecord::new("AAA", day(4), "TEST").with_field("close", Some(11.0)),
        ]
    }

    #[test]
    fn test_field_classes() {
        assert_eq!(FieldClass::of("close"), FieldClass::Price);
        assert_eq!(FieldClass::of("pre_close"), FieldClass::Price);
        assert_eq!(FieldClass::of("amount"), FieldClass::Volume);
        assert_eq!(FieldClass::of("pe_ttm"), FieldClass::Other);
    }

    #[test]
    fn test_forward_fill_prices() {
        let (records, counts) = apply(series(), &FillPolicies::default());

        assert_eq!(records.len(), 3);
        assert_eq!(records[1].close(), Some(10.0));
        assert_eq!(counts.filled, 1);
        // Volume is left missing but the key is present.
        assert_eq!(records[2].fields.get("volume"), Some(&None));
    }

    #[test]
    fn test_drop_policy_removes_records() {
        let policies = FillPolicies {
            price: FillPolicy::Drop,
            volume: FillPolicy::Drop,
            other: FillPolicy::LeaveMissing,
        };
        let (records, counts) = apply(series(), &policies);

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].date, day(2));
        assert_eq!(counts.dropped, 2);
    }

    #[test]
    fn test_forward_fill_without_history_stays_missing() {
        let records = vec![
            TimeSeriesRecord::new("AAA", day(2), "TEST").with_field("close", None),
            TimeSeriesRecord::new("AAA", day(3), "TEST").with_field("close", Some(9.0)),
        ];
        let (records, counts) = apply(records, &FillPolicies::default());

        assert_eq!(records[0].close(), None);
        assert_eq!(counts.filled, 0);
    }

    #[test]
    fn test_policies_deserialize_camel_case() {
        let policies: FillPolicies =
            serde_json::from_str(r#"{"price":"forwardFill","volume":"drop","other":"leaveMissing"}"#)
                .unwrap();
        assert_eq!(policies.volume, FillPolicy::Drop);
    }
}
