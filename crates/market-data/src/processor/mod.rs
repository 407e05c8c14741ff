//! Post-fetch processing of raw vendor rows.
//!
//! Every raw batch goes through the same deterministic steps:
//! - coerce dates and numbers, normalise field names
//! - collapse duplicate (symbol, date) rows, last fetch wins
//! - apply the fill policy of each field class
//! - derive `pct_change` from consecutive closes when enabled
//!
//! Output is sorted by (symbol, date).

mod coerce;
mod fill;

pub use coerce::{coerce_date, coerce_number, normalize_field_name};
pub use fill::{FieldClass, FillPolicies, FillPolicy};

use std::collections::BTreeMap;

use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::models::{fields, RawBatch, Symbol, TimeSeriesRecord};

/// Processor settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorConfig {
    #[serde(default)]
    pub fill: FillPolicies,
    #[serde(default)]
    pub derive_returns: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            fill: FillPolicies::default(),
            derive_returns: true,
        }
    }
}

/// What happened to the rows of one batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingStats {
    pub rows_in: usize,
    /// Rows whose symbol or date could not be coerced.
    pub rows_rejected: usize,
    pub duplicates_collapsed: usize,
    pub values_filled: usize,
    pub rows_dropped_by_fill: usize,
    pub rows_out: usize,
}

/// Result of processing one raw batch.
#[derive(Clone, Debug, Default)]
pub struct ProcessedBatch {
    pub source: String,
    pub records: Vec<TimeSeriesRecord>,
    /// Symbols the source reported as missing.
    pub missing: Vec<Symbol>,
    pub stats: ProcessingStats,
}

#[derive(Clone, Debug, Default)]
pub struct DataProcessor {
    config: ProcessorConfig,
}

impl DataProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn process(&self, batch: RawBatch) -> ProcessedBatch {
        let mut stats = ProcessingStats {
            rows_in: batch.records.len(),
            ..Default::default()
        };

        // (symbol, date) -> winning record; BTreeMap keeps the output order.
        let mut latest: BTreeMap<(Symbol, NaiveDate), TimeSeriesRecord> = BTreeMap::new();

        for raw in batch.records {
            let date = match coerce_date(&raw.date) {
                Some(date) if !raw.symbol.is_empty() => date,
                _ => {
                    debug!(
                        "Rejecting row from {}: symbol '{}', date {}",
                        batch.source, raw.symbol, raw.date
                    );
                    stats.rows_rejected += 1;
                    continue;
                }
            };

            let mut record = TimeSeriesRecord::new(raw.symbol.clone(), date, batch.source.clone());
            record.fetched_at = raw.fetched_at;
            for (name, value) in &raw.fields {
                record.fields.insert(normalize_field_name(name), coerce_number(value));
            }

            let key = (raw.symbol, date);
            match latest.get(&key) {
                // Later row wins on equal timestamps.
                Some(existing) if existing.fetched_at > record.fetched_at => {
                    stats.duplicates_collapsed += 1;
                }
                Some(_) => {
                    stats.duplicates_collapsed += 1;
                    latest.insert(key, record);
                }
                None => {
                    latest.insert(key, record);
                }
            }
        }

        let mut by_symbol: BTreeMap<Symbol, Vec<TimeSeriesRecord>> = BTreeMap::new();
        for ((symbol, _), record) in latest {
            by_symbol.entry(symbol).or_default().push(record);
        }

        let mut records = Vec::new();
        for (_, series) in by_symbol {
            let (mut series, counts) = fill::apply(series, &self.config.fill);
            stats.values_filled += counts.filled;
            stats.rows_dropped_by_fill += counts.dropped;

            if self.config.derive_returns {
                derive_pct_change(&mut series);
            }
            records.extend(series);
        }
        stats.rows_out = records.len();

        debug!(
            "Processed batch from {}: {} in, {} out, {} rejected, {} duplicates",
            batch.source, stats.rows_in, stats.rows_out, stats.rows_rejected, stats.duplicates_collapsed
        );

        ProcessedBatch {
            source: batch.source,
            records,
            missing: batch.missing,
            stats,
        }
    }
}

/// Fractional close-to-close change; the first record of a series has none.
fn derive_pct_change(series: &mut [TimeSeriesRecord]) {
    let mut previous_close: Option<f64> = None;
    for record in series.iter_mut() {
        let close = record.close();
        let change = match (previous_close, close) {
            (Some(prev), Some(cur)) if prev != 0.0 => Some((cur - prev) / prev),
            _ => None,
        };
        record.fields.insert(fields::PCT_CHANGE.to_string(), change);
        if close.is_some() {
            previous_close = close;
        }
    }
}
