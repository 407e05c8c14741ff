//! Batch quality checks.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDate, Weekday};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::report::{IssueClass, QualityIssue, QualityReport, Severity};
use crate::errors::MarketDataError;
use crate::models::{fields, Symbol, TimeSeriesRecord};

/// Thresholds for the individual checks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QualityThresholds {
    /// Fraction of expected cells allowed to be absent.
    pub missing_rate: f64,
    pub outlier_z_score: f64,
    /// Longest run of missing weekdays tolerated inside a series.
    pub gap_tolerance_days: u32,
    /// Fractional day-over-day close change that gets flagged.
    pub price_change: f64,
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            missing_rate: 0.1,
            outlier_z_score: 3.0,
            gap_tolerance_days: 5,
            price_change: 0.5,
        }
    }
}

impl QualityThresholds {
    pub fn validate(&self) -> Result<(), MarketDataError> {
        if !(0.0..=1.0).contains(&self.missing_rate) {
            return Err(MarketDataError::Validation {
                message: format!("missingRate must be within [0, 1], got {}", self.missing_rate),
            });
        }
        if self.outlier_z_score.is_nan() || self.outlier_z_score <= 0.0 {
            return Err(MarketDataError::Validation {
                message: format!("outlierZScore must be positive, got {}", self.outlier_z_score),
            });
        }
        if self.price_change.is_nan() || self.price_change <= 0.0 {
            return Err(MarketDataError::Validation {
                message: format!("priceChange must be positive, got {}", self.price_change),
            });
        }
        Ok(())
    }
}

/// Score points deducted per check class at 100% failure.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QualityWeights {
    pub missing_rate: f64,
    pub outliers: f64,
    pub consistency: f64,
    pub completeness: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            missing_rate: 30.0,
            outliers: 20.0,
            consistency: 30.0,
            completeness: 20.0,
        }
    }
}

/// What a batch was supposed to cover.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Expectation {
    pub symbols: Vec<Symbol>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Expectation {
    pub fn new(symbols: Vec<Symbol>, start: NaiveDate, end: NaiveDate) -> Self {
        Self { symbols, start, end }
    }
}

/// Records that passed hard validation plus the report.
#[derive(Clone, Debug)]
pub struct QualityOutcome {
    pub records: Vec<TimeSeriesRecord>,
    pub report: QualityReport,
}

#[derive(Clone, Debug, Default)]
pub struct QualityChecker {
    thresholds: QualityThresholds,
    weights: QualityWeights,
}

impl QualityChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(thresholds: QualityThresholds, weights: QualityWeights) -> Self {
        Self { thresholds, weights }
    }

    pub fn thresholds(&self) -> &QualityThresholds {
        &self.thresholds
    }

    /// Run every check over a processed batch.
    ///
    /// Only consistency failures remove records; everything else is
    /// reported and the data kept.
    pub fn check(
        &self,
        subject: &str,
        records: Vec<TimeSeriesRecord>,
        expectation: &Expectation,
    ) -> QualityOutcome {
        let records_checked = records.len();
        let mut issues = Vec::new();

        let mut kept = Vec::with_capacity(records.len());
        for record in records {
            match consistency_violations(&record) {
                violations if violations.is_empty() => {
                    if let Some(message) = open_outside_range(&record) {
                        issues.push(QualityIssue::new(
                            IssueClass::Consistency,
                            Severity::Warning,
                            Some(record.symbol.as_str()),
                            message,
                        ));
                    }
                    kept.push(record);
                }
                violations => {
                    let message = format!("{}: {}", record.date, violations.join("; "));
                    warn!(
                        "Excluding {} record for {}: {}",
                        subject, record.symbol, message
                    );
                    issues.push(QualityIssue::new(
                        IssueClass::Consistency,
                        Severity::Error,
                        Some(record.symbol.as_str()),
                        message,
                    ));
                }
            }
        }
        let records_excluded = records_checked - kept.len();

        let by_symbol = group_by_symbol(&kept);

        let missing_rate = missing_rate(&kept, expectation);
        if missing_rate > self.thresholds.missing_rate {
            issues.push(QualityIssue::new(
                IssueClass::MissingRate,
                Severity::Warning,
                None,
                format!(
                    "{:.1}% of expected cells missing (threshold {:.1}%)",
                    missing_rate * 100.0,
                    self.thresholds.missing_rate * 100.0
                ),
            ));
        }

        let mut outlier_rows: BTreeSet<(Symbol, NaiveDate)> = BTreeSet::new();
        let mut gap_issues = 0usize;
        for (symbol, series) in &by_symbol {
            for (date, field, value, z) in self.outliers(series) {
                outlier_rows.insert((symbol.clone(), date));
                issues.push(QualityIssue::new(
                    IssueClass::Outlier,
                    Severity::Warning,
                    Some(symbol.as_str()),
                    format!("{} {} on {} (z = {:.2})", field, value, date, z),
                ));
            }

            for (from, to, missing) in self.gaps(series) {
                gap_issues += 1;
                issues.push(QualityIssue::new(
                    IssueClass::Completeness,
                    Severity::Warning,
                    Some(symbol.as_str()),
                    format!("{} weekdays missing between {} and {}", missing, from, to),
                ));
            }

            for (date, change) in self.price_jumps(series) {
                issues.push(QualityIssue::new(
                    IssueClass::PriceChange,
                    Severity::Info,
                    Some(symbol.as_str()),
                    format!("close moved {:.1}% on {}", change * 100.0, date),
                ));
            }
        }

        let fraction = |n: usize, of: usize| {
            if of == 0 {
                0.0
            } else {
                (n as f64 / of as f64).min(1.0)
            }
        };
        let deduction = self.weights.missing_rate * missing_rate
            + self.weights.outliers * fraction(outlier_rows.len(), kept.len())
            + self.weights.consistency * fraction(records_excluded, records_checked)
            + self.weights.completeness * fraction(gap_issues, by_symbol.len());
        let score = (100.0 - deduction).clamp(0.0, 100.0);

        debug!(
            "Quality for {}: score {:.1}, {} issues, {} excluded",
            subject,
            score,
            issues.len(),
            records_excluded
        );

        QualityOutcome {
            records: kept,
            report: QualityReport {
                subject: subject.to_string(),
                score,
                issues,
                records_checked,
                records_excluded,
                missing_rate,
            },
        }
    }

    /// (date, field, value, z) for every value beyond the z-score threshold.
    fn outliers<'a>(
        &self,
        series: &[&'a TimeSeriesRecord],
    ) -> Vec<(NaiveDate, &'a str, f64, f64)> {
        let mut field_names: BTreeSet<&str> = BTreeSet::new();
        for record in series {
            field_names.extend(record.fields.keys().map(String::as_str));
        }
        field_names.remove(fields::PCT_CHANGE);

        let mut found = Vec::new();
        for name in field_names {
            let values: Vec<(NaiveDate, &'a str, f64)> = series
                .iter()
                .filter_map(|r| {
                    let (key, value) = r.fields.get_key_value(name)?;
                    value.map(|v| (r.date, key.as_str(), v))
                })
                .collect();
            if values.len() < 3 {
                continue;
            }

            let n = values.len() as f64;
            let mean = values.iter().map(|(_, _, v)| v).sum::<f64>() / n;
            let variance = values.iter().map(|(_, _, v)| (v - mean).powi(2)).sum::<f64>() / n;
            let std = variance.sqrt();
            if std == 0.0 {
                continue;
            }

            for (date, field, value) in values {
                let z = (value - mean) / std;
                if z.abs() > self.thresholds.outlier_z_score {
                    found.push((date, field, value, z));
                }
            }
        }
        found
    }

    /// (from, to, missing weekdays) for gaps longer than the tolerance.
    fn gaps(&self, series: &[&TimeSeriesRecord]) -> Vec<(NaiveDate, NaiveDate, u32)> {
        series
            .windows(2)
            .filter_map(|pair| {
                let (from, to) = (pair[0].date, pair[1].date);
                let missing = weekdays_between(from, to);
                (missing > self.thresholds.gap_tolerance_days).then_some((from, to, missing))
            })
            .collect()
    }

    fn price_jumps(&self, series: &[&TimeSeriesRecord]) -> Vec<(NaiveDate, f64)> {
        let mut jumps = Vec::new();
        let mut previous: Option<f64> = None;
        for record in series {
            let Some(close) = record.close() else {
                continue;
            };
            if let Some(prev) = previous.filter(|p| *p != 0.0) {
                let change = (close - prev) / prev;
                if change.abs() > self.thresholds.price_change {
                    jumps.push((record.date, change));
                }
            }
            previous = Some(close);
        }
        jumps
    }
}

fn consistency_violations(record: &TimeSeriesRecord) -> Vec<String> {
    let mut violations = Vec::new();
    let (high, low) = (record.high(), record.low());

    if let (Some(h), Some(l)) = (high, low) {
        if h < l {
            violations.push(format!("high {} < low {}", h, l));
        } else if let Some(c) = record.close() {
            if c < l || c > h {
                violations.push(format!("close {} outside [{}, {}]", c, l, h));
            }
        }
    }
    if let Some(v) = record.volume() {
        if v < 0.0 {
            violations.push(format!("negative volume {}", v));
        }
    }
    violations
}

fn open_outside_range(record: &TimeSeriesRecord) -> Option<String> {
    let (o, h, l) = (record.open()?, record.high()?, record.low()?);
    (o < l || o > h).then(|| format!("{}: open {} outside [{}, {}]", record.date, o, l, h))
}

fn group_by_symbol(records: &[TimeSeriesRecord]) -> BTreeMap<Symbol, Vec<&TimeSeriesRecord>> {
    let mut grouped: BTreeMap<Symbol, Vec<&TimeSeriesRecord>> = BTreeMap::new();
    for record in records {
        grouped.entry(record.symbol.clone()).or_default().push(record);
    }
    for series in grouped.values_mut() {
        series.sort_by_key(|r| r.date);
    }
    grouped
}

fn is_weekday(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Weekdays strictly between two dates.
fn weekdays_between(from: NaiveDate, to: NaiveDate) -> u32 {
    let mut count = 0;
    let mut day = from.succ_opt();
    while let Some(d) = day {
        if d >= to {
            break;
        }
        if is_weekday(d) {
            count += 1;
        }
        day = d.succ_opt();
    }
    count
}

/// Fraction of expected (symbol, weekday) cells with no record.
fn missing_rate(records: &[TimeSeriesRecord], expectation: &Expectation) -> f64 {
    let expected_symbols: BTreeSet<&Symbol> = expectation.symbols.iter().collect();
    let mut weekdays = 0usize;
    let mut day = Some(expectation.start);
    while let Some(d) = day {
        if d > expectation.end {
            break;
        }
        if is_weekday(d) {
            weekdays += 1;
        }
        day = d.succ_opt();
    }

    let expected = expected_symbols.len() * weekdays;
    if expected == 0 {
        return 0.0;
    }

    let present: BTreeSet<(&Symbol, NaiveDate)> = records
        .iter()
        .filter(|r| {
            expected_symbols.contains(&r.symbol)
                && r.date >= expectation.start
                && r.date <= expectation.end
                && is_weekday(r.date)
        })
        .map(|r| (&r.symbol, r.date))
        .collect();

    1.0 - present.len() as f64 / expected as f64
}
