//! Quality report types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Check class an issue came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IssueClass {
    MissingRate,
    Outlier,
    Consistency,
    Completeness,
    PriceChange,
}

impl fmt::Display for IssueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IssueClass::MissingRate => "missing_rate",
            IssueClass::Outlier => "outlier",
            IssueClass::Consistency => "consistency",
            IssueClass::Completeness => "completeness",
            IssueClass::PriceChange => "price_change",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Info,
    Warning,
    /// Hard failure; the affected record was excluded.
    Error,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityIssue {
    pub class: IssueClass,
    pub severity: Severity,
    pub symbol: Option<String>,
    pub message: String,
}

impl QualityIssue {
    pub fn new(
        class: IssueClass,
        severity: Severity,
        symbol: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            class,
            severity,
            symbol: symbol.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Outcome of checking one batch, or the aggregate of several.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub subject: String,
    /// 0 to 100.
    pub score: f64,
    pub issues: Vec<QualityIssue>,
    pub records_checked: usize,
    pub records_excluded: usize,
    pub missing_rate: f64,
}

impl QualityReport {
    /// A perfect report with nothing checked.
    pub fn empty(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            score: 100.0,
            issues: Vec::new(),
            records_checked: 0,
            records_excluded: 0,
            missing_rate: 0.0,
        }
    }

    pub fn count(&self, class: IssueClass) -> usize {
        self.issues.iter().filter(|i| i.class == class).count()
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    /// Letter grade: A from 90, B from 80, C from 70, D from 60, F below.
    pub fn grade(&self) -> char {
        match self.score {
            s if s >= 90.0 => 'A',
            s if s >= 80.0 => 'B',
            s if s >= 70.0 => 'C',
            s if s >= 60.0 => 'D',
            _ => 'F',
        }
    }

    /// Fold another report into this one. Scores and missing rates are
    /// weighted by records checked.
    pub fn merge(&mut self, other: &QualityReport) {
        let total = self.records_checked + other.records_checked;
        if total > 0 {
            let weight = |n: usize| n as f64 / total as f64;
            self.score = self.score * weight(self.records_checked)
                + other.score * weight(other.records_checked);
            self.missing_rate = self.missing_rate * weight(self.records_checked)
                + other.missing_rate * weight(other.records_checked);
        } else {
            self.score = self.score.min(other.score);
        }
        self.records_checked = total;
        self.records_excluded += other.records_excluded;
        self.issues.extend(other.issues.iter().cloned());
    }

    /// Aggregate several reports under a new subject.
    pub fn aggregate<'a>(
        subject: impl Into<String>,
        reports: impl IntoIterator<Item = &'a QualityReport>,
    ) -> Self {
        let mut combined = Self::empty(subject);
        for report in reports {
            combined.merge(report);
        }
        combined
    }
}
