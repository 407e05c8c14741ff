//! Per-call source attempt tracking.

use serde::Serialize;

/// Why a source was skipped during a fetch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Source is cooling down after repeated failures.
    CoolingDown,

    /// Source does not serve this kind of request.
    CapabilityMissing,
}

/// Record of a single source attempt.
#[derive(Clone, Debug, Serialize)]
pub struct SourceAttempt {
    pub source_id: String,
    pub skipped: Option<SkipReason>,
    pub error: Option<String>,
    pub success: bool,
}

/// Ordered list of what happened at each source during one call.
#[derive(Clone, Debug, Default, Serialize)]
pub struct FetchDiagnostics {
    pub attempts: Vec<SourceAttempt>,
}

impl FetchDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_skip(&mut self, source_id: &str, reason: SkipReason) {
        self.attempts.push(SourceAttempt {
            source_id: source_id.to_string(),
            skipped: Some(reason),
            error: None,
            success: false,
        });
    }

    pub fn record_error(&mut self, source_id: &str, error: String) {
        self.attempts.push(SourceAttempt {
            source_id: source_id.to_string(),
            skipped: None,
            error: Some(error),
            success: false,
        });
    }

    pub fn record_success(&mut self, source_id: &str) {
        self.attempts.push(SourceAttempt {
            source_id: source_id.to_string(),
            skipped: None,
            error: None,
            success: true,
        });
    }

    /// Summary for logging/debugging.
    pub fn summary(&self) -> String {
        self.attempts
            .iter()
            .map(|a| {
                if a.success {
                    format!("{}: SUCCESS", a.source_id)
                } else if let Some(skip) = &a.skipped {
                    format!("{}: SKIPPED ({:?})", a.source_id, skip)
                } else if let Some(err) = &a.error {
                    format!("{}: ERROR ({})", a.source_id, err)
                } else {
                    format!("{}: UNKNOWN", a.source_id)
                }
            })
            .collect::<Vec<_>>()
            .join(" -> ")
    }

    pub fn has_success(&self) -> bool {
        self.attempts.iter().any(|a| a.success)
    }

    /// Number of sources that were actually called.
    pub fn calls_made(&self) -> usize {
        self.attempts.iter().filter(|a| a.skipped.is_none()).count()
    }

    pub fn skipped_for(&self, reason: &SkipReason) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.skipped.as_ref() == Some(reason))
            .count()
    }

    pub fn errors(&self) -> Vec<(&str, &str)> {
        self.attempts
            .iter()
            .filter_map(|a| a.error.as_deref().map(|e| (a.source_id.as_str(), e)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_reads_in_order() {
        let mut diagnostics = FetchDiagnostics::new();
        diagnostics.record_skip("UQER", SkipReason::CoolingDown);
        diagnostics.record_error("TUSHARE", "Rate limited: TUSHARE".to_string());
        diagnostics.record_success("YAHOO");

        assert_eq!(
            diagnostics.summary(),
            "UQER: SKIPPED (CoolingDown) -> TUSHARE: ERROR (Rate limited: TUSHARE) -> YAHOO: SUCCESS"
        );
        assert!(diagnostics.has_success());
        assert_eq!(diagnostics.calls_made(), 2);
        assert_eq!(diagnostics.errors(), vec![("TUSHARE", "Rate limited: TUSHARE")]);
    }
}
