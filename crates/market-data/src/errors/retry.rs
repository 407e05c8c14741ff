use std::time::Duration;

use super::MarketDataError;

/// Classification for retry policy.
///
/// # Behavior Summary
///
/// | Class | Try Next Source? | Record Health Failure? | Requeue Job? |
/// |-------|------------------|------------------------|--------------|
/// | `Fatal` | No | No | No, stop the run |
/// | `Terminal` | No | No | No |
/// | `FailoverWithPenalty` | Yes | Yes | Yes, with backoff |
/// | `NextProvider` | Yes | No | No |
///
/// A `NextProvider` error only reaches the downloader once every source
/// refused the request, so repeating the job would get the same answer.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Credentials rejected. Nothing else in the run will succeed either.
    Fatal,

    /// Terminal for this item (missing symbol, invalid data).
    /// Other sources would give the same answer.
    Terminal,

    /// Failover to the next source and record a health penalty.
    ///
    /// Used for rate limits, timeouts and transient network failures.
    FailoverWithPenalty,

    /// Try the next source without recording any penalty.
    NextProvider,
}

/// What the source manager does with a failed call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Failover {
    /// Return the error to the caller.
    Stop,
    /// Move to the next source, optionally penalising the current one.
    Next { penalize: bool },
}

/// What the downloader does with a failed attempt.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryDecision {
    /// Stop dispatching and fail the run.
    Abort,
    /// Mark the job permanently failed.
    GiveUp,
    /// Requeue the job after the delay.
    RetryAfter(Duration),
}

/// Retry policy shared by the source manager and the downloader.
///
/// Delays grow as `base * 2^(attempt - 1)`, multiplied again for rate
/// limits, and never exceed `max_delay`.
#[derive(Clone, Debug)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub rate_limit_multiplier: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            rate_limit_multiplier: 2,
        }
    }
}

impl BackoffPolicy {
    /// Failover decision for a single source call.
    pub fn failover(&self, error: &MarketDataError) -> Failover {
        match error.retry_class() {
            RetryClass::Fatal | RetryClass::Terminal => Failover::Stop,
            RetryClass::FailoverWithPenalty => Failover::Next { penalize: true },
            RetryClass::NextProvider => Failover::Next { penalize: false },
        }
    }

    /// Requeue decision for a job after `attempts` failed attempts.
    pub fn decide(&self, error: &MarketDataError, attempts: u32) -> RetryDecision {
        match error.retry_class() {
            RetryClass::Fatal => RetryDecision::Abort,
            RetryClass::Terminal | RetryClass::NextProvider => RetryDecision::GiveUp,
            RetryClass::FailoverWithPenalty => {
                if attempts >= self.max_retries {
                    RetryDecision::GiveUp
                } else {
                    RetryDecision::RetryAfter(self.delay_for(attempts, error))
                }
            }
        }
    }

    /// Delay before the next attempt, `attempt` being 1-based.
    pub fn delay_for(&self, attempt: u32, error: &MarketDataError) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let mut delay = self.base_delay.saturating_mul(1u32 << exponent);

        if error.is_rate_limited() {
            delay = delay.saturating_mul(self.rate_limit_multiplier.max(1));
        }
        if let Some(hint) = error.retry_after() {
            delay = delay.max(hint);
        }

        delay.min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transient() -> MarketDataError {
        MarketDataError::Transient {
            provider: "TUSHARE".to_string(),
            message: "connection reset".to_string(),
        }
    }

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            rate_limit_multiplier: 4,
        }
    }

    #[test]
    fn test_delay_grows_exponentially_and_caps() {
        let policy = policy();
        let error = transient();

        assert_eq!(policy.delay_for(1, &error), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2, &error), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3, &error), Duration::from_millis(400));
        assert_eq!(policy.delay_for(10, &error), Duration::from_secs(1));
    }

    #[test]
    fn test_rate_limits_back_off_harder() {
        let policy = policy();
        let error = MarketDataError::RateLimited {
            provider: "UQER".to_string(),
            retry_after: None,
        };
        assert_eq!(policy.delay_for(1, &error), Duration::from_millis(400));

        let hinted = MarketDataError::RateLimited {
            provider: "UQER".to_string(),
            retry_after: Some(Duration::from_millis(900)),
        };
        assert_eq!(policy.delay_for(1, &hinted), Duration::from_millis(900));
    }

    #[test]
    fn test_decide_gives_up_when_budget_spent() {
        let policy = policy();
        let error = transient();

        assert_eq!(
            policy.decide(&error, 1),
            RetryDecision::RetryAfter(Duration::from_millis(100))
        );
        assert_eq!(policy.decide(&error, 3), RetryDecision::GiveUp);
    }

    #[test]
    fn test_decide_aborts_on_auth_and_gives_up_on_not_found() {
        let policy = policy();
        let auth = MarketDataError::Auth {
            provider: "UQER".to_string(),
            message: "-403".to_string(),
        };
        let missing = MarketDataError::NotFound {
            provider: "UQER".to_string(),
            symbol: "000001".to_string(),
        };

        assert_eq!(policy.decide(&auth, 1), RetryDecision::Abort);
        assert_eq!(policy.decide(&missing, 1), RetryDecision::GiveUp);
    }

    #[test]
    fn test_decide_gives_up_on_refusals() {
        let policy = policy();
        let unsupported = MarketDataError::NotSupported {
            operation: "reference:financials".to_string(),
            provider: "UQER".to_string(),
        };
        let garbled = MarketDataError::Parse {
            provider: "TUSHARE".to_string(),
            message: "expected value at line 1".to_string(),
        };

        assert_eq!(policy.decide(&unsupported, 1), RetryDecision::GiveUp);
        assert_eq!(policy.decide(&garbled, 1), RetryDecision::GiveUp);
    }

    #[test]
    fn test_failover_penalises_only_source_faults() {
        let policy = policy();
        assert_eq!(
            policy.failover(&transient()),
            Failover::Next { penalize: true }
        );

        let unsupported = MarketDataError::NotSupported {
            operation: "reference".to_string(),
            provider: "YAHOO".to_string(),
        };
        assert_eq!(
            policy.failover(&unsupported),
            Failover::Next { penalize: false }
        );

        let auth = MarketDataError::Auth {
            provider: "TUSHARE".to_string(),
            message: "token".to_string(),
        };
        assert_eq!(policy.failover(&auth), Failover::Stop);
    }
}
