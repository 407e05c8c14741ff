//! Per-source health tracking.
//!
//! Each source moves through three states:
//!
//! - **Available**: Normal operation.
//! - **Degraded**: `degrade_threshold` consecutive failures. Still tried.
//! - **CoolingDown**: one more failure while degraded. Skipped until the
//!   cool-down window elapses, then back to Available with a clean count.
//!
//! Any success resets the source to Available. State is in-memory only.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use serde::Serialize;

const DEFAULT_DEGRADE_THRESHOLD: u32 = 3;
const DEFAULT_COOLDOWN_WINDOW: Duration = Duration::from_secs(300);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Available,
    Degraded,
    CoolingDown,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => write!(f, "Available"),
            Self::Degraded => write!(f, "Degraded"),
            Self::CoolingDown => write!(f, "CoolingDown"),
        }
    }
}

#[derive(Debug)]
struct Health {
    state: HealthState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    cooling_until: Option<Instant>,
}

impl Health {
    fn new() -> Self {
        Self {
            state: HealthState::Available,
            consecutive_failures: 0,
            last_failure: None,
            cooling_until: None,
        }
    }

    fn reset(&mut self) {
        self.state = HealthState::Available;
        self.consecutive_failures = 0;
        self.cooling_until = None;
    }
}

#[derive(Clone, Debug)]
pub struct HealthConfig {
    /// Consecutive failures before a source is marked degraded.
    pub degrade_threshold: u32,
    /// How long a cooling-down source is skipped.
    pub cooldown_window: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            degrade_threshold: DEFAULT_DEGRADE_THRESHOLD,
            cooldown_window: DEFAULT_COOLDOWN_WINDOW,
        }
    }
}

/// Snapshot of one source's health, for observability.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderHealth {
    pub source_id: String,
    pub state: HealthState,
    pub consecutive_failures: u32,
    /// Seconds since the last failure.
    pub last_failure_secs_ago: Option<u64>,
}

/// Thread-safe health table shared by all workers.
pub struct HealthTracker {
    sources: Mutex<HashMap<String, Health>>,
    config: HealthConfig,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::with_config(HealthConfig::default())
    }

    pub fn with_config(config: HealthConfig) -> Self {
        Self {
            sources: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// Lock the table, recovering from poison. A slightly stale health
    /// entry is preferable to a panic in every worker.
    fn lock_sources(&self) -> MutexGuard<'_, HashMap<String, Health>> {
        self.sources.lock().unwrap_or_else(|poisoned| {
            warn!("Health tracker mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Whether the source may be called now.
    ///
    /// Also performs the CoolingDown -> Available transition once the
    /// window has elapsed.
    pub fn is_available(&self, source: &str) -> bool {
        let mut sources = self.lock_sources();
        let health = sources.entry(source.to_string()).or_insert_with(Health::new);

        match health.state {
            HealthState::Available | HealthState::Degraded => true,
            HealthState::CoolingDown => {
                let expired = health
                    .cooling_until
                    .map(|until| Instant::now() >= until)
                    .unwrap_or(true);
                if expired {
                    info!("Source '{}' cool-down elapsed, marking available", source);
                    health.reset();
                }
                expired
            }
        }
    }

    pub fn record_success(&self, source: &str) {
        let mut sources = self.lock_sources();
        let health = sources.entry(source.to_string()).or_insert_with(Health::new);

        if health.state != HealthState::Available {
            info!("Source '{}' recovered from {}", source, health.state);
        }
        health.reset();
    }

    pub fn record_failure(&self, source: &str) {
        let mut sources = self.lock_sources();
        let health = sources.entry(source.to_string()).or_insert_with(Health::new);

        let now = Instant::now();
        health.consecutive_failures += 1;
        health.last_failure = Some(now);

        match health.state {
            HealthState::Available => {
                if health.consecutive_failures >= self.config.degrade_threshold {
                    warn!(
                        "Source '{}' degraded after {} consecutive failures",
                        source, health.consecutive_failures
                    );
                    health.state = HealthState::Degraded;
                } else {
                    debug!(
                        "Source '{}' failure ({}/{})",
                        source, health.consecutive_failures, self.config.degrade_threshold
                    );
                }
            }
            HealthState::Degraded => {
                warn!(
                    "Source '{}' cooling down for {:?} after {} consecutive failures",
                    source, self.config.cooldown_window, health.consecutive_failures
                );
                health.state = HealthState::CoolingDown;
                health.cooling_until = Some(now + self.config.cooldown_window);
            }
            HealthState::CoolingDown => {
                debug!("Source '{}' failed again while cooling down", source);
            }
        }
    }

    pub fn state(&self, source: &str) -> HealthState {
        self.lock_sources()
            .get(source)
            .map(|h| h.state)
            .unwrap_or(HealthState::Available)
    }

    pub fn failure_count(&self, source: &str) -> u32 {
        self.lock_sources()
            .get(source)
            .map(|h| h.consecutive_failures)
            .unwrap_or(0)
    }

    pub fn reset(&self, source: &str) {
        if let Some(health) = self.lock_sources().get_mut(source) {
            info!("Manually resetting health for '{}'", source);
            health.reset();
        }
    }

    /// Health of every source seen so far, sorted by id.
    pub fn snapshot(&self) -> Vec<ProviderHealth> {
        let sources = self.lock_sources();
        let mut report: Vec<ProviderHealth> = sources
            .iter()
            .map(|(id, health)| ProviderHealth {
                source_id: id.clone(),
                state: health.state,
                consecutive_failures: health.consecutive_failures,
                last_failure_secs_ago: health.last_failure.map(|t| t.elapsed().as_secs()),
            })
            .collect();
        report.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        report
    }
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(window: Duration) -> HealthTracker {
        HealthTracker::with_config(HealthConfig {
            degrade_threshold: 3,
            cooldown_window: window,
        })
    }

    #[test]
    fn test_starts_available() {
        let health = tracker(Duration::from_secs(60));
        assert!(health.is_available("TUSHARE"));
        assert_eq!(health.state("TUSHARE"), HealthState::Available);
    }

    #[test]
    fn test_degrades_then_cools_down() {
        let health = tracker(Duration::from_secs(60));

        health.record_failure("UQER");
        health.record_failure("UQER");
        assert_eq!(health.state("UQER"), HealthState::Available);

        health.record_failure("UQER");
        assert_eq!(health.state("UQER"), HealthState::Degraded);
        assert!(health.is_available("UQER"));

        health.record_failure("UQER");
        assert_eq!(health.state("UQER"), HealthState::CoolingDown);
        assert!(!health.is_available("UQER"));
    }

    #[test]
    fn test_success_resets() {
        let health = tracker(Duration::from_secs(60));
        health.record_failure("YAHOO");
        health.record_failure("YAHOO");
        health.record_failure("YAHOO");
        assert_eq!(health.failure_count("YAHOO"), 3);

        health.record_success("YAHOO");
        assert_eq!(health.failure_count("YAHOO"), 0);
        assert_eq!(health.state("YAHOO"), HealthState::Available);
    }

    #[test]
    fn test_cooldown_expires() {
        let health = tracker(Duration::from_millis(20));
        for _ in 0..4 {
            health.record_failure("TUSHARE");
        }
        assert!(!health.is_available("TUSHARE"));

        std::thread::sleep(Duration::from_millis(40));
        assert!(health.is_available("TUSHARE"));
        assert_eq!(health.state("TUSHARE"), HealthState::Available);
        assert_eq!(health.failure_count("TUSHARE"), 0);
    }

    #[test]
    fn test_snapshot_lists_sources() {
        let health = tracker(Duration::from_secs(60));
        health.record_failure("UQER");
        health.record_success("TUSHARE");

        let report = health.snapshot();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].source_id, "TUSHARE");
        assert_eq!(report[1].consecutive_failures, 1);
        assert!(report[1].last_failure_secs_ago.is_some());
    }
}
