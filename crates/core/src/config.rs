//! Runtime configuration.
//!
//! Loaded from a JSON file (camelCase keys), then overridden by
//! `TICKVAULT_*` environment variables. A `.env` file is honoured.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};
use tickvault_market_data::{
    BackoffPolicy, FillPolicies, HealthConfig, ProcessorConfig, QualityThresholds, QualityWeights,
    SourceManagerConfig,
};

/// Path of an optional JSON config file.
pub const CONFIG_FILE_ENV: &str = "TICKVAULT_CONFIG";

const MB: u64 = 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataConfig {
    pub batch_size: usize,
    pub max_workers: usize,
    pub max_retries: u32,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_max_ms: u64,
    pub source_priority: Vec<String>,
    /// Bytes.
    pub cache_memory_budget: u64,
    /// Bytes.
    pub cache_disk_budget: u64,
    pub cache_default_ttl_secs: u64,
    pub cache_dir: PathBuf,
    /// Entries above this size skip the memory tier.
    pub memory_entry_limit: u64,
    /// Entries above this size skip the disk tier.
    pub disk_entry_limit: u64,
    pub quality_thresholds: QualityThresholds,
    pub quality_weights: QualityWeights,
    pub rate_limit_interval_ms: u64,
    pub call_timeout_ms: u64,
    pub cooldown_window_secs: u64,
    pub fill_policies: FillPolicies,
    pub derive_returns: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            max_workers: 3,
            max_retries: 3,
            retry_backoff_base_ms: 1_000,
            retry_backoff_max_ms: 60_000,
            source_priority: vec!["UQER".into(), "TUSHARE".into(), "YAHOO".into()],
            cache_memory_budget: 100 * MB,
            cache_disk_budget: 1024 * MB,
            cache_default_ttl_secs: 86_400,
            cache_dir: PathBuf::from("./cache"),
            memory_entry_limit: MB,
            disk_entry_limit: 10 * MB,
            quality_thresholds: QualityThresholds::default(),
            quality_weights: QualityWeights::default(),
            rate_limit_interval_ms: 100,
            call_timeout_ms: 30_000,
            cooldown_window_secs: 300,
            fill_policies: FillPolicies::default(),
            derive_returns: true,
        }
    }
}

impl DataConfig {
    /// Defaults, then `TICKVAULT_CONFIG` if set, then `TICKVAULT_*` overrides.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim())?,
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigIO(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| Error::ConfigIO(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply `TICKVAULT_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
            value
                .trim()
                .parse()
                .map_err(|_| Error::InvalidConfigValue(format!("{key}={value}")))
        }

        macro_rules! override_parsed {
            ($key:literal, $field:expr) => {
                if let Some(value) = lookup($key) {
                    $field = parse($key, &value)?;
                }
            };
        }

        override_parsed!("TICKVAULT_BATCH_SIZE", self.batch_size);
        override_parsed!("TICKVAULT_MAX_WORKERS", self.max_workers);
        override_parsed!("TICKVAULT_MAX_RETRIES", self.max_retries);
        override_parsed!("TICKVAULT_RETRY_BACKOFF_BASE_MS", self.retry_backoff_base_ms);
        override_parsed!("TICKVAULT_RETRY_BACKOFF_MAX_MS", self.retry_backoff_max_ms);
        override_parsed!("TICKVAULT_CACHE_MEMORY_BUDGET", self.cache_memory_budget);
        override_parsed!("TICKVAULT_CACHE_DISK_BUDGET", self.cache_disk_budget);
        override_parsed!("TICKVAULT_CACHE_DEFAULT_TTL_SECS", self.cache_default_ttl_secs);
        override_parsed!("TICKVAULT_MEMORY_ENTRY_LIMIT", self.memory_entry_limit);
        override_parsed!("TICKVAULT_DISK_ENTRY_LIMIT", self.disk_entry_limit);
        override_parsed!("TICKVAULT_RATE_LIMIT_INTERVAL_MS", self.rate_limit_interval_ms);
        override_parsed!("TICKVAULT_CALL_TIMEOUT_MS", self.call_timeout_ms);
        override_parsed!("TICKVAULT_COOLDOWN_WINDOW_SECS", self.cooldown_window_secs);
        override_parsed!("TICKVAULT_DERIVE_RETURNS", self.derive_returns);

        if let Some(dir) = lookup("TICKVAULT_CACHE_DIR") {
            self.cache_dir = PathBuf::from(dir.trim());
        }
        if let Some(priority) = lookup("TICKVAULT_SOURCE_PRIORITY") {
            self.source_priority = priority
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect();
        }
        Ok(())
    }

    /// Reject settings the rest of the system cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: String| Err(Error::InvalidConfigValue(message));

        if self.batch_size == 0 {
            return invalid("batchSize must be at least 1".into());
        }
        if self.max_workers == 0 {
            return invalid("maxWorkers must be at least 1".into());
        }
        if self.max_retries == 0 {
            return invalid("maxRetries must be at least 1".into());
        }
        if self.retry_backoff_base_ms > self.retry_backoff_max_ms {
            return invalid(format!(
                "retryBackoffBaseMs ({}) exceeds retryBackoffMaxMs ({})",
                self.retry_backoff_base_ms, self.retry_backoff_max_ms
            ));
        }
        if self.source_priority.iter().any(|s| s.trim().is_empty()) {
            return invalid("sourcePriority contains an empty entry".into());
        }
        if self.cache_memory_budget > self.cache_disk_budget {
            return invalid(format!(
                "cacheMemoryBudget ({}) exceeds cacheDiskBudget ({})",
                self.cache_memory_budget, self.cache_disk_budget
            ));
        }
        if self.cache_default_ttl_secs == 0 {
            return invalid("cacheDefaultTtlSecs must be positive".into());
        }
        if self.call_timeout_ms == 0 {
            return invalid("callTimeoutMs must be positive".into());
        }
        self.quality_thresholds
            .validate()
            .map_err(|e| Error::InvalidConfigValue(e.to_string()))?;
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_default_ttl_secs)
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_backoff_base_ms),
            max_delay: Duration::from_millis(self.retry_backoff_max_ms),
            ..BackoffPolicy::default()
        }
    }

    pub fn source_manager_config(&self) -> SourceManagerConfig {
        SourceManagerConfig {
            source_priority: self.source_priority.clone(),
            batch_size: self.batch_size,
            max_workers: self.max_workers,
            call_timeout: Duration::from_millis(self.call_timeout_ms),
            rate_limit_interval: Duration::from_millis(self.rate_limit_interval_ms),
            health: HealthConfig {
                cooldown_window: Duration::from_secs(self.cooldown_window_secs),
                ..HealthConfig::default()
            },
        }
    }

    pub fn processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            fill: self.fill_policies.clone(),
            derive_returns: self.derive_returns,
        }
    }
}
