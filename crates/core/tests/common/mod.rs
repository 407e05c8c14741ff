//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Weekday};
use serde_json::{json, Map};

use tickvault_core::cache::{CacheManager, CacheSettings};
use tickvault_core::DataConfig;
use tickvault_market_data::{
    join_symbols, BackoffPolicy, DataProvider, HealthConfig, MarketDataError,
    ProviderCapabilities, RateLimit, RawBatch, RawRecord, SourceManager, SourceManagerConfig,
    Symbol,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Behavior {
    Succeed,
    RateLimited,
    Transient,
    Auth,
    Unsupported,
}

/// Provider that serves one OHLCV row per weekday and can be told to fail.
pub struct ScriptedProvider {
    id: &'static str,
    behavior: Mutex<Behavior>,
    failing: Mutex<HashSet<Symbol>>,
    corrupt: Mutex<HashSet<(Symbol, NaiveDate)>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(id: &'static str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self::build(id, behavior, Duration::ZERO))
    }

    pub fn slow(id: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(id, Behavior::Succeed, delay))
    }

    fn build(id: &'static str, behavior: Behavior, delay: Duration) -> Self {
        Self {
            id,
            behavior: Mutex::new(behavior),
            failing: Mutex::new(HashSet::new()),
            corrupt: Mutex::new(HashSet::new()),
            delay,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Every call including `symbol` fails with a transient error.
    pub fn fail_symbol(&self, symbol: &str) {
        self.failing.lock().unwrap().insert(Symbol::new(symbol));
    }

    /// Serve the row for `symbol` on `date` with high below low.
    pub fn corrupt_row(&self, symbol: &str, date: NaiveDate) {
        self.corrupt.lock().unwrap().insert((Symbol::new(symbol), date));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn rows(&self, symbols: &[Symbol], start: NaiveDate, end: NaiveDate) -> Vec<RawRecord> {
        let corrupt = self.corrupt.lock().unwrap();
        let mut records = Vec::new();
        for symbol in symbols {
            for (i, date) in weekdays(start, end).into_iter().enumerate() {
                let close = 10.0 + i as f64 * 0.1;
                let (high, low) = if corrupt.contains(&(symbol.clone(), date)) {
                    (close - 1.0, close + 1.0)
                } else {
                    (close + 0.5, close - 0.5)
                };
                let mut fields = Map::new();
                fields.insert("open".to_string(), json!(close));
                fields.insert("high".to_string(), json!(high));
                fields.insert("low".to_string(), json!(low));
                fields.insert("close".to_string(), json!(close));
                fields.insert("volume".to_string(), json!(1_000));
                records.push(RawRecord::new(
                    symbol.clone(),
                    json!(date.format("%Y-%m-%d").to_string()),
                    fields,
                ));
            }
        }
        records
    }
}

#[async_trait]
impl DataProvider for ScriptedProvider {
    fn id(&self) -> &'static str {
        self.id
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_price_series: true,
            supports_symbol_list: false,
            reference_kinds: &[],
            max_symbols_per_call: 100,
        }
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            min_interval: Duration::ZERO,
        }
    }

    async fn fetch_price_series(
        &self,
        symbols: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawBatch, MarketDataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let failing = {
            let failing = self.failing.lock().unwrap();
            symbols.iter().any(|s| failing.contains(s))
        };
        if failing {
            return Err(MarketDataError::Transient {
                provider: self.id.to_string(),
                message: format!("upstream error for {}", join_symbols(symbols)),
            });
        }

        let behavior = *self.behavior.lock().unwrap();
        match behavior {
            Behavior::Succeed => Ok(RawBatch::new(self.id, self.rows(symbols, start, end))),
            Behavior::RateLimited => Err(MarketDataError::RateLimited {
                provider: self.id.to_string(),
                retry_after: None,
            }),
            Behavior::Transient => Err(MarketDataError::Transient {
                provider: self.id.to_string(),
                message: "connection reset".to_string(),
            }),
            Behavior::Auth => Err(MarketDataError::Auth {
                provider: self.id.to_string(),
                message: "token rejected".to_string(),
            }),
            Behavior::Unsupported => Err(MarketDataError::NotSupported {
                operation: "price_series".to_string(),
                provider: self.id.to_string(),
            }),
        }
    }
}

pub fn weekdays(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .collect()
}

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

pub fn symbols(names: &[&str]) -> Vec<Symbol> {
    names.iter().map(|s| Symbol::new(s)).collect()
}

/// Config with millisecond backoff so retry tests stay fast.
pub fn test_config(batch_size: usize) -> DataConfig {
    DataConfig {
        batch_size,
        max_workers: 2,
        max_retries: 3,
        retry_backoff_base_ms: 1,
        retry_backoff_max_ms: 5,
        ..DataConfig::default()
    }
}

pub fn source_manager(
    providers: Vec<Arc<ScriptedProvider>>,
    priority: &[&str],
    config: &DataConfig,
) -> Arc<SourceManager> {
    let providers = providers
        .into_iter()
        .map(|p| p as Arc<dyn DataProvider>)
        .collect();
    Arc::new(SourceManager::with_config(
        providers,
        SourceManagerConfig {
            source_priority: priority.iter().map(|s| s.to_string()).collect(),
            rate_limit_interval: Duration::ZERO,
            health: HealthConfig {
                degrade_threshold: 10,
                cooldown_window: Duration::from_secs(60),
            },
            ..config.source_manager_config()
        },
        BackoffPolicy {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.retry_backoff_base_ms),
            max_delay: Duration::from_millis(config.retry_backoff_max_ms),
            rate_limit_multiplier: 1,
        },
    ))
}

pub fn memory_cache() -> Arc<CacheManager> {
    Arc::new(
        CacheManager::open(CacheSettings::memory_only(4 << 20, Duration::from_secs(300))).unwrap(),
    )
}
