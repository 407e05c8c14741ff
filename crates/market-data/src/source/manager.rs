//! Source manager for orchestrating data providers.
//!
//! Owns the provider list and handles:
//! - Priority ordering (configured order, then declared priority)
//! - Failover across sources driven by the shared [`BackoffPolicy`]
//! - Health tracking, call spacing and per-call timeouts
//! - Parallel fan-out of large symbol lists

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use log::{debug, info, warn};

use super::{
    FetchDiagnostics, HealthConfig, HealthState, HealthTracker, ProviderHealth, RateLimiter,
    SkipReason,
};
use crate::errors::{BackoffPolicy, Failover, MarketDataError};
use crate::models::{join_symbols, RawBatch, ReferenceKind, ReferenceRecord, Symbol};
use crate::provider::{DataProvider, ProviderCapabilities};

#[derive(Clone, Debug)]
pub struct SourceManagerConfig {
    /// Preferred source order by id. Sources not listed follow by declared priority.
    pub source_priority: Vec<String>,
    /// Symbols per group in parallel fan-out.
    pub batch_size: usize,
    /// Groups in flight at once during fan-out.
    pub max_workers: usize,
    /// Upper bound on a single provider call.
    pub call_timeout: Duration,
    /// Minimum spacing between calls to the same source.
    pub rate_limit_interval: Duration,
    pub health: HealthConfig,
}

impl Default for SourceManagerConfig {
    fn default() -> Self {
        Self {
            source_priority: Vec::new(),
            batch_size: 50,
            max_workers: 3,
            call_timeout: Duration::from_secs(30),
            rate_limit_interval: Duration::from_millis(100),
            health: HealthConfig::default(),
        }
    }
}

/// Data returned by a successful call, tagged with where it came from.
#[derive(Clone, Debug)]
pub struct Fetched<T> {
    pub data: T,
    pub source: String,
    pub diagnostics: FetchDiagnostics,
}

/// Outcome of one symbol group during parallel fan-out.
#[derive(Debug)]
pub struct GroupOutcome {
    pub symbols: Vec<Symbol>,
    pub result: Result<Fetched<RawBatch>, MarketDataError>,
}

pub struct SourceManager {
    providers: Vec<Arc<dyn DataProvider>>,
    config: SourceManagerConfig,
    policy: BackoffPolicy,
    health: HealthTracker,
    rate_limiter: RateLimiter,
}

impl SourceManager {
    pub fn new(providers: Vec<Arc<dyn DataProvider>>) -> Self {
        Self::with_config(providers, SourceManagerConfig::default(), BackoffPolicy::default())
    }

    pub fn with_config(
        providers: Vec<Arc<dyn DataProvider>>,
        config: SourceManagerConfig,
        policy: BackoffPolicy,
    ) -> Self {
        Self {
            health: HealthTracker::with_config(config.health.clone()),
            rate_limiter: RateLimiter::new(config.rate_limit_interval),
            providers,
            config,
            policy,
        }
    }

    pub fn providers(&self) -> &[Arc<dyn DataProvider>] {
        &self.providers
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    pub fn health(&self) -> &HealthTracker {
        &self.health
    }

    /// Health of every source, including ones never called.
    pub fn health_report(&self) -> Vec<ProviderHealth> {
        let mut report = self.health.snapshot();
        for provider in &self.providers {
            if !report.iter().any(|h| h.source_id == provider.id()) {
                report.push(ProviderHealth {
                    source_id: provider.id().to_string(),
                    state: HealthState::Available,
                    consecutive_failures: 0,
                    last_failure_secs_ago: None,
                });
            }
        }
        report.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        report
    }

    /// Sources in the order they will be tried.
    ///
    /// An explicit `subset` wins and is taken in the caller's order.
    /// Otherwise configured `source_priority` comes first, then the rest
    /// by declared priority.
    pub fn ordered_sources(&self, subset: Option<&[String]>) -> Vec<&Arc<dyn DataProvider>> {
        if let Some(ids) = subset {
            return ids
                .iter()
                .filter_map(|id| self.providers.iter().find(|p| p.id() == id))
                .collect();
        }

        let rank = |provider: &Arc<dyn DataProvider>| -> (usize, u8) {
            let configured = self
                .config
                .source_priority
                .iter()
                .position(|id| id == provider.id())
                .unwrap_or(usize::MAX);
            (configured, provider.priority())
        };

        let mut providers: Vec<_> = self.providers.iter().collect();
        providers.sort_by_key(|p| rank(p));
        providers
    }

    /// Fetch daily rows for `symbols`, failing over across sources.
    ///
    /// Each source receives the symbols in chunks no larger than its
    /// `max_symbols_per_call`. Spacing and the call timeout apply per chunk.
    pub async fn fetch_price_series(
        &self,
        symbols: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
        subset: Option<&[String]>,
    ) -> Result<Fetched<RawBatch>, MarketDataError> {
        self.with_failover(
            "price_series",
            subset,
            |caps| caps.supports_price_series,
            |provider| async move {
                let limit = provider.capabilities().max_symbols_per_call;
                let chunks = self
                    .call_in_chunks(&provider, symbols, limit, |chunk| {
                        let provider = Arc::clone(&provider);
                        async move { provider.fetch_price_series(chunk, start, end).await }
                    })
                    .await?;

                let mut batch = RawBatch::new(provider.id(), Vec::new());
                for part in chunks.parts {
                    batch.records.extend(part.records);
                    batch.missing.extend(part.missing);
                }
                batch.missing.extend(chunks.not_found);
                Ok(batch)
            },
        )
        .await
    }

    pub async fn fetch_reference_data(
        &self,
        symbols: &[Symbol],
        kind: ReferenceKind,
        subset: Option<&[String]>,
    ) -> Result<Fetched<Vec<ReferenceRecord>>, MarketDataError> {
        self.with_failover(
            "reference",
            subset,
            |caps| caps.supports_reference(kind),
            |provider| async move {
                let limit = provider.max_reference_symbols_per_call(kind);
                let chunks = self
                    .call_in_chunks(&provider, symbols, limit, |chunk| {
                        let provider = Arc::clone(&provider);
                        async move { provider.fetch_reference_data(chunk, kind).await }
                    })
                    .await?;
                Ok(chunks.parts.into_iter().flatten().collect())
            },
        )
        .await
    }

    pub async fn list_symbols(
        &self,
        subset: Option<&[String]>,
    ) -> Result<Fetched<Vec<Symbol>>, MarketDataError> {
        self.with_failover(
            "list_symbols",
            subset,
            |caps| caps.supports_symbol_list,
            |provider| async move { self.guarded_call(&provider, provider.list_symbols()).await },
        )
        .await
    }

    /// Fetch a large symbol list as independent groups of `batch_size`,
    /// at most `max_workers` groups in flight. A failed group never
    /// cancels its siblings; results come back in completion order.
    pub async fn fetch_price_series_parallel(
        &self,
        symbols: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Vec<GroupOutcome> {
        let groups: Vec<Vec<Symbol>> = symbols
            .chunks(self.config.batch_size.max(1))
            .map(|chunk| chunk.to_vec())
            .collect();

        info!(
            "Fetching {} symbols in {} groups with {} workers",
            symbols.len(),
            groups.len(),
            self.config.max_workers
        );

        stream::iter(groups)
            .map(|group| async move {
                let result = self.fetch_price_series(&group, start, end, None).await;
                if let Err(e) = &result {
                    warn!("Group [{}] failed: {}", join_symbols(&group), e);
                }
                GroupOutcome {
                    symbols: group,
                    result,
                }
            })
            .buffer_unordered(self.config.max_workers.max(1))
            .collect()
            .await
    }

    /// One upstream request: wait for the source's slot, then bound it by
    /// the call timeout. Expiry is reported as [`MarketDataError::Timeout`].
    async fn guarded_call<T, Fut>(
        &self,
        provider: &Arc<dyn DataProvider>,
        call: Fut,
    ) -> Result<T, MarketDataError>
    where
        Fut: Future<Output = Result<T, MarketDataError>>,
    {
        let source_id = provider.id();
        self.rate_limiter
            .acquire(source_id, provider.rate_limit().min_interval)
            .await;

        match tokio::time::timeout(self.config.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(MarketDataError::Timeout {
                provider: source_id.to_string(),
            }),
        }
    }

    /// Call `call` once per chunk of at most `chunk_size` symbols.
    ///
    /// A chunk the source does not know is recorded as not found and the
    /// remaining chunks still run. Any other error fails the whole source.
    /// When every chunk was unknown the result is `NotFound`.
    async fn call_in_chunks<'a, T, F, Fut>(
        &self,
        provider: &Arc<dyn DataProvider>,
        symbols: &'a [Symbol],
        chunk_size: usize,
        call: F,
    ) -> Result<Chunked<T>, MarketDataError>
    where
        F: Fn(&'a [Symbol]) -> Fut,
        Fut: Future<Output = Result<T, MarketDataError>>,
    {
        let mut chunked = Chunked {
            parts: Vec::new(),
            not_found: Vec::new(),
        };

        for chunk in symbols.chunks(chunk_size.max(1)) {
            match self.guarded_call(provider, call(chunk)).await {
                Ok(part) => chunked.parts.push(part),
                Err(MarketDataError::NotFound { .. }) => {
                    debug!(
                        "Source '{}' has no data for [{}]",
                        provider.id(),
                        join_symbols(chunk)
                    );
                    chunked.not_found.extend_from_slice(chunk);
                }
                Err(e) => return Err(e),
            }
        }

        if chunked.parts.is_empty() && !chunked.not_found.is_empty() {
            return Err(MarketDataError::NotFound {
                provider: provider.id().to_string(),
                symbol: join_symbols(symbols),
            });
        }
        Ok(chunked)
    }

    async fn with_failover<T, S, F, Fut>(
        &self,
        operation: &str,
        subset: Option<&[String]>,
        supports: S,
        call: F,
    ) -> Result<Fetched<T>, MarketDataError>
    where
        S: Fn(&ProviderCapabilities) -> bool,
        F: Fn(Arc<dyn DataProvider>) -> Fut,
        Fut: Future<Output = Result<T, MarketDataError>>,
    {
        let providers = self.ordered_sources(subset);
        if providers.is_empty() {
            warn!("No sources configured for '{}'", operation);
            return Err(MarketDataError::NoSourcesAvailable);
        }

        let mut diagnostics = FetchDiagnostics::new();
        let mut rate_limited = false;
        // Any penalised failure makes a later attempt worth making.
        let mut retryable = false;
        let mut last_unpenalized = None;

        for provider in providers {
            let source_id = provider.id();

            if !supports(&provider.capabilities()) {
                diagnostics.record_skip(source_id, SkipReason::CapabilityMissing);
                continue;
            }

            if !self.health.is_available(source_id) {
                debug!("Source '{}' is cooling down, skipping", source_id);
                diagnostics.record_skip(source_id, SkipReason::CoolingDown);
                continue;
            }

            debug!("Calling '{}' on source '{}'", operation, source_id);
            let outcome = call(Arc::clone(provider)).await;

            match outcome {
                Ok(data) => {
                    self.health.record_success(source_id);
                    diagnostics.record_success(source_id);
                    debug!("'{}' served by '{}'", operation, source_id);
                    return Ok(Fetched {
                        data,
                        source: source_id.to_string(),
                        diagnostics,
                    });
                }
                Err(e) => {
                    diagnostics.record_error(source_id, e.to_string());
                    match self.policy.failover(&e) {
                        Failover::Stop => {
                            info!(
                                "Terminal error from '{}' for '{}': {}, not failing over",
                                source_id, operation, e
                            );
                            return Err(e);
                        }
                        Failover::Next { penalize } => {
                            warn!(
                                "Source '{}' failed '{}' with {}, trying next source",
                                source_id, operation, e
                            );
                            rate_limited |= e.is_rate_limited();
                            if penalize {
                                self.health.record_failure(source_id);
                                retryable = true;
                            } else {
                                last_unpenalized = Some(e);
                            }
                        }
                    }
                }
            }
        }

        if diagnostics.calls_made() == 0 {
            if diagnostics.skipped_for(&SkipReason::CoolingDown) > 0 {
                return Err(MarketDataError::NoSourcesAvailable);
            }
            return Err(MarketDataError::NotSupported {
                operation: operation.to_string(),
                provider: "any".to_string(),
            });
        }

        if !retryable {
            if let Some(e) = last_unpenalized {
                info!(
                    "Every source refused '{}' ({}), not worth retrying",
                    operation,
                    diagnostics.summary()
                );
                return Err(e);
            }
        }

        Err(MarketDataError::AllSourcesFailed {
            summary: diagnostics.summary(),
            rate_limited,
        })
    }
}

/// Per-chunk results from one source.
struct Chunked<T> {
    parts: Vec<T>,
    not_found: Vec<Symbol>,
}
