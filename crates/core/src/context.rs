//! Consumer entry point.
//!
//! A [`DataContext`] owns one source manager, one cache and one job store,
//! built once from a [`DataConfig`] and passed to whoever needs data.
//! Consumers ask for prices, reference data or symbol lists and never see
//! adapters, jobs or fingerprints.

use std::env;
use std::sync::Arc;

use chrono::NaiveDate;
use log::{debug, info, warn};

use tickvault_market_data::{
    DataProcessor, DataProvider, Expectation, ProviderHealth, QualityChecker, ReferenceKind,
    ReferenceRecord, RequestFingerprint, SourceManager, Symbol, TimeSeriesRecord, TushareProvider,
    UqerProvider, YahooProvider,
};

use crate::cache::{CacheManager, CachePayload, CacheSettings, CacheStatsSnapshot, SeriesStore};
use crate::config::DataConfig;
use crate::downloader::{Downloader, InMemoryJobStore, JobStore};
use crate::errors::{CacheError, Error, Result};

pub const TUSHARE_TOKEN_ENV: &str = "TICKVAULT_TUSHARE_TOKEN";
pub const UQER_TOKEN_ENV: &str = "TICKVAULT_UQER_TOKEN";

/// Builds a [`DataContext`].
pub struct DataContextBuilder {
    config: DataConfig,
    providers: Vec<Arc<dyn DataProvider>>,
    series_store: Option<Arc<dyn SeriesStore>>,
    job_store: Option<Arc<dyn JobStore>>,
    disk_cache: bool,
}

impl DataContextBuilder {
    pub fn provider(mut self, provider: Arc<dyn DataProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Add the vendor adapters whose credentials are present in the
    /// environment. Yahoo needs none and is always added.
    pub fn providers_from_env(mut self) -> Result<Self> {
        if let Ok(token) = env::var(TUSHARE_TOKEN_ENV) {
            self.providers.push(Arc::new(TushareProvider::new(token)));
        } else {
            debug!("{} not set, Tushare disabled", TUSHARE_TOKEN_ENV);
        }
        if let Ok(token) = env::var(UQER_TOKEN_ENV) {
            self.providers.push(Arc::new(UqerProvider::new(token)));
        } else {
            debug!("{} not set, Uqer disabled", UQER_TOKEN_ENV);
        }
        self.providers.push(Arc::new(YahooProvider::new()?));
        Ok(self)
    }

    /// Structured store tier; also receives every cached price row.
    pub fn series_store(mut self, store: Arc<dyn SeriesStore>) -> Self {
        self.series_store = Some(store);
        self
    }

    /// Where download progress is kept. Defaults to an in-memory store.
    pub fn job_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.job_store = Some(store);
        self
    }

    /// Keep the cache in memory only, ignoring `cacheDir`.
    pub fn without_disk_cache(mut self) -> Self {
        self.disk_cache = false;
        self
    }

    pub fn build(self) -> Result<DataContext> {
        self.config.validate()?;
        if self.providers.is_empty() {
            return Err(Error::InvalidConfigValue("no data providers configured".to_string()));
        }

        let mut settings = CacheSettings::from_config(&self.config);
        if !self.disk_cache {
            settings.dir = None;
        }
        let mut cache = CacheManager::open(settings)?;
        if let Some(store) = self.series_store {
            cache = cache.with_store(store);
        }

        let sources = SourceManager::with_config(
            self.providers,
            self.config.source_manager_config(),
            self.config.backoff_policy(),
        );
        info!(
            "Data context ready with sources [{}]",
            sources
                .ordered_sources(None)
                .iter()
                .map(|p| p.id())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(DataContext {
            processor: DataProcessor::new(self.config.processor_config()),
            checker: QualityChecker::with_config(
                self.config.quality_thresholds.clone(),
                self.config.quality_weights.clone(),
            ),
            sources: Arc::new(sources),
            cache: Arc::new(cache),
            jobs: self
                .job_store
                .unwrap_or_else(|| Arc::new(InMemoryJobStore::new())),
            config: self.config,
        })
    }
}

pub struct DataContext {
    config: DataConfig,
    sources: Arc<SourceManager>,
    cache: Arc<CacheManager>,
    jobs: Arc<dyn JobStore>,
    processor: DataProcessor,
    checker: QualityChecker,
}

impl DataContext {
    pub fn builder(config: DataConfig) -> DataContextBuilder {
        DataContextBuilder {
            config,
            providers: Vec::new(),
            series_store: None,
            job_store: None,
            disk_cache: true,
        }
    }

    pub fn config(&self) -> &DataConfig {
        &self.config
    }

    /// Processed, quality-checked daily rows for `symbols`, sorted by
    /// (symbol, date). Served from cache when possible.
    pub async fn get_price_data(
        &self,
        symbols: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TimeSeriesRecord>> {
        if symbols.is_empty() || start > end {
            return Ok(Vec::new());
        }
        let fingerprint = RequestFingerprint::for_price_series(symbols, start, end);

        let payload = self
            .cache
            .get_or_fetch(&fingerprint, None, || async {
                let fetched = self
                    .sources
                    .fetch_price_series(symbols, start, end, None)
                    .await?;
                let processed = self.processor.process(fetched.data);
                let expectation = Expectation::new(symbols.to_vec(), start, end);
                let checked =
                    self.checker
                        .check(fingerprint.as_str(), processed.records, &expectation);

                if checked.report.has_errors() {
                    warn!(
                        "Price data from {} scored {:.1}: {} records excluded",
                        fetched.source, checked.report.score, checked.report.records_excluded
                    );
                }
                Ok::<_, Error>(CachePayload::Prices(checked.records))
            })
            .await?;

        match payload.as_prices() {
            Some(records) => Ok(records.to_vec()),
            None => Err(unexpected_payload(&fingerprint, payload.kind())),
        }
    }

    pub async fn get_reference_data(
        &self,
        symbols: &[Symbol],
        kind: ReferenceKind,
    ) -> Result<Vec<ReferenceRecord>> {
        let fingerprint = RequestFingerprint::for_reference(symbols, kind);

        let payload = self
            .cache
            .get_or_fetch(&fingerprint, None, || async {
                let fetched = self.sources.fetch_reference_data(symbols, kind, None).await?;
                Ok::<_, Error>(CachePayload::Reference(fetched.data))
            })
            .await?;

        match payload.as_ref() {
            CachePayload::Reference(records) => Ok(records.clone()),
            other => Err(unexpected_payload(&fingerprint, other.kind())),
        }
    }

    pub async fn list_symbols(&self) -> Result<Vec<Symbol>> {
        let fingerprint = RequestFingerprint::for_symbol_list();

        let payload = self
            .cache
            .get_or_fetch(&fingerprint, None, || async {
                let fetched = self.sources.list_symbols(None).await?;
                Ok::<_, Error>(CachePayload::Symbols(fetched.data))
            })
            .await?;

        match payload.as_ref() {
            CachePayload::Symbols(symbols) => Ok(symbols.clone()),
            other => Err(unexpected_payload(&fingerprint, other.kind())),
        }
    }

    /// A downloader sharing this context's sources, cache and job store.
    pub fn downloader(&self) -> Downloader {
        Downloader::new(
            self.sources.clone(),
            self.cache.clone(),
            self.jobs.clone(),
            &self.config,
        )
    }

    pub fn health_report(&self) -> Vec<ProviderHealth> {
        self.sources.health_report()
    }

    pub fn cache_stats(&self) -> CacheStatsSnapshot {
        self.cache.stats()
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub async fn purge_expired_cache(&self) -> usize {
        self.cache.purge_expired().await
    }
}

fn unexpected_payload(fingerprint: &RequestFingerprint, kind: &str) -> Error {
    CacheError::Corrupt {
        key: fingerprint.as_str().to_string(),
        message: format!("unexpected {} payload", kind),
    }
    .into()
}
