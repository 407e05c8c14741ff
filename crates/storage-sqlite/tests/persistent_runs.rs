//! Download runs persisted to SQLite and resumed by a fresh process.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Map};

use tickvault_core::downloader::JobStatus;
use tickvault_core::{DataConfig, DataContext, JobStore};
use tickvault_market_data::{
    DataProvider, MarketDataError, ProviderCapabilities, RateLimit, RawBatch, RawRecord, Symbol,
};
use tickvault_storage_sqlite::{Database, SqliteJobStore, SqliteSeriesStore};

/// Serves two rows per symbol; fails every call while `down` is set.
struct FlakyProvider {
    down: AtomicBool,
    calls: AtomicUsize,
}

impl FlakyProvider {
    fn new(down: bool) -> Arc<Self> {
        Arc::new(Self {
            down: AtomicBool::new(down),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl DataProvider for FlakyProvider {
    fn id(&self) -> &'static str {
        "TUSHARE"
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
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<RawBatch, MarketDataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(MarketDataError::Transient {
                provider: "TUSHARE".to_string(),
                message: "503 Service Unavailable".to_string(),
            });
        }
        let records = symbols
            .iter()
            .flat_map(|s| {
                [("20240102", 10.0), ("20240103", 10.2)].into_iter().map(move |(date, close)| {
                    let mut fields = Map::new();
                    fields.insert("open".to_string(), json!(close));
                    fields.insert("high".to_string(), json!(close + 0.3));
                    fields.insert("low".to_string(), json!(close - 0.3));
                    fields.insert("close".to_string(), json!(close));
                    fields.insert("vol".to_string(), json!(52_000));
                    RawRecord::new(s.clone(), json!(date), fields)
                })
            })
            .collect();
        Ok(RawBatch::new("TUSHARE", records))
    }
}

fn config() -> DataConfig {
    DataConfig {
        batch_size: 1,
        max_workers: 1,
        max_retries: 2,
        retry_backoff_base_ms: 1,
        retry_backoff_max_ms: 2,
        rate_limit_interval_ms: 0,
        ..DataConfig::default()
    }
}

fn context(db: &Database, provider: Arc<FlakyProvider>) -> DataContext {
    DataContext::builder(config())
        .provider(provider)
        .series_store(Arc::new(SqliteSeriesStore::from_database(db)))
        .job_store(Arc::new(SqliteJobStore::from_database(db)))
        .without_disk_cache()
        .build()
        .unwrap()
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

#[tokio::test]
async fn failed_run_is_retried_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let symbols = vec![Symbol::new("000001.SZ"), Symbol::new("600000.SH")];

    let run_id = {
        let db = Database::open_in(dir.path()).unwrap();
        let ctx = context(&db, FlakyProvider::new(true));
        match ctx.downloader().run(&symbols, day(2), day(3)).await {
            Err(tickvault_core::Error::RunFailed { run_id, summary }) => {
                assert_eq!(summary.failed_permanent, 2);
                run_id
            }
            other => panic!("expected RunFailed, got {:?}", other.map(|s| s.run_id)),
        }
    };

    let db = Database::open_in(dir.path()).unwrap();
    let provider = FlakyProvider::new(false);
    let ctx = context(&db, provider.clone());
    let downloader = ctx.downloader();

    let status = downloader.run_status(&run_id).unwrap();
    assert_eq!(status.failed_permanent, 2);

    // resume leaves permanent failures alone
    let resumed = downloader.resume(&run_id).await.unwrap();
    assert_eq!(resumed.skipped, 2);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);

    let retried = downloader.retry_failed(&run_id).await.unwrap();
    assert_eq!(retried.succeeded, 2);
    assert_eq!(retried.records_stored, 4);

    let jobs = SqliteJobStore::from_database(&db);
    let job = jobs.get_job(&run_id, "600000.SH").unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.source.as_deref(), Some("TUSHARE"));

    let rows = ctx
        .cache()
        .range_query(&Symbol::new("600000.SH"), day(1), day(31))
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].close(), Some(10.2));
    assert_eq!(rows[1].volume(), Some(52_000.0));
}

#[tokio::test]
async fn price_rows_outlive_the_process() {
    let dir = tempfile::tempdir().unwrap();
    let symbols = vec![Symbol::new("000001.SZ")];

    {
        let db = Database::open_in(dir.path()).unwrap();
        let ctx = context(&db, FlakyProvider::new(false));
        let records = ctx.get_price_data(&symbols, day(2), day(3)).await.unwrap();
        assert_eq!(records.len(), 2);
    }

    let db = Database::open_in(dir.path()).unwrap();
    let store = SqliteSeriesStore::from_database(&db);
    assert_eq!(store.row_count().unwrap(), 2);
}
