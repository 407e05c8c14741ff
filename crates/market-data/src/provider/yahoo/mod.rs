//! Yahoo Finance market data provider.
//!
//! Serves daily bars for any symbol Yahoo knows (e.g. `AAPL`, `600519.SS`,
//! `0700.HK`). The chart endpoint takes one symbol per request, so the
//! provider declares `max_symbols_per_call = 1` and the source manager hands
//! it one symbol at a time.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde_json::{Map, Value};
use time::OffsetDateTime;
use log::debug;
use yahoo_finance_api as yahoo;

use crate::errors::MarketDataError;
use crate::models::{fields, join_symbols, RawBatch, RawRecord, Symbol};
use crate::provider::{DataProvider, ProviderCapabilities, RateLimit};

const PROVIDER_ID: &str = "YAHOO";

/// Yahoo Finance market data provider.
pub struct YahooProvider {
    connector: yahoo::YahooConnector,
}

impl YahooProvider {
    /// Create a new Yahoo Finance provider.
    pub fn new() -> Result<Self, MarketDataError> {
        let connector = yahoo::YahooConnector::new().map_err(|e| MarketDataError::Transient {
            provider: PROVIDER_ID.to_string(),
            message: format!("Failed to initialize Yahoo connector: {}", e),
        })?;
        Ok(Self { connector })
    }

    /// Convert a calendar date to the connector's time type (midnight UTC).
    fn to_offset_datetime(date: NaiveDate) -> OffsetDateTime {
        let timestamp = date.and_time(NaiveTime::MIN).and_utc().timestamp();
        OffsetDateTime::from_unix_timestamp(timestamp).unwrap_or_else(|_| OffsetDateTime::now_utc())
    }

    async fn fetch_symbol(
        &self,
        symbol: &Symbol,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawRecord>, MarketDataError> {
        // The chart endpoint treats `end` as exclusive.
        let start_time = Self::to_offset_datetime(start);
        let end_time = Self::to_offset_datetime(end.succ_opt().unwrap_or(end));

        let response = self
            .connector
            .get_quote_history(symbol.as_str(), start_time, end_time)
            .await
            .map_err(|e| map_yahoo_error(symbol, e))?;

        let quotes = response.quotes().map_err(|e| map_yahoo_error(symbol, e))?;

        Ok(quotes
            .into_iter()
            .map(|q| quote_to_record(symbol, q))
            .collect())
    }
}

fn map_yahoo_error(symbol: &Symbol, err: yahoo::YahooError) -> MarketDataError {
    if matches!(err, yahoo::YahooError::NoQuotes | yahoo::YahooError::NoResult) {
        MarketDataError::NotFound {
            provider: PROVIDER_ID.to_string(),
            symbol: symbol.to_string(),
        }
    } else {
        MarketDataError::Transient {
            provider: PROVIDER_ID.to_string(),
            message: err.to_string(),
        }
    }
}

fn quote_to_record(symbol: &Symbol, quote: yahoo::Quote) -> RawRecord {
    let mut values = Map::new();
    values.insert(fields::OPEN.to_string(), Value::from(quote.open));
    values.insert(fields::HIGH.to_string(), Value::from(quote.high));
    values.insert(fields::LOW.to_string(), Value::from(quote.low));
    values.insert(fields::CLOSE.to_string(), Value::from(quote.close));
    values.insert(fields::ADJ_CLOSE.to_string(), Value::from(quote.adjclose));
    values.insert(fields::VOLUME.to_string(), Value::from(quote.volume));

    RawRecord::new(symbol.clone(), Value::from(quote.timestamp as i64), values)
}

#[async_trait]
impl DataProvider for YahooProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn priority(&self) -> u8 {
        5
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_price_series: true,
            supports_symbol_list: false,
            reference_kinds: &[],
            max_symbols_per_call: 1,
        }
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            min_interval: Duration::from_millis(200),
        }
    }

    async fn fetch_price_series(
        &self,
        symbols: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawBatch, MarketDataError> {
        let [symbol] = symbols else {
            return Err(MarketDataError::Validation {
                message: format!(
                    "Yahoo serves one symbol per call, got [{}]",
                    join_symbols(symbols)
                ),
            });
        };
        debug!("Fetching {} from {} to {} from Yahoo", symbol, start, end);

        let records = self.fetch_symbol(symbol, start, end).await?;
        if records.is_empty() {
            return Err(MarketDataError::NotFound {
                provider: PROVIDER_ID.to_string(),
                symbol: symbol.to_string(),
            });
        }

        Ok(RawBatch::new(PROVIDER_ID, records))
    }
}
