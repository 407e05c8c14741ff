//! Uqer (DataYes) provider implementation.
//!
//! # API Endpoints
//!
//! - Daily bars: `{BASE_URL}/api/market/getMktEqud.json?ticker={tickers}&beginDate={yyyymmdd}&endDate={yyyymmdd}`
//! - Equity list / profile: `{BASE_URL}/api/equity/getEqu.json?equTypeCD=A&listStatusCD=L`
//!
//! # Response Format
//!
//! `{"retCode": 1, "retMsg": "Success", "data": [{...}, ...]}`. `retCode` is 1
//! on success, -1 when the query matched nothing and -403 when the token is
//! rejected.

use async_trait::async_trait;
use chrono::NaiveDate;
use log::debug;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use urlencoding::encode;

use crate::errors::MarketDataError;
use crate::models::{join_symbols, RawBatch, RawRecord, ReferenceKind, ReferenceRecord, Symbol};
use crate::provider::http::{build_client, parse_error, read_body, transport_error};
use crate::provider::{missing_symbols, DataProvider, ProviderCapabilities, RateLimit};

const BASE_URL: &str = "https://api.wmcloud.com/data/v1";
const PROVIDER_ID: &str = "UQER";

const RET_OK: i64 = 1;
const RET_NO_DATA: i64 = -1;
const RET_FORBIDDEN: i64 = -403;

const DAILY_FIELDS: &str =
    "ticker,tradeDate,openPrice,highestPrice,lowestPrice,closePrice,preClosePrice,turnoverVol,turnoverValue";
const MAX_SYMBOLS_PER_CALL: usize = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UqerResponse {
    ret_code: i64,
    #[serde(default)]
    ret_msg: Option<String>,
    #[serde(default)]
    data: Vec<Map<String, Value>>,
}

/// Uqer provider for A-share daily bars.
pub struct UqerProvider {
    client: Client,
    token: String,
    base_url: String,
}

impl UqerProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, BASE_URL)
    }

    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: build_client(),
            token: token.into(),
            base_url: base_url.into(),
        }
    }

    /// Uqer tickers carry no exchange suffix: `000001.SZ` is queried as `000001`.
    fn ticker(symbol: &Symbol) -> &str {
        symbol
            .as_str()
            .split_once('.')
            .map(|(code, _)| code)
            .unwrap_or(symbol.as_str())
    }

    fn tickers(symbols: &[Symbol]) -> String {
        symbols
            .iter()
            .map(Self::ticker)
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Fetch data from the API with Bearer token authentication.
    async fn fetch(&self, path_and_query: &str, subject: &str) -> Result<Vec<Map<String, Value>>, MarketDataError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        debug!("Fetching {} from Uqer", url);

        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER_ID, e))?;

        let body = read_body(PROVIDER_ID, response).await?;
        parse_response(&body, subject)
    }
}

fn parse_response(body: &str, subject: &str) -> Result<Vec<Map<String, Value>>, MarketDataError> {
    let response: UqerResponse =
        serde_json::from_str(body).map_err(|e| parse_error(PROVIDER_ID, e))?;

    match response.ret_code {
        RET_OK => Ok(response.data),
        RET_NO_DATA => Err(MarketDataError::NotFound {
            provider: PROVIDER_ID.to_string(),
            symbol: subject.to_string(),
        }),
        RET_FORBIDDEN => Err(MarketDataError::Auth {
            provider: PROVIDER_ID.to_string(),
            message: response.ret_msg.unwrap_or_default(),
        }),
        code => Err(MarketDataError::Transient {
            provider: PROVIDER_ID.to_string(),
            message: format!("retCode {}: {}", code, response.ret_msg.unwrap_or_default()),
        }),
    }
}

/// Convert rows back to the caller's symbols by matching tickers.
fn daily_rows(rows: Vec<Map<String, Value>>, requested: &[Symbol]) -> Vec<RawRecord> {
    rows.into_iter()
        .filter_map(|mut row| {
            let ticker = row.remove("ticker")?;
            let ticker = ticker.as_str()?;
            let symbol = requested
                .iter()
                .find(|s| UqerProvider::ticker(s) == ticker)
                .cloned()
                .unwrap_or_else(|| Symbol::new(ticker));
            let date = row.remove("tradeDate")?;
            Some(RawRecord::new(symbol, date, row))
        })
        .collect()
}

#[async_trait]
impl DataProvider for UqerProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn priority(&self) -> u8 {
        1
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_price_series: true,
            supports_symbol_list: true,
            reference_kinds: &[ReferenceKind::Profile],
            max_symbols_per_call: MAX_SYMBOLS_PER_CALL,
        }
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit::default()
    }

    async fn list_symbols(&self) -> Result<Vec<Symbol>, MarketDataError> {
        let rows = self
            .fetch(
                "/api/equity/getEqu.json?equTypeCD=A&listStatusCD=L&field=ticker,exchangeCD",
                "getEqu",
            )
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| row.get("ticker").and_then(Value::as_str))
            .map(Symbol::new)
            .collect())
    }

    async fn fetch_price_series(
        &self,
        symbols: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawBatch, MarketDataError> {
        let query = format!(
            "/api/market/getMktEqud.json?ticker={}&beginDate={}&endDate={}&field={}",
            encode(&Self::tickers(symbols)),
            start.format("%Y%m%d"),
            end.format("%Y%m%d"),
            DAILY_FIELDS
        );
        let rows = self.fetch(&query, &join_symbols(symbols)).await?;
        let records = daily_rows(rows, symbols);

        if records.is_empty() {
            return Err(MarketDataError::NotFound {
                provider: PROVIDER_ID.to_string(),
                symbol: join_symbols(symbols),
            });
        }

        let missing = missing_symbols(symbols, &records);
        Ok(RawBatch::new(PROVIDER_ID, records).with_missing(missing))
    }

    async fn fetch_reference_data(
        &self,
        symbols: &[Symbol],
        kind: ReferenceKind,
    ) -> Result<Vec<ReferenceRecord>, MarketDataError> {
        if kind != ReferenceKind::Profile {
            return Err(MarketDataError::NotSupported {
                operation: format!("reference:{}", kind),
                provider: PROVIDER_ID.to_string(),
            });
        }

        let query = format!(
            "/api/equity/getEqu.json?ticker={}&field=ticker,secShortName,listDate,exchangeCD,totalShares,primeOperating",
            encode(&Self::tickers(symbols))
        );
        let rows = self.fetch(&query, &join_symbols(symbols)).await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                let ticker = row.get("ticker")?.as_str()?.to_string();
                let symbol = symbols
                    .iter()
                    .find(|s| Self::ticker(s) == ticker)
                    .cloned()
                    .unwrap_or_else(|| Symbol::new(&ticker));
                Some(ReferenceRecord {
                    symbol,
                    kind,
                    attributes: row.into_iter().collect(),
                    source: PROVIDER_ID.to_string(),
                })
            })
            .collect())
    }
}
