//! Tushare Pro provider implementation.
//!
//! Tushare exposes a single token-authenticated JSON endpoint. Every call is
//! a POST of `{"api_name", "token", "params", "fields"}` and every answer is a
//! columnar table:
//!
//! ```text
//! {"code": 0, "msg": "", "data": {"fields": ["ts_code", ...], "items": [["000001.SZ", ...], ...]}}
//! ```
//!
//! A non-zero `code` signals an error; the codes we act on are listed below.

use async_trait::async_trait;
use chrono::NaiveDate;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::errors::MarketDataError;
use crate::models::{join_symbols, RawBatch, RawRecord, ReferenceKind, ReferenceRecord, Symbol};
use crate::provider::http::{build_client, parse_error, read_body, transport_error};
use crate::provider::{missing_symbols, DataProvider, ProviderCapabilities, RateLimit};

const BASE_URL: &str = "http://api.tushare.pro";
const PROVIDER_ID: &str = "TUSHARE";

const DAILY_FIELDS: &str = "ts_code,trade_date,open,high,low,close,pre_close,vol,amount";
const SYMBOL_FIELDS: &str = "ts_code,symbol,name,list_date";

/// Token missing, invalid, or lacking permission for the api.
const AUTH_CODES: &[i64] = &[-2001, 40001, 40101];
/// Per-minute quota exhausted.
const RATE_LIMIT_CODE: i64 = 40203;

const MAX_SYMBOLS_PER_CALL: usize = 50;

#[derive(Debug, Serialize)]
struct TushareRequest<'a> {
    api_name: &'a str,
    token: &'a str,
    params: Value,
    fields: &'a str,
}

#[derive(Debug, Deserialize)]
struct TushareResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<TushareTable>,
}

#[derive(Debug, Default, Deserialize)]
struct TushareTable {
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default)]
    items: Vec<Vec<Value>>,
}

impl TushareTable {
    fn rows(self) -> impl Iterator<Item = Map<String, Value>> {
        let fields = self.fields;
        self.items
            .into_iter()
            .map(move |item| fields.iter().cloned().zip(item).collect())
    }
}

/// How a reference kind maps onto a Tushare api.
struct ReferenceApi {
    api_name: &'static str,
    fields: &'static str,
    /// Request parameter carrying the symbol.
    param: &'static str,
    /// Response column identifying the row's subject.
    key_field: &'static str,
    /// Whether the api accepts a comma-joined symbol list.
    batched: bool,
}

fn reference_api(kind: ReferenceKind) -> ReferenceApi {
    match kind {
        ReferenceKind::Profile => ReferenceApi {
            api_name: "stock_company",
            fields: "ts_code,chairman,manager,reg_capital,setup_date,province,city,website,main_business",
            param: "ts_code",
            key_field: "ts_code",
            batched: true,
        },
        ReferenceKind::Financials => ReferenceApi {
            api_name: "fina_indicator",
            fields: "ts_code,ann_date,end_date,eps,roe,grossprofit_margin,debt_to_assets",
            param: "ts_code",
            key_field: "ts_code",
            batched: false,
        },
        ReferenceKind::IndexComponents => ReferenceApi {
            api_name: "index_weight",
            fields: "index_code,con_code,trade_date,weight",
            param: "index_code",
            key_field: "index_code",
            batched: false,
        },
        ReferenceKind::TradingCalendar => ReferenceApi {
            api_name: "trade_cal",
            fields: "exchange,cal_date,is_open,pretrade_date",
            param: "exchange",
            key_field: "exchange",
            batched: false,
        },
    }
}

/// Tushare Pro provider for A-share daily bars and reference data.
pub struct TushareProvider {
    client: Client,
    token: String,
    base_url: String,
}

impl TushareProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, BASE_URL)
    }

    /// Point the provider at a different endpoint (proxies, test servers).
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: build_client(),
            token: token.into(),
            base_url: base_url.into(),
        }
    }

    async fn call(
        &self,
        api_name: &str,
        params: Value,
        fields: &str,
    ) -> Result<TushareTable, MarketDataError> {
        debug!("Calling Tushare api '{}' with {}", api_name, params);

        let request = TushareRequest {
            api_name,
            token: &self.token,
            params,
            fields,
        };

        let response = self
            .client
            .post(&self.base_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(PROVIDER_ID, e))?;

        let body = read_body(PROVIDER_ID, response).await?;
        parse_response(&body)
    }
}

fn parse_response(body: &str) -> Result<TushareTable, MarketDataError> {
    let response: TushareResponse =
        serde_json::from_str(body).map_err(|e| parse_error(PROVIDER_ID, e))?;

    if response.code != 0 {
        return Err(code_error(response.code, response.msg.unwrap_or_default()));
    }

    Ok(response.data.unwrap_or_default())
}

fn code_error(code: i64, message: String) -> MarketDataError {
    if AUTH_CODES.contains(&code) {
        MarketDataError::Auth {
            provider: PROVIDER_ID.to_string(),
            message: format!("code {}: {}", code, message),
        }
    } else if code == RATE_LIMIT_CODE {
        MarketDataError::RateLimited {
            provider: PROVIDER_ID.to_string(),
            retry_after: None,
        }
    } else {
        MarketDataError::Transient {
            provider: PROVIDER_ID.to_string(),
            message: format!("code {}: {}", code, message),
        }
    }
}

fn daily_rows(table: TushareTable) -> Vec<RawRecord> {
    table
        .rows()
        .filter_map(|mut row| {
            let symbol = row.remove("ts_code")?;
            let date = row.remove("trade_date")?;
            Some(RawRecord::new(symbol.as_str()?, date, row))
        })
        .collect()
}

fn reference_rows(table: TushareTable, kind: ReferenceKind, key_field: &str) -> Vec<ReferenceRecord> {
    table
        .rows()
        .filter_map(|row| {
            let symbol = Symbol::new(row.get(key_field)?.as_str()?);
            Some(ReferenceRecord {
                symbol,
                kind,
                attributes: row.into_iter().collect(),
                source: PROVIDER_ID.to_string(),
            })
        })
        .collect()
}

fn date_param(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

#[async_trait]
impl DataProvider for TushareProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn priority(&self) -> u8 {
        2
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_price_series: true,
            supports_symbol_list: true,
            reference_kinds: &[
                ReferenceKind::Profile,
                ReferenceKind::Financials,
                ReferenceKind::IndexComponents,
                ReferenceKind::TradingCalendar,
            ],
            max_symbols_per_call: MAX_SYMBOLS_PER_CALL,
        }
    }

    fn max_reference_symbols_per_call(&self, kind: ReferenceKind) -> usize {
        if reference_api(kind).batched {
            MAX_SYMBOLS_PER_CALL
        } else {
            1
        }
    }

    fn rate_limit(&self) -> RateLimit {
        // Free tier allows roughly 200 calls per minute on `daily`.
        RateLimit {
            min_interval: std::time::Duration::from_millis(300),
        }
    }

    async fn list_symbols(&self) -> Result<Vec<Symbol>, MarketDataError> {
        let table = self
            .call("stock_basic", json!({ "list_status": "L" }), SYMBOL_FIELDS)
            .await?;

        let symbols: Vec<Symbol> = table
            .rows()
            .filter_map(|row| row.get("ts_code").and_then(Value::as_str).map(Symbol::new))
            .collect();

        if symbols.is_empty() {
            return Err(MarketDataError::NotFound {
                provider: PROVIDER_ID.to_string(),
                symbol: "stock_basic".to_string(),
            });
        }
        Ok(symbols)
    }

    async fn fetch_price_series(
        &self,
        symbols: &[Symbol],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<RawBatch, MarketDataError> {
        let params = json!({
            "ts_code": join_symbols(symbols),
            "start_date": date_param(start),
            "end_date": date_param(end),
        });
        let records = daily_rows(self.call("daily", params, DAILY_FIELDS).await?);

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
        let api = reference_api(kind);
        let mut params = Map::new();
        params.insert(api.param.to_string(), Value::String(join_symbols(symbols)));
        let table = self
            .call(api.api_name, Value::Object(params), api.fields)
            .await?;
        let records = reference_rows(table, kind, api.key_field);

        if records.is_empty() {
            return Err(MarketDataError::NotFound {
                provider: PROVIDER_ID.to_string(),
                symbol: join_symbols(symbols),
            });
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAILY_BODY: &str = r#"{
        "code": 0,
        "msg": "",
        "data": {
            "fields": ["ts_code", "trade_date", "open", "high", "low", "close", "pre_close", "vol", "amount"],
            "items": [
                ["000001.SZ", "20240103", 9.3, 9.41, 9.26, 9.39, 9.32, 1125000.0, 1052000.5],
                ["000001.SZ", "20240102", 9.39, 9.42, 9.21, 9.32, 9.39, 1158000.0, 1075000.1]
            ]
        }
    }"#;

    #[test]
    fn test_parse_daily_table() {
        let table = parse_response(DAILY_BODY).unwrap();
        let rows = daily_rows(table);

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].symbol.as_str(), "000001.SZ");
        assert_eq!(rows[0].date, Value::String("20240103".to_string()));
        assert_eq!(rows[0].fields.get("close"), Some(&json!(9.39)));
        assert!(rows[0].fields.get("ts_code").is_none());
        assert!(rows[0].fields.contains_key("vol"));
    }

    #[test]
    fn test_error_codes() {
        let auth = parse_response(r#"{"code": -2001, "msg": "token invalid", "data": null}"#);
        assert!(matches!(auth, Err(MarketDataError::Auth { .. })));

        let throttled = parse_response(r#"{"code": 40203, "msg": "too many calls"}"#);
        assert!(matches!(throttled, Err(MarketDataError::RateLimited { .. })));

        let other = parse_response(r#"{"code": 50000, "msg": "server busy"}"#);
        assert!(matches!(other, Err(MarketDataError::Transient { .. })));
    }

    #[test]
    fn test_malformed_body_is_parse_error() {
        let result = parse_response("<html>gateway</html>");
        assert!(matches!(result, Err(MarketDataError::Parse { .. })));
    }

    #[test]
    fn test_only_profiles_are_batched() {
        let provider = TushareProvider::new("token");
        assert_eq!(
            provider.max_reference_symbols_per_call(ReferenceKind::Profile),
            MAX_SYMBOLS_PER_CALL
        );
        assert_eq!(
            provider.max_reference_symbols_per_call(ReferenceKind::Financials),
            1
        );
    }

    #[test]
    fn test_reference_rows_keep_all_attributes() {
        let body = r#"{
            "code": 0,
            "data": {
                "fields": ["index_code", "con_code", "trade_date", "weight"],
                "items": [["000300.SH", "600519.SH", "20240131", 5.91]]
            }
        }"#;
        let rows = reference_rows(
            parse_response(body).unwrap(),
            ReferenceKind::IndexComponents,
            "index_code",
        );

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].symbol.as_str(), "000300.SH");
        assert_eq!(rows[0].attributes.get("con_code"), Some(&json!("600519.SH")));
        assert_eq!(rows[0].kind, ReferenceKind::IndexComponents);
    }
}
