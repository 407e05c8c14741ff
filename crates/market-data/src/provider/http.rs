//! HTTP plumbing shared by the REST adapters.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Response, StatusCode};

use crate::errors::MarketDataError;

/// Default HTTP request timeout
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn build_client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Map a transport-level failure.
pub(crate) fn transport_error(provider: &str, err: reqwest::Error) -> MarketDataError {
    if err.is_timeout() {
        MarketDataError::Timeout {
            provider: provider.to_string(),
        }
    } else {
        MarketDataError::Transient {
            provider: provider.to_string(),
            message: err.to_string(),
        }
    }
}

/// Map an HTTP status to an error class, `None` for success.
pub(crate) fn status_error(
    provider: &str,
    status: StatusCode,
    retry_after: Option<Duration>,
) -> Option<MarketDataError> {
    if status.is_success() {
        return None;
    }

    let error = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => MarketDataError::Auth {
            provider: provider.to_string(),
            message: format!("HTTP {}", status),
        },
        StatusCode::TOO_MANY_REQUESTS => MarketDataError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        },
        StatusCode::NOT_FOUND => MarketDataError::NotFound {
            provider: provider.to_string(),
            symbol: "endpoint".to_string(),
        },
        _ => MarketDataError::Transient {
            provider: provider.to_string(),
            message: format!("HTTP {}", status),
        },
    };
    Some(error)
}

/// Check the response status and read the body.
pub(crate) async fn read_body(provider: &str, response: Response) -> Result<String, MarketDataError> {
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);

    if let Some(err) = status_error(provider, response.status(), retry_after) {
        return Err(err);
    }

    response
        .text()
        .await
        .map_err(|e| transport_error(provider, e))
}

pub(crate) fn parse_error(provider: &str, err: serde_json::Error) -> MarketDataError {
    MarketDataError::Parse {
        provider: provider.to_string(),
        message: err.to_string(),
    }
}
