//! Tracing bootstrap for binaries and tests that embed the library.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Selects JSON output when set to `json`; anything else is plain text.
pub const LOG_FORMAT_ENV: &str = "TICKVAULT_LOG_FORMAT";

/// Install the global subscriber.
///
/// The filter comes from `RUST_LOG` and defaults to `info`. Records emitted
/// through the `log` facade are forwarded to the same subscriber. Calling
/// this twice is harmless; the second call is ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_FORMAT_ENV)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let result = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(false))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .try_init()
    };

    if let Err(e) = result {
        log::debug!("Tracing subscriber already installed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_ignored() {
        init_tracing();
        init_tracing();
        log::info!("bridged through the tracing subscriber");
    }
}
