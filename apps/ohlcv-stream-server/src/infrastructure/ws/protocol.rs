//! Control Protocol
//!
//! Parses client control messages:
//!
//! ```json
//! {"action": "subscribe", "symbol": "AAPL", "exchange": "NASDAQ",
//!  "interval": "in_1_minute", "update_interval": 60}
//! {"action": "unsubscribe", "symbol": "AAPL", "exchange": "NASDAQ"}
//! ```
//!
//! `interval` defaults to `in_1_minute` and `update_interval` to the
//! configured default. An unsubscribe without `interval` covers every
//! interval of the pair.

use std::time::Duration;

use serde::Deserialize;

use crate::domain::streaming::{Interval, TopicKey};

/// A validated control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Start (or retime) a subscription.
    Subscribe {
        /// Topic to subscribe to.
        key: TopicKey,
        /// Requested update interval.
        update_interval: Duration,
    },
    /// Drop subscriptions for a symbol and exchange.
    Unsubscribe {
        /// Ticker symbol.
        symbol: String,
        /// Exchange code.
        exchange: String,
        /// Only this interval, or every interval when absent.
        interval: Option<Interval>,
    },
}

impl ControlMessage {
    /// Action name, for logs and metrics.
    #[must_use]
    pub const fn action(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Unsubscribe { .. } => "unsubscribe",
        }
    }
}

/// Rejected control message. The display text is sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    /// Not a JSON object of the expected shape.
    #[error("Invalid message format")]
    Malformed,

    /// A required field is absent or empty.
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Interval name not recognised.
    #[error("Invalid interval: {0}")]
    InvalidInterval(String),

    /// Action other than subscribe/unsubscribe.
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// `update_interval` below one second.
    #[error("update_interval must be at least 1 second")]
    InvalidUpdateInterval,
}

impl ControlError {
    /// Short label used for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::MissingField(_) => "missing_field",
            Self::InvalidInterval(_) => "invalid_interval",
            Self::UnknownAction(_) => "unknown_action",
            Self::InvalidUpdateInterval => "invalid_update_interval",
        }
    }
}

#[derive(Deserialize)]
struct RawControl {
    action: Option<String>,
    symbol: Option<String>,
    exchange: Option<String>,
    interval: Option<String>,
    update_interval: Option<i64>,
}

/// Parse one text frame.
///
/// # Errors
///
/// See [`ControlError`].
pub fn parse_control(text: &str, default_update_interval: Duration) -> Result<ControlMessage, ControlError> {
    let raw: RawControl = serde_json::from_str(text).map_err(|_| ControlError::Malformed)?;

    let action = non_empty(raw.action).ok_or(ControlError::MissingField("action"))?;
    if action != "subscribe" && action != "unsubscribe" {
        return Err(ControlError::UnknownAction(action));
    }

    let symbol = non_empty(raw.symbol).ok_or(ControlError::MissingField("symbol"))?;
    let exchange = non_empty(raw.exchange).ok_or(ControlError::MissingField("exchange"))?;
    let interval = raw
        .interval
        .map(|name| name.parse::<Interval>().map_err(|e| ControlError::InvalidInterval(e.0)))
        .transpose()?;

    if action == "unsubscribe" {
        return Ok(ControlMessage::Unsubscribe {
            symbol,
            exchange,
            interval,
        });
    }

    let update_interval = match raw.update_interval {
        Some(secs) => u64::try_from(secs)
            .ok()
            .filter(|secs| *secs >= 1)
            .map(Duration::from_secs)
            .ok_or(ControlError::InvalidUpdateInterval)?,
        None => default_update_interval,
    };

    Ok(ControlMessage::Subscribe {
        key: TopicKey::new(symbol, exchange, interval.unwrap_or_default()),
        update_interval,
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    const DEFAULT: Duration = Duration::from_secs(60);

    #[test]
    fn subscribe_with_defaults() {
        let msg = parse_control(r#"{"action":"subscribe","symbol":"AAPL","exchange":"NASDAQ"}"#, DEFAULT).unwrap();
        assert_eq!(
            msg,
            ControlMessage::Subscribe {
                key: TopicKey::new("AAPL", "NASDAQ", Interval::Min1),
                update_interval: DEFAULT,
            }
        );
    }

    #[test]
    fn subscribe_with_everything() {
        let msg = parse_control(
            r#"{"action":"subscribe","symbol":"BTCUSDT","exchange":"BINANCE","interval":"in_5_minute","update_interval":30}"#,
            DEFAULT,
        )
        .unwrap();
        assert_eq!(
            msg,
            ControlMessage::Subscribe {
                key: TopicKey::new("BTCUSDT", "BINANCE", Interval::Min5),
                update_interval: Duration::from_secs(30),
            }
        );
    }

    #[test]
    fn unsubscribe_without_interval_covers_pair() {
        let msg = parse_control(r#"{"action":"unsubscribe","symbol":"AAPL","exchange":"NASDAQ"}"#, DEFAULT).unwrap();
        assert_eq!(
            msg,
            ControlMessage::Unsubscribe {
                symbol: "AAPL".into(),
                exchange: "NASDAQ".into(),
                interval: None,
            }
        );
        assert_eq!(msg.action(), "unsubscribe");
    }

    #[test_case("not json", "Invalid message format" ; "not json")]
    #[test_case("[1,2]", "Invalid message format" ; "array")]
    #[test_case(r#"{"action":"subscribe","update_interval":"30"}"#, "Invalid message format" ; "string interval")]
    #[test_case(r#"{"symbol":"AAPL","exchange":"NASDAQ"}"#, "Missing field: action" ; "no action")]
    #[test_case(r#"{"action":"subscribe","exchange":"NASDAQ"}"#, "Missing field: symbol" ; "no symbol")]
    #[test_case(r#"{"action":"subscribe","symbol":"AAPL","exchange":""}"#, "Missing field: exchange" ; "empty exchange")]
    #[test_case(r#"{"action":"subscribe","symbol":"AAPL","exchange":"NASDAQ","interval":"in_2_minute"}"#, "Invalid interval: in_2_minute" ; "bad interval")]
    #[test_case(r#"{"action":"ping","symbol":"AAPL","exchange":"NASDAQ"}"#, "Unknown action: ping" ; "unknown action")]
    #[test_case(r#"{"action":"subscribe","symbol":"AAPL","exchange":"NASDAQ","update_interval":0}"#, "update_interval must be at least 1 second" ; "zero update")]
    #[test_case(r#"{"action":"subscribe","symbol":"AAPL","exchange":"NASDAQ","update_interval":-5}"#, "update_interval must be at least 1 second" ; "negative update")]
    fn rejects(text: &str, message: &str) {
        let err = parse_control(text, DEFAULT).unwrap_err();
        assert_eq!(err.to_string(), message);
    }
}
