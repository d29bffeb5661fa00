//! Bars, Topic Keys and Snapshots

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Interval;

/// Prices and volumes are rounded to this many decimal places on output.
pub const PRICE_DECIMALS: u32 = 2;

// =============================================================================
// Bar
// =============================================================================

/// One OHLCV bar.
///
/// Field names follow the historical API's column names (`Open`, `High`, ...);
/// lowercase names are accepted on input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time (UTC).
    #[serde(alias = "time", alias = "timestamp")]
    pub datetime: DateTime<Utc>,
    /// Open price.
    #[serde(rename = "Open", alias = "open", with = "rust_decimal::serde::float")]
    pub open: Decimal,
    /// High price.
    #[serde(rename = "High", alias = "high", with = "rust_decimal::serde::float")]
    pub high: Decimal,
    /// Low price.
    #[serde(rename = "Low", alias = "low", with = "rust_decimal::serde::float")]
    pub low: Decimal,
    /// Close price.
    #[serde(rename = "Close", alias = "close", with = "rust_decimal::serde::float")]
    pub close: Decimal,
    /// Traded volume.
    #[serde(rename = "Volume", alias = "volume", with = "rust_decimal::serde::float")]
    pub volume: Decimal,
}

impl Bar {
    /// Copy of this bar with every numeric field rounded to [`PRICE_DECIMALS`].
    #[must_use]
    pub fn rounded(&self) -> Self {
        Self {
            datetime: self.datetime,
            open: self.open.round_dp(PRICE_DECIMALS),
            high: self.high.round_dp(PRICE_DECIMALS),
            low: self.low.round_dp(PRICE_DECIMALS),
            close: self.close.round_dp(PRICE_DECIMALS),
            volume: self.volume.round_dp(PRICE_DECIMALS),
        }
    }
}

// =============================================================================
// Topic Key
// =============================================================================

/// Identity of one polled data stream.
///
/// Symbol and exchange are compared exactly as received; no case folding is
/// applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicKey {
    /// Ticker symbol.
    pub symbol: String,
    /// Exchange code.
    pub exchange: String,
    /// Bar interval.
    pub interval: Interval,
}

impl TopicKey {
    /// Create a topic key.
    pub fn new(symbol: impl Into<String>, exchange: impl Into<String>, interval: Interval) -> Self {
        Self {
            symbol: symbol.into(),
            exchange: exchange.into(),
            interval,
        }
    }

    /// Whether this key belongs to the given symbol and exchange.
    #[must_use]
    pub fn matches(&self, symbol: &str, exchange: &str) -> bool {
        self.symbol == symbol && self.exchange == exchange
    }
}

impl fmt::Display for TopicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.exchange, self.symbol, self.interval)
    }
}

// =============================================================================
// Snapshot
// =============================================================================

/// The most recent bar fetched for a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Topic the bar belongs to.
    pub key: TopicKey,
    /// Latest bar, already rounded.
    pub bar: Bar,
    /// When the poller obtained it.
    pub fetched_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    use super::*;

    fn sample_bar() -> Bar {
        Bar {
            datetime: Utc.with_ymd_and_hms(2024, 3, 1, 14, 30, 0).unwrap(),
            open: dec!(187.123),
            high: dec!(188.555),
            low: dec!(186.004),
            close: dec!(187.995),
            volume: dec!(1200),
        }
    }

    #[test]
    fn rounding_keeps_two_decimals() {
        let bar = sample_bar().rounded();
        assert_eq!(bar.open, dec!(187.12));
        assert_eq!(bar.high, dec!(188.56));
        assert_eq!(bar.low, dec!(186.00));
        assert_eq!(bar.close, dec!(188.00));
    }

    #[test]
    fn serializes_with_column_names() {
        let json = serde_json::to_value(sample_bar().rounded()).unwrap();
        assert_eq!(json["Open"], serde_json::json!(187.12));
        assert_eq!(json["Volume"], serde_json::json!(1200.0));
        assert_eq!(json["datetime"], "2024-03-01T14:30:00Z");
    }

    #[test]
    fn accepts_lowercase_columns() {
        let bar: Bar = serde_json::from_str(
            r#"{"datetime":"2024-03-01T14:30:00Z","open":1.5,"high":2,"low":1,"close":1.75,"volume":10}"#,
        )
        .unwrap();
        assert_eq!(bar.open, dec!(1.5));
        assert_eq!(bar.close, dec!(1.75));
    }

    #[test]
    fn topic_keys_are_case_sensitive() {
        let upper = TopicKey::new("AAPL", "NASDAQ", Interval::Min1);
        let lower = TopicKey::new("aapl", "NASDAQ", Interval::Min1);
        assert_ne!(upper, lower);
        assert!(upper.matches("AAPL", "NASDAQ"));
        assert!(!lower.matches("AAPL", "NASDAQ"));
        assert_eq!(upper.to_string(), "NASDAQ:AAPL:in_1_minute");
    }
}
