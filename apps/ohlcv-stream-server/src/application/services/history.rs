//! History Service
//!
//! One-shot historical fetches: validate the query, fetch through the
//! shared [`BarFetcher`], and classify failures for the HTTP layer.

use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::{BarFetcher, SeriesRequest};
use crate::application::ports::FetchError;
use crate::domain::streaming::{Bar, Interval};
use crate::infrastructure::metrics;

/// Bars returned when `n_bars` is not given.
pub const DEFAULT_HISTORY_BARS: u32 = 5000;

/// A validated historical query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    /// Ticker symbol.
    pub symbol: String,
    /// Exchange code.
    pub exchange: String,
    /// Interval (defaults to daily).
    pub interval: Interval,
    /// Native bars to request upstream.
    pub n_bars: u32,
    /// Futures contract selector.
    pub fut_contract: Option<u32>,
}

impl HistoryRequest {
    /// Validate raw query values.
    ///
    /// # Errors
    ///
    /// Returns [`HistoryError::InvalidRequest`] for a missing symbol or
    /// exchange, an unknown interval, or a non-positive bar count.
    pub fn parse(
        symbol: Option<&str>,
        exchange: Option<&str>,
        interval: Option<&str>,
        n_bars: Option<&str>,
        fut_contract: Option<&str>,
    ) -> Result<Self, HistoryError> {
        let symbol = required("symbol", symbol)?;
        let exchange = required("exchange", exchange)?;

        let interval = match interval.filter(|v| !v.is_empty()) {
            Some(raw) => raw.parse::<Interval>().map_err(|_| {
                HistoryError::InvalidRequest(format!("Invalid 'interval' value: {raw}"))
            })?,
            None => Interval::Daily,
        };

        let n_bars = match n_bars.filter(|v| !v.is_empty()) {
            Some(raw) => raw
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    HistoryError::InvalidRequest(format!("Invalid 'n_bars' value: {raw}"))
                })?,
            None => DEFAULT_HISTORY_BARS,
        };

        let fut_contract = fut_contract
            .filter(|v| !v.is_empty())
            .map(|raw| {
                raw.parse::<u32>().map_err(|_| {
                    HistoryError::InvalidRequest(format!("Invalid 'fut_contract' value: {raw}"))
                })
            })
            .transpose()?;

        Ok(Self {
            symbol,
            exchange,
            interval,
            n_bars,
            fut_contract,
        })
    }
}

fn required(field: &str, value: Option<&str>) -> Result<String, HistoryError> {
    value
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| HistoryError::InvalidRequest(format!("Missing required parameter: {field}")))
}

/// Body of a successful historical fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryResponse {
    /// Symbol as requested.
    pub symbol: String,
    /// Bars, oldest first.
    pub data: Vec<Bar>,
}

/// Historical fetch failures, classified for the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    /// The query is malformed or the upstream rejected it.
    #[error("{0}")]
    InvalidRequest(String),

    /// No bars exist for the pair.
    #[error("No data found for symbol {symbol} on exchange {exchange}")]
    NotFound {
        /// Requested symbol.
        symbol: String,
        /// Requested exchange.
        exchange: String,
    },

    /// Upstream failed, timed out or returned garbage.
    #[error("Error: {0}")]
    Upstream(String),
}

impl HistoryError {
    fn from_fetch(error: FetchError, request: &HistoryRequest) -> Self {
        match error {
            FetchError::NotFound { .. } | FetchError::NoData { .. } => Self::NotFound {
                symbol: request.symbol.clone(),
                exchange: request.exchange.clone(),
            },
            FetchError::InvalidQuery(message) => Self::InvalidRequest(message),
            other @ (FetchError::Timeout(_) | FetchError::Unavailable(_) | FetchError::Decode(_)) => {
                Self::Upstream(other.to_string())
            }
        }
    }

    /// Short label used for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotFound { .. } => "not_found",
            Self::Upstream(_) => "upstream_unavailable",
        }
    }
}

/// Serves historical queries.
#[derive(Debug)]
pub struct HistoryService {
    fetcher: Arc<BarFetcher>,
}

impl HistoryService {
    /// Create a service sharing the given fetcher.
    #[must_use]
    pub const fn new(fetcher: Arc<BarFetcher>) -> Self {
        Self { fetcher }
    }

    /// Fetch a series.
    ///
    /// # Errors
    ///
    /// See [`HistoryError`].
    pub async fn fetch(&self, request: &HistoryRequest) -> Result<HistoryResponse, HistoryError> {
        let series = SeriesRequest {
            symbol: request.symbol.clone(),
            exchange: request.exchange.clone(),
            interval: request.interval,
            n_bars: request.n_bars,
            fut_contract: request.fut_contract,
        };

        match self.fetcher.fetch_series(&series).await {
            Ok(data) => {
                metrics::record_history_request("success");
                info!(
                    symbol = %request.symbol,
                    exchange = %request.exchange,
                    interval = %request.interval,
                    bars = data.len(),
                    "Served historical fetch"
                );
                Ok(HistoryResponse {
                    symbol: request.symbol.clone(),
                    data,
                })
            }
            Err(error) => {
                let error = HistoryError::from_fetch(error, request);
                metrics::record_history_request(error.kind());
                warn!(symbol = %request.symbol, exchange = %request.exchange, error = %error, "Historical fetch failed");
                Err(error)
            }
        }
    }
}
