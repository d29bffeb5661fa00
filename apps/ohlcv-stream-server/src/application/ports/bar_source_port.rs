//! Bar Source Port (Driven Port)
//!
//! Interface for retrieving historical OHLCV bars from the upstream
//! provider. Requests always name a native interval.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::streaming::{Bar, Interval};

/// A request for the most recent `n_bars` bars of a series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BarRequest {
    /// Ticker symbol.
    pub symbol: String,
    /// Exchange code.
    pub exchange: String,
    /// Native interval to fetch.
    pub interval: Interval,
    /// Number of bars wanted, newest last.
    pub n_bars: u32,
    /// Futures contract selector, passed through untouched.
    pub fut_contract: Option<u32>,
}

/// Errors from the upstream bar source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The fetch exceeded its deadline.
    #[error("upstream fetch timed out after {0:?}")]
    Timeout(Duration),

    /// The upstream does not know the symbol/exchange pair.
    #[error("no data found for {symbol} on {exchange}")]
    NotFound {
        /// Requested symbol.
        symbol: String,
        /// Requested exchange.
        exchange: String,
    },

    /// The upstream answered with zero bars.
    #[error("upstream returned no bars for {symbol} on {exchange}")]
    NoData {
        /// Requested symbol.
        symbol: String,
        /// Requested exchange.
        exchange: String,
    },

    /// The upstream rejected the query parameters.
    #[error("upstream rejected query: {0}")]
    InvalidQuery(String),

    /// Transport or server failure.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    /// The response body could not be decoded.
    #[error("failed to decode upstream response: {0}")]
    Decode(String),
}

impl FetchError {
    /// Short label used for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::NotFound { .. } => "not_found",
            Self::NoData { .. } => "no_data",
            Self::InvalidQuery(_) => "invalid_query",
            Self::Unavailable(_) => "unavailable",
            Self::Decode(_) => "decode",
        }
    }
}

/// Port for fetching historical bars.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BarSource: Send + Sync {
    /// Fetch bars for a native interval, oldest first.
    async fn fetch_bars(&self, request: &BarRequest) -> Result<Vec<Bar>, FetchError>;
}

/// In-memory implementation for testing.
///
/// Serves scripted responses in order; once the script runs out, the
/// fallback response is repeated. An optional delay is applied before each
/// response so timeouts can be exercised.
#[derive(Debug)]
pub struct InMemoryBarSource {
    script: Mutex<VecDeque<Result<Vec<Bar>, FetchError>>>,
    fallback: Mutex<Result<Vec<Bar>, FetchError>>,
    delay: Mutex<Option<Duration>>,
    requests: Mutex<Vec<BarRequest>>,
}

impl InMemoryBarSource {
    /// Source that always returns `bars`.
    #[must_use]
    pub fn new(bars: Vec<Bar>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Ok(bars)),
            delay: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a one-off response ahead of the fallback.
    pub fn push_response(&self, response: Result<Vec<Bar>, FetchError>) {
        self.script.lock().push_back(response);
    }

    /// Replace the response returned once the script is exhausted.
    pub fn set_fallback(&self, response: Result<Vec<Bar>, FetchError>) {
        *self.fallback.lock() = response;
    }

    /// Delay every response by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    /// Requests received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<BarRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests received so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl BarSource for InMemoryBarSource {
    async fn fetch_bars(&self, request: &BarRequest) -> Result<Vec<Bar>, FetchError> {
        self.requests.lock().push(request.clone());

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self.script.lock().pop_front();
        scripted.unwrap_or_else(|| self.fallback.lock().clone())
    }
}
