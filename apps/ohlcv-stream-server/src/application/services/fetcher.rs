//! Bar Fetcher
//!
//! Wraps a [`BarSource`] with a deadline and turns native bars into the
//! requested interval: synthetic intervals are resampled, and every bar is
//! rounded before it leaves the service.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::debug;

use crate::application::ports::{BarRequest, BarSource, FetchError};
use crate::domain::streaming::{Bar, Interval, Snapshot, TopicKey, resample};
use crate::infrastructure::metrics::{self, FetchOutcome};

/// A request for a series in any supported interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesRequest {
    /// Ticker symbol.
    pub symbol: String,
    /// Exchange code.
    pub exchange: String,
    /// Interval, native or synthetic.
    pub interval: Interval,
    /// Number of native bars to fetch upstream.
    pub n_bars: u32,
    /// Futures contract selector.
    pub fut_contract: Option<u32>,
}

/// Upstream fetcher shared by pollers and the history endpoint.
pub struct BarFetcher {
    source: Arc<dyn BarSource>,
    timeout: Duration,
}

impl std::fmt::Debug for BarFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarFetcher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl BarFetcher {
    /// Create a fetcher with the given per-fetch deadline.
    #[must_use]
    pub fn new(source: Arc<dyn BarSource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    /// Fetch a series, resampled to the requested interval and rounded.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Timeout`] when the deadline passes,
    /// [`FetchError::NoData`] when upstream returns zero bars, and any error
    /// reported by the source otherwise.
    pub async fn fetch_series(&self, request: &SeriesRequest) -> Result<Vec<Bar>, FetchError> {
        let plan = request.interval.upstream_plan();
        let upstream = BarRequest {
            symbol: request.symbol.clone(),
            exchange: request.exchange.clone(),
            interval: plan.native,
            n_bars: request.n_bars,
            fut_contract: request.fut_contract,
        };

        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.source.fetch_bars(&upstream)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.timeout)),
        };
        let result = result.and_then(|bars| {
            if bars.is_empty() {
                Err(FetchError::NoData {
                    symbol: request.symbol.clone(),
                    exchange: request.exchange.clone(),
                })
            } else {
                Ok(bars)
            }
        });

        let outcome = match &result {
            Ok(_) => FetchOutcome::Success,
            Err(e) => FetchOutcome::Failure(e.kind()),
        };
        metrics::record_fetch(outcome, started.elapsed());

        let bars = result?;
        debug!(
            symbol = %request.symbol,
            exchange = %request.exchange,
            interval = %request.interval,
            native = %plan.native,
            received = bars.len(),
            "Fetched upstream bars"
        );

        let bars = match plan.bucket() {
            Some(bucket) => resample(&bars, bucket),
            None => {
                let mut bars = bars;
                bars.sort_by_key(|bar| bar.datetime);
                bars
            }
        };
        Ok(bars.iter().map(Bar::rounded).collect())
    }

    /// Fetch the latest bar for a topic.
    ///
    /// Synthetic intervals fetch exactly one bucket's worth of native bars.
    ///
    /// # Errors
    ///
    /// Same as [`fetch_series`](Self::fetch_series).
    pub async fn fetch_snapshot(&self, key: &TopicKey) -> Result<Snapshot, FetchError> {
        let request = SeriesRequest {
            symbol: key.symbol.clone(),
            exchange: key.exchange.clone(),
            interval: key.interval,
            n_bars: key.interval.upstream_plan().factor,
            fut_contract: None,
        };

        let bars = self.fetch_series(&request).await?;
        let bar = bars.into_iter().last().ok_or_else(|| FetchError::NoData {
            symbol: key.symbol.clone(),
            exchange: key.exchange.clone(),
        })?;

        Ok(Snapshot {
            key: key.clone(),
            bar,
            fetched_at: Utc::now(),
        })
    }
}
