//! Topic Poller
//!
//! One poller task per topic. Each cycle waits for the topic's cadence (or
//! the current backoff delay after a failure), fetches the latest bar and
//! hands the resulting frame to the [`SnapshotSink`].
//!
//! A poller is stopped by cancelling its token. Cancellation is observed
//! both while sleeping and while a fetch is in flight, so a stopped poller
//! never produces another frame.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use super::BarFetcher;
use crate::application::ports::{FetchError, SnapshotSink};
use crate::domain::streaming::{OutboundMessage, TopicKey};
use crate::infrastructure::retry::{RetryConfig, RetryPolicy};

/// Poller tuning shared by every topic.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PollerConfig {
    /// Backoff schedule applied after failed fetches.
    pub backoff: RetryConfig,
}

// =============================================================================
// Poller State
// =============================================================================

/// Live counters for one poller, read by the health endpoint.
#[derive(Debug, Default)]
pub struct PollerState {
    fetches: AtomicU64,
    failures: AtomicU64,
    consecutive_failures: AtomicU32,
    last_success_at: RwLock<Option<DateTime<Utc>>>,
    last_error: RwLock<Option<String>>,
}

impl PollerState {
    fn record_success(&self, at: DateTime<Utc>) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.last_success_at.write() = Some(at);
        *self.last_error.write() = None;
    }

    fn record_failure(&self, error: &FetchError) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        *self.last_error.write() = Some(error.to_string());
    }

    /// Failures since the last successful fetch.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Whether the most recent fetch failed.
    #[must_use]
    pub fn is_failing(&self) -> bool {
        self.consecutive_failures() > 0
    }

    /// Point-in-time copy of the counters.
    #[must_use]
    pub fn status(&self) -> PollerStatus {
        PollerStatus {
            fetches: self.fetches.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures(),
            last_success_at: *self.last_success_at.read(),
            last_error: self.last_error.read().clone(),
        }
    }
}

/// Serializable copy of a [`PollerState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollerStatus {
    /// Fetches attempted.
    pub fetches: u64,
    /// Fetches that failed.
    pub failures: u64,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// Time of the last successful fetch.
    pub last_success_at: Option<DateTime<Utc>>,
    /// Message of the last failure, cleared on success.
    pub last_error: Option<String>,
}

// =============================================================================
// Poller Handle
// =============================================================================

/// Owner's handle on a running poller.
#[derive(Debug)]
pub struct PollerHandle {
    generation: u64,
    cadence: Duration,
    cancel: CancellationToken,
    state: Arc<PollerState>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    /// Generation number the poller tags its frames with.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Cadence the poller was started with.
    #[must_use]
    pub const fn cadence(&self) -> Duration {
        self.cadence
    }

    /// Live counters.
    #[must_use]
    pub fn state(&self) -> &Arc<PollerState> {
        &self.state
    }

    /// Cancel the poller. The returned handle resolves once the task exits.
    pub fn stop(self) -> JoinHandle<()> {
        self.cancel.cancel();
        self.task
    }
}

// =============================================================================
// Poller Task
// =============================================================================

struct Poller {
    key: TopicKey,
    cadence: Duration,
    generation: u64,
    fetcher: Arc<BarFetcher>,
    sink: Weak<dyn SnapshotSink>,
    backoff: RetryPolicy,
    cancel: CancellationToken,
    state: Arc<PollerState>,
}

/// Spawn a poller for `key`. Its token is a child of `parent`.
pub(crate) fn spawn(
    key: TopicKey,
    cadence: Duration,
    generation: u64,
    fetcher: Arc<BarFetcher>,
    sink: Weak<dyn SnapshotSink>,
    config: &PollerConfig,
    parent: &CancellationToken,
) -> PollerHandle {
    let cancel = parent.child_token();
    let state = Arc::new(PollerState::default());
    let span = info_span!("poller", topic = %key, generation);

    let poller = Poller {
        key,
        cadence,
        generation,
        fetcher,
        sink,
        backoff: RetryPolicy::new(config.backoff.clone()),
        cancel: cancel.clone(),
        state: Arc::clone(&state),
    };
    let task = tokio::spawn(poller.run().instrument(span));

    PollerHandle {
        generation,
        cadence,
        cancel,
        state,
        task,
    }
}

impl Poller {
    async fn run(mut self) {
        info!(cadence_secs = self.cadence.as_secs(), "Poller started");
        let mut delay = self.cadence;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }

            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                outcome = self.fetcher.fetch_snapshot(&self.key) => outcome,
            };

            let Some(sink) = self.sink.upgrade() else {
                break;
            };

            let message = match outcome {
                Ok(snapshot) => {
                    self.backoff.reset();
                    self.state.record_success(snapshot.fetched_at);
                    delay = self.cadence;
                    OutboundMessage::snapshot(&snapshot)
                }
                Err(error) => {
                    self.state.record_failure(&error);
                    delay = self.backoff.next_delay().unwrap_or(self.cadence);
                    warn!(
                        error = %error,
                        consecutive_failures = self.state.consecutive_failures(),
                        retry_in_secs = delay.as_secs_f64(),
                        "Fetch failed"
                    );
                    OutboundMessage::topic_error(&self.key, error.to_string())
                }
            };

            if sink.publish_from(&self.key, self.generation, message).is_none() {
                debug!("Poller superseded");
                break;
            }
        }

        info!("Poller stopped");
    }
}
