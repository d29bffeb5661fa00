//! Prometheus Metrics Module
//!
//! Exposes application metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Polling**: Upstream fetches by outcome, fetch latency, live pollers
//! - **Dispatch**: Frames enqueued and frames dropped by full queues
//! - **Connections**: Open streaming connections and active topics
//! - **History**: Historical fetch requests by outcome
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder, or return the one already installed.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed (for example when a
/// different global recorder is already present).
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "stream_server_fetches_total",
        "Upstream bar fetches made by pollers, by outcome"
    );
    describe_histogram!(
        "stream_server_fetch_duration_seconds",
        "Time taken by upstream bar fetches"
    );
    describe_gauge!("stream_server_pollers", "Number of running topic pollers");
    describe_counter!(
        "stream_server_poller_starts_total",
        "Pollers started (first subscriber or cadence change)"
    );
    describe_counter!(
        "stream_server_poller_stops_total",
        "Pollers stopped (teardown, cadence change or shutdown)"
    );

    describe_counter!(
        "stream_server_frames_enqueued_total",
        "Frames accepted into connection queues"
    );
    describe_counter!(
        "stream_server_frames_dropped_total",
        "Frames discarded because a connection queue was full"
    );

    describe_gauge!(
        "stream_server_connections",
        "Number of open streaming connections"
    );
    describe_gauge!("stream_server_topics", "Number of topics with subscribers");
    describe_counter!(
        "stream_server_control_messages_total",
        "Control messages received by action"
    );
    describe_counter!(
        "stream_server_control_errors_total",
        "Rejected control messages by reason"
    );

    describe_counter!(
        "stream_server_history_requests_total",
        "Historical fetch requests by outcome"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for an upstream fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Bars were returned.
    Success,
    /// The fetch failed; the label carries the error kind.
    Failure(&'static str),
}

impl FetchOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure(kind) => kind,
        }
    }
}

/// Record one upstream fetch and its duration.
pub fn record_fetch(outcome: FetchOutcome, duration: Duration) {
    counter!("stream_server_fetches_total", "outcome" => outcome.as_str()).increment(1);
    histogram!("stream_server_fetch_duration_seconds").record(duration.as_secs_f64());
}

/// Update the running poller count.
#[allow(clippy::cast_precision_loss)]
pub fn set_pollers(count: usize) {
    gauge!("stream_server_pollers").set(count as f64);
}

/// Record a poller start.
pub fn record_poller_started() {
    counter!("stream_server_poller_starts_total").increment(1);
}

/// Record a poller stop.
pub fn record_poller_stopped() {
    counter!("stream_server_poller_stops_total").increment(1);
}

/// Record frames accepted into connection queues.
pub fn record_frames_enqueued(count: u64) {
    counter!("stream_server_frames_enqueued_total").increment(count);
}

/// Record frames discarded by full connection queues.
pub fn record_frames_dropped(count: u64) {
    counter!("stream_server_frames_dropped_total").increment(count);
}

/// Update the open connection count.
#[allow(clippy::cast_precision_loss)]
pub fn set_connections(count: usize) {
    gauge!("stream_server_connections").set(count as f64);
}

/// Update the active topic count.
#[allow(clippy::cast_precision_loss)]
pub fn set_topics(count: usize) {
    gauge!("stream_server_topics").set(count as f64);
}

/// Record an accepted control message.
pub fn record_control_message(action: &'static str) {
    counter!("stream_server_control_messages_total", "action" => action).increment(1);
}

/// Record a rejected control message.
pub fn record_control_error(reason: &'static str) {
    counter!("stream_server_control_errors_total", "reason" => reason).increment(1);
}

/// Record a historical fetch request.
pub fn record_history_request(outcome: &'static str) {
    counter!("stream_server_history_requests_total", "outcome" => outcome).increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_outcome_labels() {
        assert_eq!(FetchOutcome::Success.as_str(), "success");
        assert_eq!(FetchOutcome::Failure("timeout").as_str(), "timeout");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_fetch(FetchOutcome::Success, Duration::from_millis(5));
        record_frames_dropped(3);
        set_connections(2);
    }
}
