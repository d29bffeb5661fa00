//! Stream Hub
//!
//! Owns every streaming connection's outbound queue, the topic registry and
//! one poller per topic, all behind a single lock.
//!
//! # Design
//!
//! Registry mutations and poller start/stop happen under the same write
//! lock, so a topic can never have two live pollers and a stopped topic can
//! never be restarted by a stale caller. Each poller is tagged with a
//! generation number; frames from a generation that is no longer current
//! are discarded under the read lock, so nothing is dispatched for a topic
//! after it stops.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use super::poller::{self, PollerConfig, PollerHandle, PollerStatus};
use super::BarFetcher;
use crate::application::ports::{DispatchReport, SnapshotSink};
use crate::domain::streaming::{Interval, OutboundMessage, TopicKey};
use crate::domain::subscription::{CadenceChange, ConnectionId, TopicRegistry};
use crate::infrastructure::broadcast::{OutboundQueue, fan_out};
use crate::infrastructure::metrics;

// =============================================================================
// Configuration & Errors
// =============================================================================

/// Hub tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    /// Capacity of each connection's outbound queue.
    pub queue_capacity: usize,
    /// Settings handed to every poller.
    pub poller: PollerConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            poller: PollerConfig::default(),
        }
    }
}

/// Errors from hub operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The connection was never opened or is already removed.
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// The hub is shutting down and accepts no new work.
    #[error("stream hub is shutting down")]
    ShuttingDown,
}

// =============================================================================
// Statistics
// =============================================================================

/// Hub-wide counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Open connections.
    pub connections: usize,
    /// Topics with at least one subscriber.
    pub topics: usize,
    /// Total (connection, topic) pairs.
    pub subscriptions: usize,
    /// Running pollers (always equal to `topics`).
    pub pollers: usize,
    /// Topics whose latest fetch failed.
    pub failing_topics: usize,
    /// Frames dropped by full queues since startup.
    pub frames_dropped: u64,
}

/// Per-topic view for the health endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicStatus {
    /// `exchange:symbol:interval`.
    pub topic: String,
    /// Effective cadence in seconds.
    pub cadence_secs: u64,
    /// Number of subscribed connections.
    pub subscribers: usize,
    /// Poller counters.
    pub poller: PollerStatus,
}

// =============================================================================
// Hub
// =============================================================================

#[derive(Debug, Default)]
struct HubState {
    registry: TopicRegistry,
    sessions: HashMap<ConnectionId, Arc<OutboundQueue>>,
    pollers: HashMap<TopicKey, PollerHandle>,
    next_generation: u64,
}

/// Central coordinator for streaming connections.
pub struct StreamHub {
    state: RwLock<HubState>,
    fetcher: Arc<BarFetcher>,
    config: HubConfig,
    shutdown: CancellationToken,
    frames_dropped: AtomicU64,
    this: Weak<Self>,
}

impl std::fmt::Debug for StreamHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHub")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl StreamHub {
    /// Create a hub. Pollers are children of `shutdown`.
    #[must_use]
    pub fn new(fetcher: Arc<BarFetcher>, config: HubConfig, shutdown: CancellationToken) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            state: RwLock::new(HubState::default()),
            fetcher,
            config,
            shutdown,
            frames_dropped: AtomicU64::new(0),
            this: this.clone(),
        })
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Register a new connection and return its id and outbound queue.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ShuttingDown`] once shutdown has begun.
    pub fn open_connection(&self) -> Result<(ConnectionId, Arc<OutboundQueue>), HubError> {
        if self.shutdown.is_cancelled() {
            return Err(HubError::ShuttingDown);
        }

        let queue = Arc::new(OutboundQueue::new(self.config.queue_capacity));
        let mut state = self.state.write();
        let id = loop {
            let candidate = Uuid::new_v4().as_u64_pair().0;
            if !state.sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        state.sessions.insert(id, Arc::clone(&queue));
        metrics::set_connections(state.sessions.len());
        drop(state);

        debug!(connection = id, "Connection opened");
        Ok((id, queue))
    }

    /// Subscribe a connection to a topic at the requested update interval.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::UnknownConnection`] if the connection is not open,
    /// or [`HubError::ShuttingDown`] once shutdown has begun.
    pub fn subscribe(
        &self,
        connection: ConnectionId,
        key: TopicKey,
        update_interval: Duration,
    ) -> Result<CadenceChange, HubError> {
        if self.shutdown.is_cancelled() {
            return Err(HubError::ShuttingDown);
        }

        let mut state = self.state.write();
        if !state.sessions.contains_key(&connection) {
            return Err(HubError::UnknownConnection(connection));
        }

        let change = state.registry.subscribe(connection, key.clone(), update_interval);
        self.apply_change(&mut state, &key, change);
        drop(state);

        debug!(connection, topic = %key, ?change, "Subscribed");
        Ok(change)
    }

    /// Remove one subscription. Unknown pairs are a no-op.
    pub fn unsubscribe(&self, connection: ConnectionId, key: &TopicKey) -> CadenceChange {
        let mut state = self.state.write();
        let change = state.registry.unsubscribe(connection, key);
        self.apply_change(&mut state, key, change);
        drop(state);

        debug!(connection, topic = %key, ?change, "Unsubscribed");
        change
    }

    /// Remove a connection's subscriptions for a symbol and exchange,
    /// optionally narrowed to one interval. Returns the removed topics.
    pub fn unsubscribe_matching(
        &self,
        connection: ConnectionId,
        symbol: &str,
        exchange: &str,
        interval: Option<Interval>,
    ) -> Vec<TopicKey> {
        let mut state = self.state.write();
        let keys = state
            .registry
            .matching_topics(connection, symbol, exchange, interval);
        for key in &keys {
            let change = state.registry.unsubscribe(connection, key);
            self.apply_change(&mut state, key, change);
        }
        keys
    }

    /// Remove a connection and every subscription it holds.
    ///
    /// Returns `false` if the connection was already removed.
    pub fn remove_connection(&self, connection: ConnectionId) -> bool {
        let mut state = self.state.write();
        let Some(queue) = state.sessions.remove(&connection) else {
            return false;
        };
        queue.close();

        for (key, change) in state.registry.remove_connection(connection) {
            self.apply_change(&mut state, &key, change);
        }
        metrics::set_connections(state.sessions.len());
        drop(state);

        debug!(connection, "Connection removed");
        true
    }

    /// Fan a frame out to every current subscriber of `key`.
    pub fn publish(&self, key: &TopicKey, message: OutboundMessage) -> DispatchReport {
        let state = self.state.read();
        self.dispatch(&state, key, message)
    }

    /// Push a frame to one connection only.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::UnknownConnection`] if the connection is not open.
    pub fn send_to(&self, connection: ConnectionId, message: OutboundMessage) -> Result<(), HubError> {
        let state = self.state.read();
        let queue = state
            .sessions
            .get(&connection)
            .ok_or(HubError::UnknownConnection(connection))?;
        let report = fan_out([queue], &Arc::new(message));
        self.count_drops(&report);
        Ok(())
    }

    /// Stop every poller and close every queue.
    ///
    /// Connections are not removed here; each session observes the shutdown
    /// token and removes itself.
    pub fn shutdown(&self) {
        self.shutdown.cancel();

        let mut state = self.state.write();
        let pollers = state.pollers.len();
        for (_, handle) in state.pollers.drain() {
            drop(handle.stop());
            metrics::record_poller_stopped();
        }
        for queue in state.sessions.values() {
            queue.close();
        }
        metrics::set_pollers(0);
        drop(state);

        info!(pollers, "Stream hub shut down");
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Hub-wide counts.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let state = self.state.read();
        let registry = state.registry.stats();
        HubStats {
            connections: state.sessions.len(),
            topics: registry.topics,
            subscriptions: registry.subscriptions,
            pollers: state.pollers.len(),
            failing_topics: state
                .pollers
                .values()
                .filter(|handle| handle.state().is_failing())
                .count(),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }

    /// Per-topic status, sorted by topic name.
    #[must_use]
    pub fn topic_statuses(&self) -> Vec<TopicStatus> {
        let state = self.state.read();
        let mut statuses: Vec<_> = state
            .pollers
            .iter()
            .map(|(key, handle)| TopicStatus {
                topic: key.to_string(),
                cadence_secs: handle.cadence().as_secs(),
                subscribers: state.registry.subscribers(key).len(),
                poller: handle.state().status(),
            })
            .collect();
        statuses.sort_by(|a, b| a.topic.cmp(&b.topic));
        statuses
    }

    /// Effective cadence of a topic's running poller.
    #[must_use]
    pub fn poller_cadence(&self, key: &TopicKey) -> Option<Duration> {
        self.state.read().pollers.get(key).map(PollerHandle::cadence)
    }

    /// Generation of a topic's running poller.
    #[must_use]
    pub fn poller_generation(&self, key: &TopicKey) -> Option<u64> {
        self.state.read().pollers.get(key).map(PollerHandle::generation)
    }

    /// Topics a connection is subscribed to.
    #[must_use]
    pub fn topics_for(&self, connection: ConnectionId) -> Vec<TopicKey> {
        self.state.read().registry.topics_for(connection)
    }

    /// Identities of every open connection.
    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.state.read().sessions.keys().copied().collect()
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn apply_change(&self, state: &mut HubState, key: &TopicKey, change: CadenceChange) {
        match change {
            CadenceChange::Unchanged => return,
            CadenceChange::Stopped => {
                if let Some(handle) = state.pollers.remove(key) {
                    drop(handle.stop());
                    metrics::record_poller_stopped();
                    info!(topic = %key, "Topic stopped");
                }
            }
            CadenceChange::Started(cadence) | CadenceChange::Changed { to: cadence, .. } => {
                if let Some(handle) = state.pollers.remove(key) {
                    drop(handle.stop());
                    metrics::record_poller_stopped();
                }
                if self.shutdown.is_cancelled() {
                    return;
                }
                state.next_generation += 1;
                let sink: Weak<dyn SnapshotSink> = self.this.clone();
                let handle = poller::spawn(
                    key.clone(),
                    cadence,
                    state.next_generation,
                    Arc::clone(&self.fetcher),
                    sink,
                    &self.config.poller,
                    &self.shutdown,
                );
                state.pollers.insert(key.clone(), handle);
                metrics::record_poller_started();
                info!(topic = %key, cadence_secs = cadence.as_secs(), "Topic polling at new cadence");
            }
        }
        metrics::set_pollers(state.pollers.len());
        metrics::set_topics(state.registry.stats().topics);
    }

    fn dispatch(&self, state: &HubState, key: &TopicKey, message: OutboundMessage) -> DispatchReport {
        let frame = Arc::new(message);
        let subscribers = state.registry.subscribers(key);
        let queues = subscribers
            .iter()
            .filter_map(|connection| state.sessions.get(connection));
        let report = fan_out(queues, &frame);
        self.count_drops(&report);
        report
    }

    fn count_drops(&self, report: &DispatchReport) {
        if report.dropped_oldest > 0 {
            self.frames_dropped
                .fetch_add(u64::try_from(report.dropped_oldest).unwrap_or(u64::MAX), Ordering::Relaxed);
        }
    }
}

impl SnapshotSink for StreamHub {
    fn publish_from(
        &self,
        key: &TopicKey,
        generation: u64,
        message: OutboundMessage,
    ) -> Option<DispatchReport> {
        let state = self.state.read();
        let live = state
            .pollers
            .get(key)
            .is_some_and(|handle| handle.generation() == generation);
        if !live {
            return None;
        }
        Some(self.dispatch(&state, key, message))
    }
}
