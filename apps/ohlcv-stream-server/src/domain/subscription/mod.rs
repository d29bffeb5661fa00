//! Topic Registry
//!
//! Tracks which connections subscribe to which topics, and at what
//! update interval.
//!
//! # Design
//!
//! The registry tracks:
//! - Which topics each connection is subscribed to
//! - Each subscriber's requested update interval per topic
//! - The effective cadence of every topic (minimum requested interval)
//!
//! Many connections can subscribe to the same topic while exactly one
//! poller serves it. Every mutation reports how the topic's cadence moved
//! so the caller can start, restart or stop that poller. The registry does
//! no I/O and no locking of its own.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::domain::streaming::{Interval, TopicKey};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a streaming connection.
pub type ConnectionId = u64;

/// How a topic's effective cadence moved after a registry mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CadenceChange {
    /// Cadence is the same as before (or the mutation was a no-op).
    Unchanged,
    /// First subscriber arrived; the topic now polls at this cadence.
    Started(Duration),
    /// The minimum requested interval moved.
    Changed {
        /// Previous cadence.
        from: Duration,
        /// New cadence.
        to: Duration,
    },
    /// Last subscriber left; the topic no longer exists.
    Stopped,
}

impl CadenceChange {
    /// The cadence a poller should now run at, if one must be (re)started.
    #[must_use]
    pub const fn restart_cadence(&self) -> Option<Duration> {
        match self {
            Self::Started(cadence) | Self::Changed { to: cadence, .. } => Some(*cadence),
            Self::Unchanged | Self::Stopped => None,
        }
    }

    /// Whether the mutation requires any poller action.
    #[must_use]
    pub const fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }
}

/// Counts across the whole registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    /// Topics with at least one subscriber.
    pub topics: usize,
    /// Connections holding at least one subscription.
    pub connections: usize,
    /// Total (connection, topic) pairs.
    pub subscriptions: usize,
}

// =============================================================================
// Topic State
// =============================================================================

#[derive(Debug)]
struct TopicState {
    /// Requested update interval per subscriber.
    subscribers: HashMap<ConnectionId, Duration>,
    /// Cached minimum of `subscribers`.
    cadence: Duration,
}

impl TopicState {
    fn new(connection: ConnectionId, interval: Duration) -> Self {
        Self {
            subscribers: HashMap::from([(connection, interval)]),
            cadence: interval,
        }
    }

    /// Recompute the cached cadence and report how it moved.
    fn refresh_cadence(&mut self) -> CadenceChange {
        let Some(min) = self.subscribers.values().min().copied() else {
            return CadenceChange::Stopped;
        };
        if min == self.cadence {
            return CadenceChange::Unchanged;
        }
        let from = std::mem::replace(&mut self.cadence, min);
        CadenceChange::Changed { from, to: min }
    }
}

// =============================================================================
// Topic Registry
// =============================================================================

/// Subscription bookkeeping for every connection and topic.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: HashMap<TopicKey, TopicState>,
    connections: HashMap<ConnectionId, HashSet<TopicKey>>,
}

impl TopicRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `connection` to `key` with the requested update interval.
    ///
    /// Subscribing again to a topic the connection already holds replaces
    /// its previous interval.
    pub fn subscribe(
        &mut self,
        connection: ConnectionId,
        key: TopicKey,
        interval: Duration,
    ) -> CadenceChange {
        self.connections
            .entry(connection)
            .or_default()
            .insert(key.clone());

        match self.topics.entry(key) {
            Entry::Vacant(vacant) => {
                vacant.insert(TopicState::new(connection, interval));
                CadenceChange::Started(interval)
            }
            Entry::Occupied(mut occupied) => {
                let topic = occupied.get_mut();
                topic.subscribers.insert(connection, interval);
                topic.refresh_cadence()
            }
        }
    }

    /// Remove one subscription. Unknown pairs are a no-op.
    pub fn unsubscribe(&mut self, connection: ConnectionId, key: &TopicKey) -> CadenceChange {
        let Some(keys) = self.connections.get_mut(&connection) else {
            return CadenceChange::Unchanged;
        };
        if !keys.remove(key) {
            return CadenceChange::Unchanged;
        }
        if keys.is_empty() {
            self.connections.remove(&connection);
        }
        self.detach(connection, key)
    }

    /// Remove every subscription held by `connection`.
    ///
    /// Returns the topics whose cadence moved, with the movement.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> Vec<(TopicKey, CadenceChange)> {
        let Some(keys) = self.connections.remove(&connection) else {
            return vec![];
        };

        keys.into_iter()
            .filter_map(|key| {
                let change = self.detach(connection, &key);
                (!change.is_unchanged()).then_some((key, change))
            })
            .collect()
    }

    fn detach(&mut self, connection: ConnectionId, key: &TopicKey) -> CadenceChange {
        let Some(topic) = self.topics.get_mut(key) else {
            return CadenceChange::Unchanged;
        };
        if topic.subscribers.remove(&connection).is_none() {
            return CadenceChange::Unchanged;
        }
        let change = topic.refresh_cadence();
        if change == CadenceChange::Stopped {
            self.topics.remove(key);
        }
        change
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    /// Effective cadence of a topic, if it has subscribers.
    #[must_use]
    pub fn cadence(&self, key: &TopicKey) -> Option<Duration> {
        self.topics.get(key).map(|topic| topic.cadence)
    }

    /// Connections currently subscribed to a topic.
    #[must_use]
    pub fn subscribers(&self, key: &TopicKey) -> Vec<ConnectionId> {
        self.topics
            .get(key)
            .map(|topic| topic.subscribers.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Interval a connection requested for a topic.
    #[must_use]
    pub fn requested_interval(&self, connection: ConnectionId, key: &TopicKey) -> Option<Duration> {
        self.topics
            .get(key)
            .and_then(|topic| topic.subscribers.get(&connection).copied())
    }

    /// Topics a connection is subscribed to.
    #[must_use]
    pub fn topics_for(&self, connection: ConnectionId) -> Vec<TopicKey> {
        self.connections
            .get(&connection)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// A connection's topics for a symbol and exchange, optionally narrowed
    /// to one interval.
    #[must_use]
    pub fn matching_topics(
        &self,
        connection: ConnectionId,
        symbol: &str,
        exchange: &str,
        interval: Option<Interval>,
    ) -> Vec<TopicKey> {
        self.connections
            .get(&connection)
            .map(|keys| {
                keys.iter()
                    .filter(|key| key.matches(symbol, exchange))
                    .filter(|key| interval.is_none_or(|i| key.interval == i))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All topics with at least one subscriber.
    #[must_use]
    pub fn topic_keys(&self) -> Vec<TopicKey> {
        self.topics.keys().cloned().collect()
    }

    /// Whether a topic currently exists.
    #[must_use]
    pub fn contains(&self, key: &TopicKey) -> bool {
        self.topics.contains_key(key)
    }

    /// Counts across the registry.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            topics: self.topics.len(),
            connections: self.connections.len(),
            subscriptions: self.connections.values().map(HashSet::len).sum(),
        }
    }
}
