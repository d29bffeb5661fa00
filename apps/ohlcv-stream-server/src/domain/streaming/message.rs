//! Outbound Frames
//!
//! Everything the server pushes to a streaming connection. Each variant
//! serializes to a flat JSON object; the client decodes the same types.

use serde::{Deserialize, Serialize};

use super::{Bar, Interval, Snapshot, TopicKey};

/// A frame queued for delivery to one or more connections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundMessage {
    /// Latest bar for a topic.
    Snapshot(SnapshotFrame),
    /// Fetch failure or rejected control message.
    Error(ErrorFrame),
    /// Acknowledgement of a control message.
    Ack(AckFrame),
}

/// Bar columns plus the topic the bar belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFrame {
    /// Ticker symbol.
    pub symbol: String,
    /// Exchange code.
    pub exchange: String,
    /// Bar interval.
    pub interval: Interval,
    /// The bar itself, flattened into the frame.
    #[serde(flatten)]
    pub bar: Bar,
}

/// `{"error": "..."}`, optionally tagged with the topic that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    /// Human-readable error.
    pub error: String,
    /// Symbol of the failing topic, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    /// Exchange of the failing topic, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    /// Interval of the failing topic, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,
}

/// Outcome reported in an [`AckFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    /// Subscription accepted.
    Subscribed,
    /// Subscription removed.
    Unsubscribed,
}

/// Confirmation of a subscribe or unsubscribe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckFrame {
    /// What happened.
    pub status: AckStatus,
    /// Ticker symbol.
    pub symbol: String,
    /// Exchange code.
    pub exchange: String,
    /// Interval, absent when every interval of the pair was removed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,
    /// Requested update interval in seconds (subscribe only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_interval: Option<u64>,
}

impl OutboundMessage {
    /// Frame carrying a snapshot's bar.
    #[must_use]
    pub fn snapshot(snapshot: &Snapshot) -> Self {
        Self::Snapshot(SnapshotFrame {
            symbol: snapshot.key.symbol.clone(),
            exchange: snapshot.key.exchange.clone(),
            interval: snapshot.key.interval,
            bar: snapshot.bar.clone(),
        })
    }

    /// Error frame for a failing topic.
    pub fn topic_error(key: &TopicKey, error: impl Into<String>) -> Self {
        Self::Error(ErrorFrame {
            error: error.into(),
            symbol: Some(key.symbol.clone()),
            exchange: Some(key.exchange.clone()),
            interval: Some(key.interval),
        })
    }

    /// Untagged error frame.
    pub fn error(error: impl Into<String>) -> Self {
        Self::Error(ErrorFrame {
            error: error.into(),
            symbol: None,
            exchange: None,
            interval: None,
        })
    }

    /// Whether this is an error frame.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}
