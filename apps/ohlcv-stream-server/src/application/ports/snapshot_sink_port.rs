//! Snapshot Sink Port
//!
//! Pollers hand every frame they produce to a sink, tagged with the
//! poller generation that produced it. The sink decides whether the
//! generation is still current and fans the frame out.

use crate::domain::streaming::{OutboundMessage, TopicKey};

/// Result of fanning one frame out to a topic's subscribers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Queues that accepted the frame.
    pub delivered: usize,
    /// Queues that had to discard their oldest frame to make room.
    pub dropped_oldest: usize,
    /// Queues already closed.
    pub closed: usize,
}

impl DispatchReport {
    /// Total queues the frame was offered to.
    #[must_use]
    pub const fn recipients(&self) -> usize {
        self.delivered + self.closed
    }
}

/// Receives frames produced by pollers.
pub trait SnapshotSink: Send + Sync {
    /// Dispatch `message` for `key` if `generation` is still the topic's
    /// live poller. Returns `None` when the frame was discarded as stale.
    fn publish_from(
        &self,
        key: &TopicKey,
        generation: u64,
        message: OutboundMessage,
    ) -> Option<DispatchReport>;
}
