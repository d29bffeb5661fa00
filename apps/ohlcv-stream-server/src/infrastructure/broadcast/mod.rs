//! Outbound Queues
//!
//! Per-connection bounded queues with drop-oldest overflow, and the fan-out
//! that offers one frame to many queues.
//!
//! # Architecture
//!
//! Every streaming connection owns one `OutboundQueue`. Producers (pollers
//! and the connection's own control handler) push without ever blocking;
//! when the queue is full the oldest frame is discarded. The connection's
//! writer task is the only consumer.
//!
//! Frames are shared as `Arc<OutboundMessage>`, so fanning one snapshot out
//! to many connections clones a pointer, not the payload.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::application::ports::DispatchReport;
use crate::domain::streaming::OutboundMessage;
use crate::infrastructure::metrics;

/// A frame as stored in a queue.
pub type SharedFrame = Arc<OutboundMessage>;

// =============================================================================
// Outbound Queue
// =============================================================================

/// What happened to a pushed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored without displacing anything.
    Queued,
    /// Stored after discarding the oldest frame.
    DroppedOldest,
    /// The queue is closed; the frame was discarded.
    Closed,
}

#[derive(Debug, Default)]
struct QueueInner {
    frames: VecDeque<SharedFrame>,
    closed: bool,
}

/// Bounded FIFO of frames awaiting delivery to one connection.
#[derive(Debug)]
pub struct OutboundQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl OutboundQueue {
    /// Create a queue holding at most `capacity` frames (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(QueueInner {
                frames: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            notify: Notify::new(),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a frame. Never blocks.
    pub fn push(&self, frame: SharedFrame) -> PushOutcome {
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return PushOutcome::Closed;
            }
            let outcome = if inner.frames.len() >= self.capacity {
                inner.frames.pop_front();
                PushOutcome::DroppedOldest
            } else {
                PushOutcome::Queued
            };
            inner.frames.push_back(frame);
            outcome
        };

        if outcome == PushOutcome::DroppedOldest {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            metrics::record_frames_dropped(1);
        }
        self.notify.notify_one();
        outcome
    }

    /// Wait for the next frame.
    ///
    /// Frames already queued are still returned after [`close`](Self::close);
    /// `None` means the queue is closed and empty.
    pub async fn recv(&self) -> Option<SharedFrame> {
        loop {
            {
                let mut inner = self.inner.lock();
                if let Some(frame) = inner.frames.pop_front() {
                    return Some(frame);
                }
                if inner.closed {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    /// Take the next frame if one is ready.
    #[must_use]
    pub fn try_recv(&self) -> Option<SharedFrame> {
        self.inner.lock().frames.pop_front()
    }

    /// Stop accepting frames and wake the consumer.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.notify.notify_one();
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Frames waiting for delivery.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    /// Whether no frames are waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum frames held at once.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames discarded by overflow over the queue's lifetime.
    #[must_use]
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Fan-out
// =============================================================================

/// Offer one frame to every queue in `queues`.
pub fn fan_out<'a>(
    queues: impl IntoIterator<Item = &'a Arc<OutboundQueue>>,
    frame: &SharedFrame,
) -> DispatchReport {
    let mut report = DispatchReport::default();
    for queue in queues {
        match queue.push(Arc::clone(frame)) {
            PushOutcome::Queued => report.delivered += 1,
            PushOutcome::DroppedOldest => {
                report.delivered += 1;
                report.dropped_oldest += 1;
            }
            PushOutcome::Closed => report.closed += 1,
        }
    }
    metrics::record_frames_enqueued(u64::try_from(report.delivered).unwrap_or(u64::MAX));
    report
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn frame(n: usize) -> SharedFrame {
        Arc::new(OutboundMessage::error(format!("frame {n}")))
    }

    fn label(frame: &SharedFrame) -> String {
        match frame.as_ref() {
            OutboundMessage::Error(e) => e.error.clone(),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn overflow_keeps_most_recent_frames() {
        let queue = OutboundQueue::new(10);
        for n in 0..15 {
            queue.push(frame(n));
        }

        assert_eq!(queue.len(), 10);
        assert_eq!(queue.dropped_count(), 5);

        let received: Vec<_> = std::iter::from_fn(|| queue.try_recv()).map(|f| label(&f)).collect();
        let expected: Vec<_> = (5..15).map(|n| format!("frame {n}")).collect();
        assert_eq!(received, expected);
    }

    #[test]
    fn push_reports_displacement() {
        let queue = OutboundQueue::new(1);
        assert_eq!(queue.push(frame(0)), PushOutcome::Queued);
        assert_eq!(queue.push(frame(1)), PushOutcome::DroppedOldest);
        queue.close();
        assert_eq!(queue.push(frame(2)), PushOutcome::Closed);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        assert_eq!(OutboundQueue::new(0).capacity(), 1);
    }

    #[test]
    fn waiting_consumer_is_woken_by_push() {
        let queue = OutboundQueue::new(4);
        let mut recv = tokio_test::task::spawn(queue.recv());
        tokio_test::assert_pending!(recv.poll());

        queue.push(frame(7));
        assert!(recv.is_woken());
        let received = tokio_test::assert_ready!(recv.poll());
        assert_eq!(received.map(|f| label(&f)).as_deref(), Some("frame 7"));
    }

    #[tokio::test]
    async fn close_drains_then_ends() {
        let queue = OutboundQueue::new(4);
        queue.push(frame(0));
        queue.push(frame(1));
        queue.close();

        assert_eq!(label(&queue.recv().await.unwrap()), "frame 0");
        assert_eq!(label(&queue.recv().await.unwrap()), "frame 1");
        assert!(queue.recv().await.is_none());
    }

    #[tokio::test]
    async fn recv_wakes_on_push() {
        let queue = Arc::new(OutboundQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(frame(7));

        let received = consumer.await.unwrap().unwrap();
        assert_eq!(label(&received), "frame 7");
    }

    #[tokio::test]
    async fn recv_wakes_on_close() {
        let queue = Arc::new(OutboundQueue::new(4));
        let consumer = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.recv().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.close();
        assert!(consumer.await.unwrap().is_none());
    }

    #[test]
    fn fan_out_counts_each_queue() {
        let open = Arc::new(OutboundQueue::new(1));
        open.push(frame(0));
        let fresh = Arc::new(OutboundQueue::new(4));
        let closed = Arc::new(OutboundQueue::new(4));
        closed.close();

        let report = fan_out([&open, &fresh, &closed], &frame(1));

        assert_eq!(report.delivered, 2);
        assert_eq!(report.dropped_oldest, 1);
        assert_eq!(report.closed, 1);
        assert_eq!(report.recipients(), 3);
    }
}
