//! Market Data Streaming Types
//!
//! Core domain types for OHLCV streaming: intervals, bars, topic keys,
//! snapshots and the frames pushed to subscribers. These types are
//! transport-agnostic and represent the canonical internal representation.

mod bar;
mod interval;
mod message;
mod resample;

pub use bar::{Bar, PRICE_DECIMALS, Snapshot, TopicKey};
pub use interval::{Interval, UnknownInterval, UpstreamPlan};
pub use message::{AckFrame, AckStatus, ErrorFrame, OutboundMessage, SnapshotFrame};
pub use resample::resample;
