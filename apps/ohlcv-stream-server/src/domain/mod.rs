//! Domain Layer - Core market data types and subscription bookkeeping.
//!
//! This layer contains the core domain types for bar streaming with no
//! I/O. All types here are pure Rust with serialization support.

/// Market data types (intervals, bars, snapshots, outbound frames).
pub mod streaming;

/// Topic registry: who subscribes to what, and at which cadence.
pub mod subscription;
