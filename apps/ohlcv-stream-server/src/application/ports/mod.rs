//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `BarSource`: Upstream historical bar provider
//! - `SnapshotSink`: Where pollers hand their results for dispatch

mod bar_source_port;
mod snapshot_sink_port;

pub use bar_source_port::{BarRequest, BarSource, FetchError, InMemoryBarSource};
#[cfg(test)]
pub use bar_source_port::MockBarSource;
pub use snapshot_sink_port::{DispatchReport, SnapshotSink};
