//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `BarFetcher`: Upstream fetch with deadline, resampling and rounding
//! - `StreamHub`: Connections, subscriptions, pollers and dispatch
//! - `HistoryService`: Validated one-shot historical fetches

mod fetcher;
mod history;
mod hub;
mod poller;

pub use fetcher::{BarFetcher, SeriesRequest};
pub use history::{HistoryError, HistoryRequest, HistoryResponse, HistoryService, DEFAULT_HISTORY_BARS};
pub use hub::{HubConfig, HubError, HubStats, StreamHub, TopicStatus};
pub use poller::{PollerConfig, PollerHandle, PollerState, PollerStatus};
