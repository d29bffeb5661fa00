#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! OHLCV Stream Server - Polled Market Data Multiplexer
//!
//! Streams periodically refreshed OHLCV snapshots to WebSocket subscribers
//! and serves one-shot historical bar queries. Clients sharing a
//! (symbol, exchange, interval) topic share a single upstream poller.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and state
//!   - `streaming`: Intervals, bars, topic keys, resampling, outbound frames
//!   - `subscription`: Topic registry and cadence bookkeeping
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Upstream bar source, snapshot sink
//!   - `services`: Stream hub, pollers, bar fetcher, history service
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `api`: axum routes (`/`, `/fetch_data`, `/ws`)
//!   - `ws`: Control protocol and connection sessions
//!   - `upstream`: reqwest bar source
//!   - `broadcast`: Bounded drop-oldest outbound queues
//!   - `client`: Reconnecting subscriber
//!   - `config`, `health`, `metrics`, `retry`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                 ┌────────────┐  snapshot   ┌────────────┐  fan out   ┌──────────┐
//! Upstream API ◄──┤  Poller    ├────────────►│ Stream Hub ├───────────►│ Session  ├──► Client 1
//!  (one fetch     │ (per topic)│             │ (registry) ├───────────►│ Session  ├──► Client 2
//!   per topic)    └────────────┘             └─────▲──────┘            └────┬─────┘
//!                                                  │     subscribe /        │
//!                                                  └────unsubscribe─────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core streaming types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::streaming::{Bar, Interval, OutboundMessage, Snapshot, TopicKey};
pub use domain::subscription::{CadenceChange, ConnectionId, RegistryStats, TopicRegistry};

// Application services
pub use application::ports::{BarRequest, BarSource, FetchError, InMemoryBarSource};
pub use application::services::{
    BarFetcher, HistoryError, HistoryRequest, HistoryService, HubConfig, HubError, HubStats,
    StreamHub,
};

// Infrastructure config
pub use infrastructure::config::{ClientConfig, ConfigError, ServerConfig};

// Servers
pub use infrastructure::api::{ApiServer, ApiState, ServerError, create_router};
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Client
pub use infrastructure::client::{ClientEvent, StreamClient, StreamClientError};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
