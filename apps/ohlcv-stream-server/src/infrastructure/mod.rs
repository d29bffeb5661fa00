//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer, plus the network surfaces.

/// HTTP routes and the WebSocket upgrade.
pub mod api;

/// Bounded drop-oldest outbound queues.
pub mod broadcast;

/// Reconnecting WebSocket subscriber.
pub mod client;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Backoff schedules for pollers and reconnects.
pub mod retry;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// HTTP adapter for the upstream bar source.
pub mod upstream;

/// Streaming connection protocol and sessions.
pub mod ws;
