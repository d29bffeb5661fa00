//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the application services and port interfaces
//! that define how the domain interacts with external systems.

/// Port interfaces for external systems (upstream bar source, frame sink).
pub mod ports;

/// Application services: fetching, polling, the stream hub and history.
pub mod services;
