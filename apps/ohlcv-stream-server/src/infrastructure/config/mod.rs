//! Configuration Module
//!
//! Configuration loading for the stream server and the stream client.

mod settings;

pub use settings::{
    ApiKey, ClientConfig, ConfigError, PollingSettings, ServerConfig, ServerSettings,
    StreamingSettings, UpstreamSettings,
};
