//! Stream Server Configuration Settings
//!
//! Configuration types for the server and client binaries, loaded from
//! environment variables. Unparseable values fall back to their defaults;
//! only missing required values are errors.

use std::time::Duration;

use crate::application::services::{HubConfig, PollerConfig};
use crate::domain::streaming::{Interval, TopicKey};
use crate::infrastructure::retry::RetryConfig;
use crate::infrastructure::ws::SessionConfig;

/// Upstream API key.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key.
    #[must_use]
    pub const fn new(key: String) -> Self {
        Self(key)
    }

    /// The raw key.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// Listener ports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSettings {
    /// HTTP + WebSocket API port.
    pub stream_port: u16,
    /// Health and metrics port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            stream_port: 8080,
            health_port: 8082,
        }
    }
}

/// Upstream bar source settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSettings {
    /// Base URL of the historical bar API.
    pub base_url: String,
    /// Optional bearer key.
    pub api_key: Option<ApiKey>,
    /// Deadline for a single fetch.
    pub fetch_timeout: Duration,
}

/// Poller backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PollingSettings {
    /// First delay after a failed fetch.
    pub backoff_initial: Duration,
    /// Ceiling on the failure delay.
    pub backoff_max: Duration,
    /// Growth factor per consecutive failure.
    pub backoff_multiplier: f64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            backoff_initial: Duration::from_millis(5000),
            backoff_max: Duration::from_secs(120),
            backoff_multiplier: 2.0,
        }
    }
}

impl PollingSettings {
    /// Poller configuration built from these settings.
    #[must_use]
    pub const fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            backoff: RetryConfig::exponential(
                self.backoff_initial,
                self.backoff_max,
                self.backoff_multiplier,
            ),
        }
    }
}

/// Streaming connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamingSettings {
    /// Capacity of each connection's outbound queue.
    pub queue_capacity: usize,
    /// Update interval used when a subscribe omits one.
    pub default_update_interval: Duration,
    /// Whether to acknowledge subscribe/unsubscribe.
    pub send_acks: bool,
    /// How long a closing connection may spend flushing its queue.
    pub drain_timeout: Duration,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            default_update_interval: Duration::from_secs(60),
            send_acks: false,
            drain_timeout: Duration::from_millis(1000),
        }
    }
}

impl StreamingSettings {
    /// Per-session configuration built from these settings.
    #[must_use]
    pub const fn session_config(&self) -> SessionConfig {
        SessionConfig {
            send_acks: self.send_acks,
            drain_timeout: self.drain_timeout,
            default_update_interval: self.default_update_interval,
        }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Listener ports.
    pub server: ServerSettings,
    /// Upstream source.
    pub upstream: UpstreamSettings,
    /// Poller backoff.
    pub polling: PollingSettings,
    /// Streaming connections.
    pub streaming: StreamingSettings,
}

impl ServerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `UPSTREAM_BASE_URL` is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if `UPSTREAM_BASE_URL` is missing or empty.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let base_url = env
            .get("UPSTREAM_BASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("UPSTREAM_BASE_URL".to_string()))?;
        if base_url.trim().is_empty() {
            return Err(ConfigError::EmptyValue("UPSTREAM_BASE_URL".to_string()));
        }

        let server_defaults = ServerSettings::default();
        let server = ServerSettings {
            stream_port: env.parse_or("STREAM_SERVER_PORT", server_defaults.stream_port),
            health_port: env.parse_or("STREAM_HEALTH_PORT", server_defaults.health_port),
        };

        let upstream = UpstreamSettings {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: env
                .get("UPSTREAM_API_KEY")
                .filter(|key| !key.is_empty())
                .map(ApiKey::new),
            fetch_timeout: env.nonzero_secs_or("UPSTREAM_FETCH_TIMEOUT_SECS", Duration::from_secs(10)),
        };

        let polling_defaults = PollingSettings::default();
        let polling = PollingSettings {
            backoff_initial: env.nonzero_millis_or("POLL_BACKOFF_INITIAL_MS", polling_defaults.backoff_initial),
            backoff_max: env.nonzero_secs_or("POLL_BACKOFF_MAX_SECS", polling_defaults.backoff_max),
            backoff_multiplier: env
                .parse_or("POLL_BACKOFF_MULTIPLIER", polling_defaults.backoff_multiplier)
                .max(1.0),
        };

        let streaming_defaults = StreamingSettings::default();
        let streaming = StreamingSettings {
            queue_capacity: env
                .parse_or("OUTBOUND_QUEUE_CAPACITY", streaming_defaults.queue_capacity)
                .max(1),
            default_update_interval: env
                .secs_or(
                    "DEFAULT_UPDATE_INTERVAL_SECS",
                    streaming_defaults.default_update_interval,
                )
                .max(Duration::from_secs(1)),
            send_acks: env.flag_or("STREAM_ACK_SUBSCRIPTIONS", streaming_defaults.send_acks),
            drain_timeout: env.millis_or("SESSION_DRAIN_TIMEOUT_MS", streaming_defaults.drain_timeout),
        };

        Ok(Self {
            server,
            upstream,
            polling,
            streaming,
        })
    }

    /// Hub configuration built from these settings.
    #[must_use]
    pub const fn hub_config(&self) -> HubConfig {
        HubConfig {
            queue_capacity: self.streaming.queue_capacity,
            poller: self.polling.poller_config(),
        }
    }
}

/// Stream client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// WebSocket URL of the stream endpoint.
    pub url: String,
    /// Topics to subscribe on every connect, with update intervals.
    pub subscriptions: Vec<(TopicKey, Duration)>,
    /// Fixed delay between reconnect attempts.
    pub reconnect_delay: Duration,
}

impl ClientConfig {
    /// Create configuration from environment variables.
    ///
    /// `STREAM_SUBSCRIPTIONS` is a comma-separated list of
    /// `SYMBOL:EXCHANGE[:INTERVAL[:SECONDS]]` entries.
    ///
    /// # Errors
    ///
    /// Returns an error if `STREAM_SUBSCRIPTIONS` is missing or contains an
    /// unparseable entry.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);

        let raw = env
            .get("STREAM_SUBSCRIPTIONS")
            .ok_or_else(|| ConfigError::MissingEnvVar("STREAM_SUBSCRIPTIONS".to_string()))?;
        let subscriptions = raw
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(parse_subscription)
            .collect::<Result<Vec<_>, _>>()?;
        if subscriptions.is_empty() {
            return Err(ConfigError::EmptyValue("STREAM_SUBSCRIPTIONS".to_string()));
        }

        Ok(Self {
            url: env
                .get("STREAM_URL")
                .unwrap_or_else(|| "ws://127.0.0.1:8080/ws".to_string()),
            subscriptions,
            reconnect_delay: env.secs_or("STREAM_RECONNECT_DELAY_SECS", Duration::from_secs(5)),
        })
    }
}

fn parse_subscription(entry: &str) -> Result<(TopicKey, Duration), ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        key: "STREAM_SUBSCRIPTIONS".to_string(),
        value: entry.to_string(),
    };

    let mut parts = entry.split(':');
    let symbol = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
    let exchange = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
    let interval = match parts.next() {
        Some(raw) => raw.parse::<Interval>().map_err(|_| invalid())?,
        None => Interval::default(),
    };
    let seconds = match parts.next() {
        Some(raw) => raw.parse::<u64>().ok().filter(|s| *s > 0).ok_or_else(invalid)?,
        None => 60,
    };
    if parts.next().is_some() {
        return Err(invalid());
    }

    Ok((TopicKey::new(symbol, exchange, interval), Duration::from_secs(seconds)))
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be interpreted.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
    }

    fn parse_or<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn secs_or(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis_or(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn nonzero_secs_or(&self, key: &str, default: Duration) -> Duration {
        Some(self.secs_or(key, default))
            .filter(|d| !d.is_zero())
            .unwrap_or(default)
    }

    fn nonzero_millis_or(&self, key: &str, default: Duration) -> Duration {
        Some(self.millis_or(key, default))
            .filter(|d| !d.is_zero())
            .unwrap_or(default)
    }

    fn flag_or(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .map_or(default, |v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
    }
}
