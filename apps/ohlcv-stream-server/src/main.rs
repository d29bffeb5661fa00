//! OHLCV Stream Server Binary
//!
//! Starts the streaming and historical-fetch service.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin ohlcv-stream-server
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `UPSTREAM_BASE_URL`: Base URL of the upstream bar API
//!
//! ## Optional
//! - `UPSTREAM_API_KEY`: Bearer token for the upstream API
//! - `UPSTREAM_FETCH_TIMEOUT_SECS`: Per-fetch timeout (default: 10)
//! - `STREAM_SERVER_PORT`: API and WebSocket port (default: 8080)
//! - `STREAM_HEALTH_PORT`: Health check and metrics port (default: 8082)
//! - `POLL_BACKOFF_INITIAL_MS`, `POLL_BACKOFF_MAX_SECS`, `POLL_BACKOFF_MULTIPLIER`: Poller backoff
//! - `OUTBOUND_QUEUE_CAPACITY`: Frames buffered per connection (default: 64)
//! - `DEFAULT_UPDATE_INTERVAL_SECS`: Update interval when a subscribe omits one (default: 60)
//! - `STREAM_ACK_SUBSCRIPTIONS`: Acknowledge control messages (default: false)
//! - `SESSION_DRAIN_TIMEOUT_MS`: Flush budget for closing sessions (default: 1000)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`: Trace export
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use ohlcv_stream_server::infrastructure::telemetry;
use ohlcv_stream_server::infrastructure::upstream::HttpBarSource;
use ohlcv_stream_server::{
    ApiServer, ApiState, BarFetcher, HealthServer, HealthServerState, HistoryService,
    ServerConfig, StreamHub, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting OHLCV stream server");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = ServerConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Upstream and shared fetcher
    let source = Arc::new(HttpBarSource::new(&config.upstream)?);
    let fetcher = Arc::new(BarFetcher::new(source, config.upstream.fetch_timeout));

    // Streaming hub; pollers and sessions observe a child of the shutdown token
    let hub = StreamHub::new(
        Arc::clone(&fetcher),
        config.hub_config(),
        shutdown_token.child_token(),
    );
    let history = Arc::new(HistoryService::new(fetcher));

    let api_server = ApiServer::new(
        config.server.stream_port,
        ApiState {
            hub: Arc::clone(&hub),
            history,
            session: config.streaming.session_config(),
        },
        shutdown_token.clone(),
    );

    let health_server = HealthServer::new(
        config.server.health_port,
        Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&hub),
        )),
        shutdown_token.clone(),
    );

    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let api_handle = tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            tracing::error!(error = %e, "API server error");
        }
    });

    tracing::info!("Stream server ready");

    await_shutdown(shutdown_token).await;
    hub.shutdown();

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, api_handle).await.is_err() {
        tracing::warn!("API server did not stop within the shutdown timeout");
    }

    tracing::info!("Stream server stopped");
    Ok(())
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &ServerConfig) {
    tracing::info!(
        stream_port = config.server.stream_port,
        health_port = config.server.health_port,
        queue_capacity = config.streaming.queue_capacity,
        default_update_interval_secs = config.streaming.default_update_interval.as_secs(),
        send_acks = config.streaming.send_acks,
        "Configuration loaded"
    );
    tracing::debug!(
        upstream = %config.upstream.base_url,
        api_key = config.upstream.api_key.is_some(),
        fetch_timeout_ms = config.upstream.fetch_timeout.as_millis(),
        "Upstream endpoint"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
