//! OHLCV Stream Client Binary
//!
//! Subscribes to a stream server and logs every frame it receives,
//! reconnecting after a fixed delay whenever the connection drops.
//!
//! # Environment Variables
//!
//! - `STREAM_URL`: WebSocket endpoint (default: ws://127.0.0.1:8080/ws)
//! - `STREAM_SUBSCRIPTIONS`: Comma-separated `SYMBOL:EXCHANGE[:INTERVAL[:SECONDS]]`
//! - `STREAM_RECONNECT_DELAY_SECS`: Delay between reconnects (default: 5)

use anyhow::Context;
use ohlcv_stream_server::domain::streaming::OutboundMessage;
use ohlcv_stream_server::{ClientConfig, ClientEvent, StreamClient, TelemetryConfig};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let _ = dotenvy::dotenv();

    let _telemetry_guard = ohlcv_stream_server::infrastructure::telemetry::init_with_config(
        TelemetryConfig {
            enabled: false,
            ..TelemetryConfig::from_env()
        },
    );

    let config = ClientConfig::from_env().context("invalid stream client configuration")?;
    tracing::info!(
        url = %config.url,
        topics = config.subscriptions.len(),
        reconnect_delay_secs = config.reconnect_delay.as_secs(),
        "Starting stream client"
    );

    let cancel = CancellationToken::new();
    let (event_tx, mut event_rx) = mpsc::channel(256);
    let client = StreamClient::new(config, event_tx, cancel.clone());

    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, stopping client");
        }
        ctrl_c_cancel.cancel();
    });

    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            log_event(&event);
        }
    });

    let result = client.run().await;
    drop(client);
    let _ = printer.await;

    result.context("stream client stopped")
}

fn log_event(event: &ClientEvent) {
    match event {
        ClientEvent::Connected => tracing::info!("Connected"),
        ClientEvent::Disconnected { reason } => tracing::warn!(%reason, "Disconnected"),
        ClientEvent::Reconnecting { attempt, delay } => {
            tracing::info!(attempt, delay_secs = delay.as_secs(), "Reconnecting");
        }
        ClientEvent::Frame(OutboundMessage::Snapshot(frame)) => tracing::info!(
            symbol = %frame.symbol,
            exchange = %frame.exchange,
            interval = %frame.interval,
            datetime = %frame.bar.datetime,
            open = %frame.bar.open,
            high = %frame.bar.high,
            low = %frame.bar.low,
            close = %frame.bar.close,
            volume = %frame.bar.volume,
            "Snapshot"
        ),
        ClientEvent::Frame(OutboundMessage::Error(frame)) => tracing::warn!(
            error = %frame.error,
            symbol = ?frame.symbol,
            exchange = ?frame.exchange,
            "Server error"
        ),
        ClientEvent::Frame(OutboundMessage::Ack(frame)) => tracing::info!(
            status = ?frame.status,
            symbol = %frame.symbol,
            exchange = %frame.exchange,
            "Acknowledged"
        ),
        ClientEvent::Undecodable(text) => tracing::debug!(%text, "Unrecognised frame"),
    }
}
