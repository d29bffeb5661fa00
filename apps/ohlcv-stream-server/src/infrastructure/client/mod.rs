//! Reconnecting Stream Client
//!
//! Subscribes to a stream server's `/ws` endpoint and forwards every frame
//! as a [`ClientEvent`]. A dropped connection is retried after the
//! configured delay; each attempt is a brand-new connection that sends its
//! subscribe messages again, since the server keeps no state across
//! connections.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::domain::streaming::{OutboundMessage, TopicKey};
use crate::infrastructure::config::ClientConfig;
use crate::infrastructure::retry::{RetryConfig, RetryPolicy};

// =============================================================================
// Errors & Events
// =============================================================================

/// Stream client errors.
#[derive(Debug, thiserror::Error)]
pub enum StreamClientError {
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// Retry budget exhausted.
    #[error("maximum reconnect attempts exceeded")]
    MaxReconnectAttemptsExceeded,
}

/// Events emitted by the stream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Connected and subscribe messages sent.
    Connected,
    /// Connection lost.
    Disconnected {
        /// What ended the connection.
        reason: String,
    },
    /// Waiting before the next attempt.
    Reconnecting {
        /// Attempt number since the last successful connect.
        attempt: u32,
        /// Delay before connecting.
        delay: Duration,
    },
    /// A frame from the server.
    Frame(OutboundMessage),
    /// A text frame that is not a known frame shape.
    Undecodable(String),
}

/// Control message subscribing to `key`.
#[must_use]
pub fn subscribe_message(key: &TopicKey, update_interval: Duration) -> String {
    json!({
        "action": "subscribe",
        "symbol": key.symbol,
        "exchange": key.exchange,
        "interval": key.interval.as_str(),
        "update_interval": update_interval.as_secs(),
    })
    .to_string()
}

// =============================================================================
// Client
// =============================================================================

/// WebSocket subscriber with fixed-delay reconnects.
pub struct StreamClient {
    config: ClientConfig,
    retry: RetryConfig,
    event_tx: mpsc::Sender<ClientEvent>,
    cancel: CancellationToken,
}

impl StreamClient {
    /// Create a client that retries forever after `config.reconnect_delay`.
    #[must_use]
    pub const fn new(
        config: ClientConfig,
        event_tx: mpsc::Sender<ClientEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let retry = RetryConfig::fixed(config.reconnect_delay);
        Self {
            config,
            retry,
            event_tx,
            cancel,
        }
    }

    /// Replace the retry schedule.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Run the connection loop until cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`StreamClientError::MaxReconnectAttemptsExceeded`] if the
    /// retry schedule is bounded and runs out.
    pub async fn run(&self) -> Result<(), StreamClientError> {
        let mut policy = RetryPolicy::new(self.retry.clone());

        loop {
            if self.cancel.is_cancelled() {
                tracing::info!("Stream client cancelled");
                return Ok(());
            }

            match self.connect_and_run(&mut policy).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(error = %e, "Stream connection lost");
                    self.emit(ClientEvent::Disconnected {
                        reason: e.to_string(),
                    })
                    .await;

                    let Some(delay) = policy.next_delay() else {
                        return Err(StreamClientError::MaxReconnectAttemptsExceeded);
                    };
                    let attempt = policy.attempt_count();
                    tracing::info!(attempt, delay_ms = delay.as_millis(), "Reconnecting");
                    self.emit(ClientEvent::Reconnecting { attempt, delay }).await;

                    tokio::select! {
                        () = self.cancel.cancelled() => {
                            tracing::info!("Stream client cancelled during reconnect delay");
                            return Ok(());
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn connect_and_run(&self, policy: &mut RetryPolicy) -> Result<(), StreamClientError> {
        tracing::info!(url = %self.config.url, "Connecting to stream server");
        let (ws_stream, _response) = tokio::select! {
            () = self.cancel.cancelled() => return Ok(()),
            result = tokio_tungstenite::connect_async(self.config.url.as_str()) => result?,
        };
        let (mut write, mut read) = ws_stream.split();

        for (key, update_interval) in &self.config.subscriptions {
            write
                .send(Message::text(subscribe_message(key, *update_interval)))
                .await?;
        }
        policy.reset();
        tracing::info!(topics = self.config.subscriptions.len(), "Stream connected");
        self.emit(ClientEvent::Connected).await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let event = serde_json::from_str::<OutboundMessage>(text.as_str())
                            .map_or_else(|_| ClientEvent::Undecodable(text.to_string()), ClientEvent::Frame);
                        self.emit(event).await;
                    }
                    Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                    Some(Ok(Message::Close(_))) | None => {
                        return Err(StreamClientError::ConnectionClosed);
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(e.into()),
                },
            }
        }
    }

    async fn emit(&self, event: ClientEvent) {
        if self.event_tx.send(event).await.is_err() {
            tracing::debug!("Client event receiver dropped");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
