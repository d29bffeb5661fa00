//! Connection Session
//!
//! Lifecycle of one streaming connection:
//! `Connecting -> Open -> Closing -> Closed`.
//!
//! - `Connecting -> Open`: the hub accepts the connection and hands out its
//!   outbound queue. Only open sessions act on control messages.
//! - `Open -> Closing`: the client closed, the transport failed, the writer
//!   stopped, or the server is shutting down. The queue stops accepting
//!   frames; anything already queued may still be flushed.
//! - `Closing -> Closed`: the queue was drained (or abandoned after the
//!   drain timeout) and the connection is removed from the hub, exactly once.
//!
//! Malformed control messages produce an error frame and leave the
//! session open.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tracing::{Instrument, debug, info, info_span, warn};

use super::protocol::{ControlError, ControlMessage, parse_control};
use crate::application::services::{HubError, StreamHub};
use crate::domain::streaming::{AckFrame, AckStatus, OutboundMessage, TopicKey};
use crate::domain::subscription::ConnectionId;
use crate::infrastructure::broadcast::OutboundQueue;
use crate::infrastructure::metrics;

/// Per-session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Acknowledge subscribe/unsubscribe with a status frame.
    pub send_acks: bool,
    /// How long a closing session may spend flushing its queue.
    pub drain_timeout: Duration,
    /// Update interval used when a subscribe omits one.
    pub default_update_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            send_acks: false,
            drain_timeout: Duration::from_secs(1),
            default_update_interval: Duration::from_secs(60),
        }
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport accepted, not yet registered with the hub.
    Connecting,
    /// Receiving control messages and frames.
    Open,
    /// Flushing before removal.
    Closing,
    /// Removed from the hub. Terminal.
    Closed,
}

/// Why a session left the `Open` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent a close frame or hung up.
    ClientClosed,
    /// Reading or writing the socket failed.
    TransportFailure(String),
    /// The outbound queue was closed underneath the session.
    QueueClosed,
    /// The server is shutting down.
    ServerShutdown,
}

// =============================================================================
// Session
// =============================================================================

/// State machine for one connection, independent of the socket.
pub struct Session {
    hub: Arc<StreamHub>,
    config: SessionConfig,
    state: SessionState,
    connection: Option<(ConnectionId, Arc<OutboundQueue>)>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("connection", &self.connection_id())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create a session in the `Connecting` state.
    #[must_use]
    pub const fn new(hub: Arc<StreamHub>, config: SessionConfig) -> Self {
        Self {
            hub,
            config,
            state: SessionState::Connecting,
            connection: None,
        }
    }

    /// Register with the hub and move to `Open`.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::ShuttingDown`] if the hub refuses new connections;
    /// the session is then `Closed`.
    pub fn open(&mut self) -> Result<Arc<OutboundQueue>, HubError> {
        if let Some((_, queue)) = &self.connection {
            return Ok(Arc::clone(queue));
        }
        match self.hub.open_connection() {
            Ok((id, queue)) => {
                self.connection = Some((id, Arc::clone(&queue)));
                self.state = SessionState::Open;
                Ok(queue)
            }
            Err(e) => {
                self.state = SessionState::Closed;
                Err(e)
            }
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Hub identity, once opened.
    #[must_use]
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection.as_ref().map(|(id, _)| *id)
    }

    /// Handle one inbound text frame.
    pub fn handle_text(&mut self, text: &str) {
        if self.state != SessionState::Open {
            return;
        }
        match parse_control(text, self.config.default_update_interval) {
            Ok(message) => {
                metrics::record_control_message(message.action());
                self.apply(message);
            }
            Err(error) => self.reject(&error),
        }
    }

    /// Answer a rejected control message with an error frame.
    pub fn reject(&self, error: &ControlError) {
        metrics::record_control_error(error.kind());
        debug!(connection = ?self.connection_id(), error = %error, "Rejected control message");
        self.send(OutboundMessage::error(error.to_string()));
    }

    fn apply(&self, message: ControlMessage) {
        let Some(id) = self.connection_id() else {
            return;
        };

        match message {
            ControlMessage::Subscribe {
                key,
                update_interval,
            } => match self.hub.subscribe(id, key.clone(), update_interval) {
                Ok(_) => self.acknowledge(AckStatus::Subscribed, &key, Some(update_interval)),
                Err(error) => self.send(OutboundMessage::error(error.to_string())),
            },
            ControlMessage::Unsubscribe {
                symbol,
                exchange,
                interval,
            } => {
                let removed = self.hub.unsubscribe_matching(id, &symbol, &exchange, interval);
                debug!(connection = id, %symbol, %exchange, removed = removed.len(), "Unsubscribe handled");
                if self.config.send_acks {
                    self.send(OutboundMessage::Ack(AckFrame {
                        status: AckStatus::Unsubscribed,
                        symbol,
                        exchange,
                        interval,
                        update_interval: None,
                    }));
                }
            }
        }
    }

    fn acknowledge(&self, status: AckStatus, key: &TopicKey, update_interval: Option<Duration>) {
        if !self.config.send_acks {
            return;
        }
        self.send(OutboundMessage::Ack(AckFrame {
            status,
            symbol: key.symbol.clone(),
            exchange: key.exchange.clone(),
            interval: Some(key.interval),
            update_interval: update_interval.map(|d| d.as_secs()),
        }));
    }

    fn send(&self, message: OutboundMessage) {
        if let Some((_, queue)) = &self.connection {
            queue.push(Arc::new(message));
        }
    }

    /// Move to `Closing`: stop accepting frames, keep what is queued.
    pub fn begin_close(&mut self, reason: &CloseReason) {
        if !matches!(self.state, SessionState::Connecting | SessionState::Open) {
            return;
        }
        self.state = SessionState::Closing;
        if let Some((id, queue)) = &self.connection {
            queue.close();
            debug!(connection = id, ?reason, "Session closing");
        }
    }

    /// Move to `Closed` and remove the connection from the hub.
    pub fn finish(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        if let Some((id, _)) = &self.connection {
            self.hub.remove_connection(*id);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.finish();
    }
}

// =============================================================================
// Socket Driver
// =============================================================================

/// Drive a WebSocket until it closes.
///
/// The calling task reads control messages; a spawned writer task drains
/// the outbound queue into the socket.
pub async fn run_session(socket: WebSocket, hub: Arc<StreamHub>, config: SessionConfig) {
    let shutdown = hub.shutdown_token();
    let drain_timeout = config.drain_timeout;
    let mut session = Session::new(hub, config);

    let queue = match session.open() {
        Ok(queue) => queue,
        Err(error) => {
            warn!(error = %error, "Refusing stream connection");
            let mut socket = socket;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    let Some(id) = session.connection_id() else {
        return;
    };

    let span = info_span!("session", connection = id);
    async move {
        info!("Stream connection opened");
        let (sink, mut stream) = socket.split();
        let mut writer = tokio::spawn(write_frames(sink, queue).in_current_span());
        let mut writer_done = false;

        let reason = loop {
            tokio::select! {
                () = shutdown.cancelled() => break CloseReason::ServerShutdown,
                result = &mut writer => {
                    writer_done = true;
                    break match result {
                        Ok(Ok(())) => CloseReason::QueueClosed,
                        Ok(Err(e)) => CloseReason::TransportFailure(e),
                        Err(e) => CloseReason::TransportFailure(e.to_string()),
                    };
                }
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(text))) => session.handle_text(text.as_str()),
                    Some(Ok(Message::Binary(_))) => session.reject(&ControlError::Malformed),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => break CloseReason::ClientClosed,
                    Some(Err(e)) => break CloseReason::TransportFailure(e.to_string()),
                },
            }
        };

        session.begin_close(&reason);
        if !writer_done && tokio::time::timeout(drain_timeout, &mut writer).await.is_err() {
            writer.abort();
            debug!("Abandoned undelivered frames");
        }
        session.finish();

        info!(?reason, "Stream connection closed");
    }
    .instrument(span)
    .await;
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    queue: Arc<OutboundQueue>,
) -> Result<(), String> {
    while let Some(frame) = queue.recv().await {
        let text = match serde_json::to_string(frame.as_ref()) {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Dropping unserializable frame");
                continue;
            }
        };
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|e| e.to_string())?;
    }
    let _ = sink.send(Message::Close(None)).await;
    Ok(())
}
