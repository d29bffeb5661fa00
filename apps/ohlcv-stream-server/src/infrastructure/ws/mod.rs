//! Streaming Connections
//!
//! The WebSocket side of the stream server: control message parsing and
//! the per-connection session that ties a socket to the hub.

mod protocol;
mod session;

pub use protocol::{ControlError, ControlMessage, parse_control};
pub use session::{CloseReason, Session, SessionConfig, SessionState, run_session};
