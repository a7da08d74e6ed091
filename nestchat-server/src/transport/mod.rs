//! Connection transports
//!
//! The hub only sees an inbound stream of text frames and an outbound sink
//! of [`ServerMessage`](nestchat_protocol::ServerMessage)s; this module
//! adapts real sockets to that shape.

pub mod websocket;

use nestchat_protocol::CodecError;

/// Transport-level failure on one connection
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
}
