//! Text frame codec for websocket payloads

use crate::messages::ServerMessage;
use crate::types::InboundChat;

/// Maximum inbound frame size (64 KiB)
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol codec error
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
}

/// Encode a server message into a text frame
pub fn encode_server_message(message: &ServerMessage) -> Result<String, CodecError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a client text frame into a chat payload
pub fn decode_inbound(frame: &str) -> Result<InboundChat, CodecError> {
    if frame.len() > MAX_FRAME_SIZE {
        return Err(CodecError::FrameTooLarge {
            size: frame.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(serde_json::from_str(frame)?)
}

/// Decode a server text frame (client side and tests)
pub fn decode_server_message(frame: &str) -> Result<ServerMessage, CodecError> {
    Ok(serde_json::from_str(frame)?)
}
