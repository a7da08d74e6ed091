//! nestchat-protocol: Wire definitions for the realtime chat channel
//!
//! This crate defines the payloads exchanged between the nestchat server
//! and browser clients over websocket text frames.

pub mod codec;
pub mod messages;
pub mod types;

// Re-export main types at crate root
pub use codec::{decode_inbound, decode_server_message, encode_server_message, CodecError, MAX_FRAME_SIZE};
pub use messages::ServerMessage;
pub use types::{
    ChatMessage, GroupId, GroupRecord, GroupSummary, InboundChat, ParseGroupIdError, Scope,
    Timestamp,
};
