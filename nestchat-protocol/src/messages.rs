//! Server-to-client message types

use serde::{Deserialize, Serialize};

use crate::types::{ChatMessage, GroupId, GroupSummary, Timestamp};

/// Messages pushed from server to client
///
/// The wire shape follows what the marketplace frontend already parses:
/// chat messages go out bare, notifications carry a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireMessage", into = "WireMessage")]
pub enum ServerMessage {
    /// Full chat message, sent to connections scoped to the message's group
    Chat(ChatMessage),

    /// Lightweight notice sent to unscoped listener connections
    NewMessageNotification {
        group_id: GroupId,
        timestamp: Timestamp,
    },

    /// A group was created with the receiving user as a member
    NewGroupCreated { group: GroupSummary },
}

impl ServerMessage {
    /// Notification for listeners about a chat message
    pub fn notification_for(message: &ChatMessage) -> Self {
        Self::NewMessageNotification {
            group_id: message.group_id,
            timestamp: message.timestamp,
        }
    }

    /// Short name of the variant, used in logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Chat(_) => "chat",
            ServerMessage::NewMessageNotification { .. } => "new_message_notification",
            ServerMessage::NewGroupCreated { .. } => "new_group_created",
        }
    }
}

/// Tagged notifications as they appear on the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Notice {
    NewMessageNotification {
        group_id: GroupId,
        timestamp: Timestamp,
    },
    NewGroupCreated {
        group: GroupSummary,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum WireMessage {
    Notice(Notice),
    Chat(ChatMessage),
}

impl From<ServerMessage> for WireMessage {
    fn from(msg: ServerMessage) -> Self {
        match msg {
            ServerMessage::Chat(chat) => WireMessage::Chat(chat),
            ServerMessage::NewMessageNotification {
                group_id,
                timestamp,
            } => WireMessage::Notice(Notice::NewMessageNotification {
                group_id,
                timestamp,
            }),
            ServerMessage::NewGroupCreated { group } => {
                WireMessage::Notice(Notice::NewGroupCreated { group })
            }
        }
    }
}

impl From<WireMessage> for ServerMessage {
    fn from(wire: WireMessage) -> Self {
        match wire {
            WireMessage::Chat(chat) => ServerMessage::Chat(chat),
            WireMessage::Notice(Notice::NewMessageNotification {
                group_id,
                timestamp,
            }) => ServerMessage::NewMessageNotification {
                group_id,
                timestamp,
            },
            WireMessage::Notice(Notice::NewGroupCreated { group }) => {
                ServerMessage::NewGroupCreated { group }
            }
        }
    }
}
