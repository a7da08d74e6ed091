//! Shared data types for the nestchat protocol

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Server-side timestamp type used on the wire (RFC 3339, UTC)
pub type Timestamp = DateTime<Utc>;

// ==================== Group Identifier ====================

/// Identifier of a trade group
///
/// Twelve bytes rendered as 24 lowercase hex characters, the same shape
/// the marketplace's document store uses for its object ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId([u8; 12]);

/// Error returned when a group id string is malformed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid group id {input:?}: expected 24 hex characters")]
pub struct ParseGroupIdError {
    pub input: String,
}

static GROUP_ID_COUNTER: AtomicU32 = AtomicU32::new(0);

impl GroupId {
    /// Build a group id from raw bytes
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    /// Raw bytes of this id
    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }

    /// Generate a fresh id: 4 bytes of unix seconds, 5 random bytes,
    /// 3 bytes of a process-wide counter.
    pub fn generate() -> Self {
        let secs = Utc::now().timestamp() as u32;
        // Leading bytes of a v4 uuid; version and variant bits sit later
        let random = Uuid::new_v4();
        let count = GROUP_ID_COUNTER.fetch_add(1, Ordering::Relaxed);

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&secs.to_be_bytes());
        bytes[4..9].copy_from_slice(&random.as_bytes()[0..5]);
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
        Self(bytes)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for GroupId {
    type Err = ParseGroupIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseGroupIdError {
            input: s.to_string(),
        };
        if s.len() != 24 {
            return Err(err());
        }
        let mut bytes = [0u8; 12];
        hex::decode_to_slice(s, &mut bytes).map_err(|_| err())?;
        Ok(Self(bytes))
    }
}

impl Serialize for GroupId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GroupId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ==================== Scope ====================

/// Interest filter of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Chat connection inside one group; receives full messages
    Group(GroupId),
    /// Listener connection; receives lightweight notifications for every group
    Unscoped,
}

impl Scope {
    /// The group this scope is bound to, if any
    pub fn group(&self) -> Option<GroupId> {
        match self {
            Scope::Group(id) => Some(*id),
            Scope::Unscoped => None,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Group(id) => write!(f, "group:{}", id),
            Scope::Unscoped => f.write_str("unscoped"),
        }
    }
}

// ==================== Messages ====================

/// A chat message as persisted and broadcast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub group_id: GroupId,
    #[serde(rename = "senderEmail")]
    pub sender_email: String,
    pub content: String,
    pub timestamp: Timestamp,
}

/// Chat payload sent by a client on a group connection
///
/// Group and timestamp are always assigned by the server; any values the
/// client sends for them are ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundChat {
    pub content: String,
    #[serde(rename = "senderEmail", default, skip_serializing_if = "Option::is_none")]
    pub sender_email: Option<String>,
}

impl InboundChat {
    /// Create a payload with content only
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            sender_email: None,
        }
    }
}

// ==================== Groups ====================

/// Full group document as held by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub id: GroupId,
    pub name: String,
    pub members: Vec<String>,
    pub product_id: String,
    #[serde(default)]
    pub cover_image: String,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub read_status: BTreeMap<String, Timestamp>,
    pub buyer: String,
    pub seller: String,
    #[serde(default)]
    pub buyer_confirmed: bool,
    #[serde(default)]
    pub seller_confirmed: bool,
}

impl GroupRecord {
    /// Check whether an identity is a member of the group
    pub fn has_member(&self, identity: &str) -> bool {
        self.members.iter().any(|m| m == identity)
    }

    /// Members other than the given identity, in stored order
    pub fn other_members<'a>(&'a self, identity: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.members
            .iter()
            .map(String::as_str)
            .filter(move |m| *m != identity)
    }

    /// Snapshot sent to clients in `new_group_created` notifications
    pub fn summary(&self) -> GroupSummary {
        GroupSummary::from(self)
    }
}

/// Client-facing view of a group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub id: GroupId,
    pub name: String,
    pub members: Vec<String>,
    pub product_id: String,
    pub cover_image: String,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub read_status: BTreeMap<String, Timestamp>,
}

impl From<&GroupRecord> for GroupSummary {
    fn from(record: &GroupRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            members: record.members.clone(),
            product_id: record.product_id.clone(),
            cover_image: record.cover_image.clone(),
            created_at: record.created_at,
            last_message_at: record.last_message_at,
            read_status: record.read_status.clone(),
        }
    }
}
