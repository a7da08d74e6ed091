//! Error types for nestchat
//!
//! Provides a unified error type used across all nestchat crates.

use std::path::PathBuf;

/// Main error type for nestchat operations
#[derive(Debug, thiserror::Error)]
pub enum NestChatError {
    // === IO Errors ===

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    // === Connection Errors ===

    #[error("Connection failed: {0}")]
    Connection(String),

    // === Configuration Errors ===

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration at {path}: {message}")]
    ConfigInvalid { path: PathBuf, message: String },

    // === Store Errors ===

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    #[error("Group already exists for this product: {name} ({id})")]
    GroupExists { id: String, name: String },

    #[error("A group needs at least one member besides its creator")]
    SelfChat,

    #[error("Invalid group: {0}")]
    InvalidGroup(String),

    // === Notification Errors ===

    #[error("Notification error: {0}")]
    Notification(String),

    // === Internal Errors ===

    #[error("Connection {0} is already registered")]
    DuplicateConnection(u64),

    #[error("Event queue closed: {0}")]
    QueueClosed(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NestChatError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a notification error
    pub fn notification(msg: impl Into<String>) -> Self {
        Self::Notification(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Errors caused by a lifecycle bug inside the server rather than by
    /// a client or a collaborator.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateConnection(_) | Self::QueueClosed(_) | Self::Internal(_)
        )
    }
}

/// Result type alias using NestChatError
pub type Result<T> = std::result::Result<T, NestChatError>;
