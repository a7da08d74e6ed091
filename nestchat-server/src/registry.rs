//! Connection Registry
//!
//! Tracks live websocket connections together with the identity that opened
//! them and the scope they listen on. Broadcasters never touch the map
//! directly; they take a [`ConnectionRegistry::snapshot`] and iterate that.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use nestchat_protocol::{Scope, ServerMessage};
use nestchat_utils::{NestChatError, Result};

/// Unique connection identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Create a ConnectionId from a raw value (mainly for testing)
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the raw value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Conn({})", self.0)
    }
}

/// Why a single delivery attempt failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,
    #[error("outbound buffer full")]
    Backlogged,
}

/// Sending half of one live connection
///
/// Cloning is cheap; the registry and the broadcasters hold clones while the
/// ingress task owns the connection itself.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<ServerMessage>,
    closer: CancellationToken,
    /// Set when a bounded wait on a full buffer ran out; cleared by the next
    /// message that fits
    lagging: Arc<AtomicBool>,
}

impl ConnectionHandle {
    pub fn new(
        id: ConnectionId,
        outbound: mpsc::Sender<ServerMessage>,
        closer: CancellationToken,
    ) -> Self {
        Self {
            id,
            outbound,
            closer,
            lagging: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a message, waiting up to `wait` for room in a full buffer
    ///
    /// `Backlogged` means the message was not queued but the connection is
    /// still alive. A connection whose last wait ran out is not waited on
    /// again until a message fits without waiting.
    pub async fn deliver_within(
        &self,
        message: ServerMessage,
        wait: Duration,
    ) -> std::result::Result<(), DeliveryError> {
        if self.closer.is_cancelled() {
            return Err(DeliveryError::Closed);
        }
        let message = match self.outbound.try_send(message) {
            Ok(()) => {
                self.lagging.store(false, Ordering::Relaxed);
                return Ok(());
            }
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(DeliveryError::Closed),
            Err(mpsc::error::TrySendError::Full(message)) => message,
        };
        if wait.is_zero() || self.is_lagging() {
            return Err(DeliveryError::Backlogged);
        }

        tokio::select! {
            _ = self.closer.cancelled() => Err(DeliveryError::Closed),
            sent = self.outbound.send_timeout(message, wait) => match sent {
                Ok(()) => Ok(()),
                Err(mpsc::error::SendTimeoutError::Closed(_)) => Err(DeliveryError::Closed),
                Err(mpsc::error::SendTimeoutError::Timeout(_)) => {
                    self.lagging.store(true, Ordering::Relaxed);
                    Err(DeliveryError::Backlogged)
                }
            },
        }
    }

    /// Whether the last bounded wait on this connection ran out
    pub fn is_lagging(&self) -> bool {
        self.lagging.load(Ordering::Relaxed)
    }

    /// Signal the connection's tasks (reader, writer, ticker) to stop
    pub fn close(&self) {
        self.closer.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closer.is_cancelled() || self.outbound.is_closed()
    }

    /// Token cancelled when this connection closes
    pub fn close_token(&self) -> CancellationToken {
        self.closer.clone()
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("lagging", &self.is_lagging())
            .finish()
    }
}

/// Entry for a registered connection
#[derive(Debug, Clone)]
pub struct ConnectionEntry {
    pub handle: ConnectionHandle,
    pub identity: Arc<str>,
    pub scope: Scope,
}

impl ConnectionEntry {
    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }
}

/// Registry tracking all live connections
///
/// Readers (one snapshot per broadcast event) share the lock; register and
/// deregister take it exclusively. The lock is never held across an await.
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
    next_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Mint a fresh connection id
    pub fn allocate_id(&self) -> ConnectionId {
        ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a connection
    ///
    /// Fails with [`NestChatError::DuplicateConnection`] if the id is already
    /// present, which only happens when a connection lifecycle is broken.
    pub fn register(
        &self,
        handle: ConnectionHandle,
        identity: impl Into<Arc<str>>,
        scope: Scope,
    ) -> Result<()> {
        let id = handle.id();
        let identity = identity.into();

        let mut entries = self.entries.write();
        if entries.contains_key(&id) {
            drop(entries);
            error!("{} registered twice; connection lifecycle is broken", id);
            return Err(NestChatError::DuplicateConnection(id.value()));
        }

        debug!("Registered {} for {} ({})", id, identity, scope);
        entries.insert(
            id,
            ConnectionEntry {
                handle,
                identity,
                scope,
            },
        );
        Ok(())
    }

    /// Remove a connection; returns whether it was present
    pub fn deregister(&self, id: ConnectionId) -> bool {
        let removed = self.entries.write().remove(&id).is_some();
        if removed {
            debug!("Deregistered {}", id);
        }
        removed
    }

    /// Point-in-time copy of every registered entry
    pub fn snapshot(&self) -> Vec<ConnectionEntry> {
        self.entries.read().values().cloned().collect()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.read().contains_key(&id)
    }

    /// Ids of every connection opened by an identity
    pub fn connections_for(&self, identity: &str) -> Vec<ConnectionId> {
        self.entries
            .read()
            .values()
            .filter(|entry| &*entry.identity == identity)
            .map(ConnectionEntry::id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connection_count", &self.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}
