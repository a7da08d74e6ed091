//! Connection lifecycle
//!
//! A [`Connection`] is the ingress side's owning handle. Creating one
//! registers it; dropping it (on any exit path, including unwinding)
//! closes the connection and removes it from the registry.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use nestchat_protocol::{Scope, ServerMessage};
use nestchat_utils::Result;

use crate::observability::Metrics;
use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};

/// A registered, open connection
pub struct Connection {
    handle: ConnectionHandle,
    identity: Arc<str>,
    scope: Scope,
    registry: Arc<ConnectionRegistry>,
    released: bool,
}

impl Connection {
    /// Register a new connection and return it with the receiving end of its
    /// outbound buffer
    ///
    /// `parent` is the shutdown token; the connection's own token is a child
    /// of it so server shutdown closes every connection.
    pub fn open(
        registry: Arc<ConnectionRegistry>,
        identity: impl Into<Arc<str>>,
        scope: Scope,
        outbound_buffer: usize,
        parent: &CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<ServerMessage>)> {
        let identity = identity.into();
        let (tx, rx) = mpsc::channel(outbound_buffer);
        let handle = ConnectionHandle::new(registry.allocate_id(), tx, parent.child_token());

        registry.register(handle.clone(), Arc::clone(&identity), scope)?;
        Metrics::global().record_connection_opened();
        info!("{} opened by {} ({})", handle.id(), identity, scope);

        Ok((
            Self {
                handle,
                identity,
                scope,
                registry,
                released: false,
            },
            rx,
        ))
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Token cancelled when the connection closes for any reason
    pub fn close_token(&self) -> CancellationToken {
        self.handle.close_token()
    }

    /// Close and deregister; safe to call more than once
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.handle.close();
        if self.registry.deregister(self.handle.id()) {
            Metrics::global().record_connection_closed();
        }
        info!("{} closed for {}", self.handle.id(), self.identity);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.handle.id())
            .field("identity", &self.identity)
            .field("scope", &self.scope)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(registry: &Arc<ConnectionRegistry>) -> (Connection, mpsc::Receiver<ServerMessage>) {
        Connection::open(
            Arc::clone(registry),
            "alice@example.com",
            Scope::Unscoped,
            4,
            &CancellationToken::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_registers() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, _rx) = open(&registry);

        assert!(registry.contains(conn.id()));
        assert_eq!(conn.identity(), "alice@example.com");
        assert_eq!(conn.scope(), Scope::Unscoped);
    }

    #[tokio::test]
    async fn test_drop_deregisters_and_closes() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, _rx) = open(&registry);
        let id = conn.id();
        let token = conn.close_token();

        drop(conn);

        assert!(!registry.contains(id));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (mut conn, _rx) = open(&registry);

        conn.release();
        conn.release();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_parent_cancellation_closes_connection() {
        let registry = Arc::new(ConnectionRegistry::new());
        let parent = CancellationToken::new();
        let (conn, _rx) =
            Connection::open(Arc::clone(&registry), "bob@example.com", Scope::Unscoped, 4, &parent)
                .unwrap();

        parent.cancel();
        assert!(conn.close_token().is_cancelled());
        assert!(conn.handle().is_closed());
    }

    #[tokio::test]
    async fn test_panic_in_owner_still_deregisters() {
        let registry = Arc::new(ConnectionRegistry::new());
        let (conn, _rx) = open(&registry);
        let id = conn.id();

        let task = tokio::spawn(async move {
            let _conn = conn;
            panic!("ingress blew up");
        });
        assert!(task.await.is_err());

        assert!(!registry.contains(id));
    }
}
