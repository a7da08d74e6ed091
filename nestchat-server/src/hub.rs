//! Chat hub
//!
//! Owns the registry, the event queues and the broadcaster tasks, and is the
//! entry point transports use to serve a connection.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{Sink, SinkExt, Stream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use nestchat_protocol::{GroupId, GroupRecord, Scope, ServerMessage, Timestamp};
use nestchat_utils::{NestChatError, Result};

use crate::broadcast::{GroupCreationBroadcaster, MessageBroadcaster};
use crate::config::ChatConfig;
use crate::connection::Connection;
use crate::events::{EventQueues, GroupCreatedEvent};
use crate::groups::{find_duplicate, greeting, prepare_group, NewGroup};
use crate::ingress::{run_ingress, DisconnectReason, IngressContext};
use crate::mailer::Mailer;
use crate::observability::Metrics;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::store::ChatStore;
use crate::transport::TransportError;

/// The fan-out core of one server process
pub struct ChatHub {
    registry: Arc<ConnectionRegistry>,
    ingress: IngressContext,
    tracker: TaskTracker,
}

impl ChatHub {
    /// Create the hub and spawn one task per broadcaster
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: ChatConfig, store: Arc<dyn ChatStore>, mailer: Arc<dyn Mailer>) -> Arc<Self> {
        let registry = Arc::new(ConnectionRegistry::new());
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        let (queues, receivers) = EventQueues::new(
            config.delivery_queue_capacity,
            config.group_event_queue_capacity,
        );

        tracker.spawn(
            MessageBroadcaster::new(Arc::clone(&registry), receivers.deliveries)
                .with_backlog_wait(config.backlog_wait())
                .run(shutdown.clone()),
        );
        tracker.spawn(
            GroupCreationBroadcaster::new(Arc::clone(&registry), receivers.group_events)
                .with_backlog_wait(config.backlog_wait())
                .run(shutdown.clone()),
        );
        debug!("Chat hub started with {:?}", config);

        Arc::new(Self {
            registry,
            ingress: IngressContext {
                store,
                mailer,
                queues,
                config: Arc::new(config),
                shutdown,
            },
            tracker,
        })
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ChatConfig {
        &self.ingress.config
    }

    /// Token cancelled when the hub begins shutting down
    pub fn shutdown_token(&self) -> CancellationToken {
        self.ingress.shutdown.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.ingress.shutdown.is_cancelled()
    }

    /// Spawn a task that [`ChatHub::shutdown`] waits for
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    /// Serve one connection from registration to teardown
    ///
    /// `inbound` yields the peer's text frames; `outbound` receives every
    /// message routed to the connection. Returns once the connection is
    /// deregistered and its side tasks have stopped.
    pub async fn serve_connection<I, O>(
        &self,
        identity: &str,
        scope: Scope,
        inbound: I,
        outbound: O,
    ) -> Result<DisconnectReason>
    where
        I: Stream<Item = std::result::Result<String, TransportError>> + Unpin + Send,
        O: Sink<ServerMessage> + Unpin + Send + 'static,
        O::Error: std::fmt::Display + Send,
    {
        if self.is_shutting_down() {
            return Err(NestChatError::connection("server is shutting down"));
        }

        let (conn, rx) = Connection::open(
            Arc::clone(&self.registry),
            identity,
            scope,
            self.ingress.config.outbound_buffer,
            &self.ingress.shutdown,
        )?;
        let writer = tokio::spawn(run_writer(conn.id(), rx, outbound, conn.close_token()));

        let reason = run_ingress(&self.ingress, conn, inbound).await;

        if let Err(e) = writer.await {
            warn!("Writer task failed: {}", e);
        }
        Ok(reason)
    }

    /// Open a trade group and announce it to the other members
    pub async fn open_group(&self, creator: &str, request: NewGroup) -> Result<GroupRecord> {
        let store = &self.ingress.store;
        let group = prepare_group(creator, request, Utc::now())?;

        let existing = store.find_groups_by_product(&group.product_id).await?;
        if let Some(dup) = find_duplicate(&existing, &group.members) {
            return Err(NestChatError::GroupExists {
                id: dup.id.to_string(),
                name: dup.name.clone(),
            });
        }

        store.insert_group(group.clone()).await?;
        // The group stays stored if the greeting fails; nobody is announced
        if let Err(e) = store.save_message(&greeting(&group)).await {
            error!(
                "Group {} stored without its greeting; members not announced: {}",
                group.id, e
            );
            return Err(e);
        }
        info!(
            "Group {} opened by {} for product {}",
            group.id, creator, group.product_id
        );

        let summary = group.summary();
        for member in group.other_members(creator) {
            let mailer = Arc::clone(&self.ingress.mailer);
            let recipient = member.to_string();
            self.tracker.spawn(async move {
                let result = mailer.notify_interest(&recipient).await;
                Metrics::global().record_notification(result.is_ok());
                if let Err(e) = result {
                    warn!("Interest email to {} failed: {}", recipient, e);
                }
            });

            let event = GroupCreatedEvent {
                group: summary.clone(),
                recipient: member.to_string(),
            };
            if let Err(e) = self.ingress.queues.enqueue_group_created(event).await {
                warn!("Group {} not announced to {}: {}", group.id, member, e);
            }
        }

        Ok(group)
    }

    /// Record that `identity` has read `group` up to now
    pub async fn mark_read(&self, group: GroupId, identity: &str) -> Result<Timestamp> {
        let now = Utc::now();
        self.ingress.store.set_read_status(group, identity, now).await?;
        Ok(now)
    }

    /// Stop accepting work, close every connection and wait for all tasks
    pub async fn shutdown(&self) {
        info!(
            "Shutting down chat hub with {} live connections",
            self.registry.len()
        );
        self.ingress.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        debug!("Chat hub stopped");
    }
}

impl std::fmt::Debug for ChatHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatHub")
            .field("connections", &self.registry.len())
            .field("tasks", &self.tracker.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

/// Upper bound on writing out what was queued when a connection closes
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Drain a connection's outbound buffer into its sink until it closes
///
/// Messages already queued when the connection closes are still written,
/// unless the sink itself has failed.
async fn run_writer<O>(
    id: ConnectionId,
    mut rx: mpsc::Receiver<ServerMessage>,
    mut sink: O,
    close: CancellationToken,
) where
    O: Sink<ServerMessage> + Unpin,
    O::Error: std::fmt::Display + Send,
{
    let mut sink_failed = false;
    loop {
        tokio::select! {
            _ = close.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => {
                    if let Err(e) = sink.send(message).await {
                        debug!("{} write failed: {}", id, e);
                        close.cancel();
                        sink_failed = true;
                        break;
                    }
                }
                None => break,
            },
        }
    }

    if !sink_failed {
        rx.close();
        let flush = async {
            let mut flushed = 0usize;
            while let Some(message) = rx.recv().await {
                if let Err(e) = sink.feed(message).await {
                    debug!("{} write failed while flushing: {}", id, e);
                    return flushed;
                }
                flushed += 1;
            }
            flushed
        };
        match tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, flush).await {
            Ok(0) => {}
            Ok(n) => debug!("{} flushed {} queued messages on close", id, n),
            Err(_) => debug!("{} gave up flushing queued messages", id),
        }
    }

    if let Err(e) = sink.close().await {
        debug!("{} close failed: {}", id, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailer::{NotificationKind, RecordingMailer};
    use crate::store::MemoryStore;
    use futures::channel::mpsc as fmpsc;
    use futures::StreamExt;

    type Inbound = fmpsc::UnboundedSender<std::result::Result<String, TransportError>>;

    fn start() -> (Arc<ChatHub>, Arc<MemoryStore>, Arc<RecordingMailer>) {
        let store = Arc::new(MemoryStore::new());
        let mailer = Arc::new(RecordingMailer::new());
        let hub = ChatHub::start(ChatConfig::default(), store.clone(), mailer.clone());
        (hub, store, mailer)
    }

    fn request(members: &[&str]) -> NewGroup {
        NewGroup {
            name: "Road bike".into(),
            members: members.iter().map(|s| s.to_string()).collect(),
            product_id: "prod-1".into(),
            cover_image: String::new(),
        }
    }

    /// Serve a connection in the background; returns its inbound sender and
    /// the stream of messages written to it
    fn serve(
        hub: &Arc<ChatHub>,
        identity: &str,
        scope: Scope,
    ) -> (
        Inbound,
        fmpsc::UnboundedReceiver<ServerMessage>,
        JoinHandle<Result<DisconnectReason>>,
    ) {
        let (in_tx, in_rx) = fmpsc::unbounded();
        let (out_tx, out_rx) = fmpsc::unbounded();
        let hub = Arc::clone(hub);
        let identity = identity.to_string();
        let task = tokio::spawn(async move {
            hub.serve_connection(&identity, scope, in_rx, out_tx).await
        });
        (in_tx, out_rx, task)
    }

    async fn wait_for_connections(hub: &ChatHub, n: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while hub.registry().len() != n {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("connections did not register");
    }

    #[tokio::test]
    async fn test_open_group_announces_to_seller() {
        let (hub, store, mailer) = start();
        let (_in, mut out, _task) = serve(&hub, "seller@example.com", Scope::Unscoped);
        wait_for_connections(&hub, 1).await;

        let group = hub
            .open_group("buyer@example.com", request(&["seller@example.com"]))
            .await
            .unwrap();

        match tokio::time::timeout(Duration::from_secs(2), out.next()).await.unwrap() {
            Some(ServerMessage::NewGroupCreated { group: summary }) => {
                assert_eq!(summary.id, group.id);
                assert_eq!(summary.members, group.members);
            }
            other => panic!("unexpected {:?}", other),
        }

        let messages = store.messages(group.id);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender_email, "buyer@example.com");

        hub.shutdown().await;
        assert_eq!(
            mailer.recipients(NotificationKind::Interest),
            vec!["seller@example.com"]
        );
    }

    #[tokio::test]
    async fn test_open_group_rejects_duplicate() {
        let (hub, _store, _mailer) = start();
        let first = hub
            .open_group("buyer@example.com", request(&["seller@example.com"]))
            .await
            .unwrap();

        let err = hub
            .open_group(
                "buyer@example.com",
                request(&["buyer@example.com", "seller@example.com"]),
            )
            .await
            .unwrap_err();
        match err {
            NestChatError::GroupExists { id, name } => {
                assert_eq!(id, first.id.to_string());
                assert_eq!(name, "Road bike");
            }
            other => panic!("unexpected {:?}", other),
        }
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_open_group_self_chat() {
        let (hub, _store, mailer) = start();
        let err = hub
            .open_group("me@example.com", request(&["me@example.com"]))
            .await
            .unwrap_err();
        assert!(matches!(err, NestChatError::SelfChat));
        hub.shutdown().await;
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_mark_read() {
        let (hub, store, _mailer) = start();
        let group = hub
            .open_group("buyer@example.com", request(&["seller@example.com"]))
            .await
            .unwrap();

        let at = hub.mark_read(group.id, "seller@example.com").await.unwrap();
        let record = store.group(group.id).unwrap();
        assert_eq!(record.read_status.get("seller@example.com"), Some(&at));

        assert!(matches!(
            hub.mark_read(GroupId::generate(), "seller@example.com").await,
            Err(NestChatError::GroupNotFound(_))
        ));
        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_closes_connections() {
        let (hub, _store, _mailer) = start();
        let (_in_a, _out_a, task_a) = serve(&hub, "a@example.com", Scope::Unscoped);
        let (_in_b, _out_b, task_b) = serve(&hub, "b@example.com", Scope::Group(GroupId::generate()));
        wait_for_connections(&hub, 2).await;

        hub.shutdown().await;

        assert_eq!(task_a.await.unwrap().unwrap(), DisconnectReason::Shutdown);
        assert_eq!(task_b.await.unwrap().unwrap(), DisconnectReason::Shutdown);
        assert!(hub.registry().is_empty());

        // No new connections after shutdown
        let (_in, in_rx) = fmpsc::unbounded::<std::result::Result<String, TransportError>>();
        let (out_tx, _out) = fmpsc::unbounded::<ServerMessage>();
        let result = hub
            .serve_connection("late@example.com", Scope::Unscoped, in_rx, out_tx)
            .await;
        assert!(matches!(result, Err(NestChatError::Connection(_))));
    }

    #[tokio::test]
    async fn test_writer_failure_closes_connection() {
        let (hub, _store, _mailer) = start();
        let group = hub
            .open_group("buyer@example.com", request(&["seller@example.com"]))
            .await
            .unwrap();

        let (_in_s, out_s, task_s) = serve(&hub, "seller@example.com", Scope::Group(group.id));
        let (in_b, _out_b, _task_b) = serve(&hub, "buyer@example.com", Scope::Group(group.id));
        wait_for_connections(&hub, 2).await;

        // The seller's socket is gone; the next write fails
        drop(out_s);
        in_b.unbounded_send(Ok(r#"{"content":"ping"}"#.into())).unwrap();

        let reason = tokio::time::timeout(Duration::from_secs(2), task_s)
            .await
            .expect("seller connection was not torn down")
            .unwrap()
            .unwrap();
        assert_eq!(reason, DisconnectReason::Closed);
        wait_for_connections(&hub, 1).await;

        hub.shutdown().await;
    }

    #[tokio::test]
    async fn test_writer_flushes_queued_messages_on_close() {
        let (tx, rx) = mpsc::channel(8);
        let (out_tx, out_rx) = fmpsc::unbounded::<ServerMessage>();
        let close = CancellationToken::new();

        let group_id = GroupId::generate();
        for _ in 0..3 {
            tx.try_send(ServerMessage::NewMessageNotification {
                group_id,
                timestamp: Utc::now(),
            })
            .unwrap();
        }
        close.cancel();

        run_writer(ConnectionId::new(1), rx, out_tx, close).await;

        // Sink was closed after the flush, so the stream ends
        let written: Vec<ServerMessage> = out_rx.collect().await;
        assert_eq!(written.len(), 3);
        assert!(tx.is_closed());
    }

    #[tokio::test]
    async fn test_writer_stops_after_sink_failure() {
        let (tx, rx) = mpsc::channel(8);
        let (out_tx, out_rx) = fmpsc::unbounded::<ServerMessage>();
        let close = CancellationToken::new();
        drop(out_rx);

        tx.try_send(ServerMessage::NewMessageNotification {
            group_id: GroupId::generate(),
            timestamp: Utc::now(),
        })
        .unwrap();

        run_writer(ConnectionId::new(1), rx, out_tx, close.clone()).await;
        assert!(close.is_cancelled());
    }

    #[tokio::test]
    async fn test_burst_past_outbound_buffer_keeps_peer() {
        let (hub, _store, _mailer) = start();
        let group = hub
            .open_group("buyer@example.com", request(&["seller@example.com"]))
            .await
            .unwrap();
        let burst = hub.config().outbound_buffer + 36;

        let (in_b, _out_b, _task_b) = serve(&hub, "buyer@example.com", Scope::Group(group.id));
        let (_in_s, mut out_s, _task_s) = serve(&hub, "seller@example.com", Scope::Group(group.id));
        wait_for_connections(&hub, 2).await;

        for i in 0..burst {
            in_b.unbounded_send(Ok(format!(r#"{{"content":"m{}"}}"#, i)))
                .unwrap();
        }

        let mut received = Vec::new();
        while received.len() < burst {
            match tokio::time::timeout(Duration::from_secs(2), out_s.next()).await.unwrap() {
                Some(ServerMessage::Chat(chat)) => received.push(chat.content),
                // The announcement may race the seller's registration
                Some(ServerMessage::NewGroupCreated { .. }) => {}
                other => panic!("unexpected {:?}", other),
            }
        }
        let expected: Vec<String> = (0..burst).map(|i| format!("m{}", i)).collect();
        assert_eq!(received, expected);
        assert_eq!(hub.registry().len(), 2);

        hub.shutdown().await;
    }
}
