//! Per-connection ingress
//!
//! Reads client frames, persists chat messages, triggers side effects and
//! hands messages to the delivery queue. Group-scoped connections also run
//! a read-status ticker. Teardown always deregisters the connection, stops
//! the ticker, and waits (bounded) for any notification emails it spawned.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{Stream, StreamExt};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use nestchat_protocol::{decode_inbound, ChatMessage, GroupId, Scope, Timestamp};

use crate::config::ChatConfig;
use crate::connection::Connection;
use crate::events::{DeliveryEvent, EventQueues};
use crate::mailer::Mailer;
use crate::observability::Metrics;
use crate::store::ChatStore;
use crate::ticker::run_read_status_ticker;
use crate::transport::TransportError;

/// Why a connection's ingress loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The peer closed the stream
    RemoteClosed,
    /// The transport failed while reading
    ReadError,
    /// The peer sent a frame that is not a valid chat payload
    ProtocolError,
    /// The connection was closed from the server side (failed delivery)
    Closed,
    /// The server is shutting down
    Shutdown,
}

/// Shared collaborators every ingress task needs
#[derive(Clone)]
pub struct IngressContext {
    pub store: Arc<dyn ChatStore>,
    pub mailer: Arc<dyn Mailer>,
    pub queues: EventQueues,
    pub config: Arc<ChatConfig>,
    pub shutdown: CancellationToken,
}

/// Whether a reply at `now` wakes up a group that was last active at `last`
///
/// A group with no recorded activity, or with activity in the future
/// (clock skew), is never considered inactive.
pub fn is_inactive(last: Option<Timestamp>, now: Timestamp, threshold: Duration) -> bool {
    match last {
        Some(last) => match (now - last).to_std() {
            Ok(elapsed) => elapsed > threshold,
            Err(_) => false,
        },
        None => false,
    }
}

/// Run ingress for one connection until it ends
pub async fn run_ingress<S>(ctx: &IngressContext, mut conn: Connection, mut inbound: S) -> DisconnectReason
where
    S: Stream<Item = Result<String, TransportError>> + Unpin,
{
    let close = conn.close_token();
    let mut notifications = JoinSet::new();

    let ticker: Option<JoinHandle<u64>> = conn.scope().group().map(|group| {
        tokio::spawn(run_read_status_ticker(
            Arc::clone(&ctx.store),
            group,
            Arc::from(conn.identity()),
            ctx.config.read_status_interval(),
            close.clone(),
        ))
    });

    let reason = loop {
        tokio::select! {
            _ = close.cancelled() => {
                break if ctx.shutdown.is_cancelled() {
                    DisconnectReason::Shutdown
                } else {
                    DisconnectReason::Closed
                };
            }
            frame = inbound.next() => match frame {
                None => break DisconnectReason::RemoteClosed,
                Some(Err(e)) => {
                    debug!("{} read failed: {}", conn.id(), e);
                    break DisconnectReason::ReadError;
                }
                Some(Ok(text)) => match conn.scope() {
                    Scope::Group(group) => {
                        if let Err(reason) =
                            handle_frame(ctx, &conn, group, &text, &mut notifications).await
                        {
                            break reason;
                        }
                    }
                    Scope::Unscoped => {
                        trace!("{} discarding {} byte frame on listener", conn.id(), text.len());
                    }
                },
            },
        }

        // Reap finished email tasks so the set does not grow with chat length
        while notifications.try_join_next().is_some() {}
    };

    info!("{} ingress ended: {:?}", conn.id(), reason);
    conn.release();

    if let Some(ticker) = ticker {
        if let Err(e) = ticker.await {
            warn!("{} read-status ticker failed: {}", conn.id(), e);
        }
    }

    drain_notifications(&mut notifications, ctx.config.notification_drain_timeout()).await;
    reason
}

/// Handle one frame on a group-scoped connection
///
/// Only protocol and queue failures end the connection; store and mail
/// failures are logged and the connection keeps going.
async fn handle_frame(
    ctx: &IngressContext,
    conn: &Connection,
    group: GroupId,
    text: &str,
    notifications: &mut JoinSet<()>,
) -> Result<(), DisconnectReason> {
    let inbound = match decode_inbound(text) {
        Ok(inbound) => inbound,
        Err(e) => {
            warn!("{} sent an invalid frame: {}", conn.id(), e);
            return Err(DisconnectReason::ProtocolError);
        }
    };

    if let Some(claimed) = inbound.sender_email.as_deref() {
        if claimed != conn.identity() {
            warn!(
                "{} claimed sender {} but is connected as {}; using connection identity",
                conn.id(),
                claimed,
                conn.identity()
            );
        }
    }

    let message = ChatMessage {
        group_id: group,
        sender_email: conn.identity().to_string(),
        content: inbound.content,
        timestamp: Utc::now(),
    };

    if let Err(e) = ctx.store.save_message(&message).await {
        warn!("Dropping message from {} in group {}: {}", conn.identity(), group, e);
        Metrics::global().record_persistence_failure();
        return Ok(());
    }
    Metrics::global().record_message_persisted();

    match ctx.store.get_group(group).await {
        Ok(record) => {
            if is_inactive(
                record.last_message_at,
                message.timestamp,
                ctx.config.inactivity_threshold(),
            ) {
                debug!("Group {} woke up; notifying other members", group);
                for member in record.other_members(conn.identity()) {
                    spawn_inactive_reply(notifications, Arc::clone(&ctx.mailer), member.to_string());
                }
            }
        }
        Err(e) => warn!("Could not load group {} for inactivity check: {}", group, e),
    }

    if let Err(e) = ctx.store.set_last_activity(group, message.timestamp).await {
        warn!("Failed to update last activity of group {}: {}", group, e);
    }
    if let Err(e) = ctx
        .store
        .set_read_status(group, conn.identity(), message.timestamp)
        .await
    {
        warn!("Failed to update read status of {} in group {}: {}", conn.identity(), group, e);
    }

    let event = DeliveryEvent {
        message,
        origin: conn.id(),
    };
    if let Err(e) = ctx.queues.enqueue_delivery(event).await {
        if ctx.shutdown.is_cancelled() {
            return Err(DisconnectReason::Shutdown);
        }
        error!("{}: message broadcaster is gone: {}", conn.id(), e);
        return Err(DisconnectReason::Closed);
    }
    Ok(())
}

fn spawn_inactive_reply(tasks: &mut JoinSet<()>, mailer: Arc<dyn Mailer>, recipient: String) {
    tasks.spawn(async move {
        let result = mailer.notify_inactive_reply(&recipient).await;
        Metrics::global().record_notification(result.is_ok());
        if let Err(e) = result {
            warn!("Inactive-reply email to {} failed: {}", recipient, e);
        }
    });
}

async fn drain_notifications(tasks: &mut JoinSet<()>, timeout: Duration) {
    if tasks.is_empty() {
        return;
    }
    let drained = tokio::time::timeout(timeout, async {
        while tasks.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!("Aborting {} notification emails still pending at teardown", tasks.len());
        tasks.abort_all();
    }
}
