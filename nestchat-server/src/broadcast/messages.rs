//! Chat message fan-out

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use nestchat_protocol::{Scope, ServerMessage};

use super::{deliver, FanOutReport};
use crate::events::DeliveryEvent;
use crate::registry::ConnectionRegistry;

/// Consumer of the delivery queue
///
/// Connections scoped to the message's group get the full message, unscoped
/// listeners get a `new_message_notification`, and the origin gets nothing.
pub struct MessageBroadcaster {
    registry: Arc<ConnectionRegistry>,
    events: mpsc::Receiver<DeliveryEvent>,
    backlog_wait: Duration,
}

impl MessageBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>, events: mpsc::Receiver<DeliveryEvent>) -> Self {
        Self {
            registry,
            events,
            backlog_wait: Duration::ZERO,
        }
    }

    /// How long to wait on a recipient whose outbound buffer is full
    pub fn with_backlog_wait(mut self, wait: Duration) -> Self {
        self.backlog_wait = wait;
        self
    }

    /// Process events until the queue closes or shutdown is signalled
    pub async fn run(mut self, shutdown: CancellationToken) {
        debug!("Message broadcaster started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping message broadcaster");
                    break;
                }
                event = self.events.recv() => match event {
                    Some(event) => {
                        self.fan_out(&event).await;
                    }
                    None => {
                        debug!("Delivery queue closed, stopping message broadcaster");
                        break;
                    }
                },
            }
        }
    }

    /// Deliver one event to the current set of connections
    pub async fn fan_out(&self, event: &DeliveryEvent) -> FanOutReport {
        let group = event.message.group_id;
        let mut report = FanOutReport::default();
        let mut notification = None;

        for entry in self.registry.snapshot() {
            if entry.id() == event.origin {
                continue;
            }

            let message = match entry.scope {
                Scope::Group(g) if g == group => ServerMessage::Chat(event.message.clone()),
                Scope::Unscoped => notification
                    .get_or_insert_with(|| ServerMessage::notification_for(&event.message))
                    .clone(),
                Scope::Group(_) => continue,
            };
            let is_chat = matches!(message, ServerMessage::Chat(_));

            let outcome = deliver(&self.registry, &entry, message, self.backlog_wait).await;
            report.record(outcome, is_chat);
        }

        debug!(
            "Fan-out for group {}: {} chat, {} notified, {} skipped, {} dropped",
            group, report.delivered, report.notified, report.skipped, report.dropped
        );
        report
    }
}
