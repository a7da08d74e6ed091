//! Group-created fan-out

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use nestchat_protocol::ServerMessage;

use super::{deliver, FanOutReport};
use crate::events::GroupCreatedEvent;
use crate::observability::Metrics;
use crate::registry::ConnectionRegistry;

/// Consumer of the group-created queue
///
/// Every connection of the recipient identity is told, whatever its scope.
pub struct GroupCreationBroadcaster {
    registry: Arc<ConnectionRegistry>,
    events: mpsc::Receiver<GroupCreatedEvent>,
    backlog_wait: Duration,
}

impl GroupCreationBroadcaster {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        events: mpsc::Receiver<GroupCreatedEvent>,
    ) -> Self {
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
        debug!("Group-creation broadcaster started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received, stopping group-creation broadcaster");
                    break;
                }
                event = self.events.recv() => match event {
                    Some(event) => {
                        self.fan_out(&event).await;
                    }
                    None => {
                        debug!("Group-created queue closed, stopping broadcaster");
                        break;
                    }
                },
            }
        }
    }

    /// Announce one group to its recipient's connections
    pub async fn fan_out(&self, event: &GroupCreatedEvent) -> FanOutReport {
        Metrics::global().record_group_event();
        let mut report = FanOutReport::default();

        for entry in self.registry.snapshot() {
            if *entry.identity != *event.recipient {
                continue;
            }
            let message = ServerMessage::NewGroupCreated {
                group: event.group.clone(),
            };
            let outcome = deliver(&self.registry, &entry, message, self.backlog_wait).await;
            report.record(outcome, true);
        }

        if report == FanOutReport::default() {
            debug!(
                "No live connection for {}; group {} announcement skipped",
                event.recipient, event.group.id
            );
        }
        report
    }
}
