//! Fan-out workers
//!
//! Each broadcaster is the single consumer of one event queue. Per event it
//! takes a registry snapshot and hands the message to every matching
//! connection's writer. A closed connection is deregistered; a backlogged one
//! misses the message but stays registered.

mod groups;
mod messages;

pub use groups::GroupCreationBroadcaster;
pub use messages::MessageBroadcaster;

use std::time::Duration;

use tracing::{debug, warn};

use nestchat_protocol::ServerMessage;

use crate::observability::Metrics;
use crate::registry::{ConnectionEntry, ConnectionRegistry, DeliveryError};

/// Outcome of fanning out one event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Full payloads delivered (chat messages or group announcements)
    pub delivered: usize,
    /// Lightweight notifications delivered to unscoped listeners
    pub notified: usize,
    /// Recipients that kept their connection but missed this message
    pub skipped: usize,
    /// Recipients closed and deregistered because their connection is gone
    pub dropped: usize,
}

impl FanOutReport {
    fn record(&mut self, outcome: Delivery, full_payload: bool) {
        match outcome {
            Delivery::Sent if full_payload => self.delivered += 1,
            Delivery::Sent => self.notified += 1,
            Delivery::Skipped => self.skipped += 1,
            Delivery::Dropped => self.dropped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Sent,
    Skipped,
    Dropped,
}

/// Send one message to one connection
async fn deliver(
    registry: &ConnectionRegistry,
    entry: &ConnectionEntry,
    message: ServerMessage,
    backlog_wait: Duration,
) -> Delivery {
    let kind = message.kind();
    match entry.handle.deliver_within(message, backlog_wait).await {
        Ok(()) => {
            debug!("Delivered {} to {} ({})", kind, entry.id(), entry.identity);
            Metrics::global().record_delivery(kind);
            Delivery::Sent
        }
        Err(DeliveryError::Backlogged) => {
            warn!(
                "{} ({}) is not draining its buffer; skipped {}",
                entry.id(),
                entry.identity,
                kind
            );
            Metrics::global().record_backlogged();
            Delivery::Skipped
        }
        Err(DeliveryError::Closed) => {
            warn!(
                "Dropping {} ({}): connection closed during {} delivery",
                entry.id(),
                entry.identity,
                kind
            );
            entry.handle.close();
            registry.deregister(entry.id());
            Metrics::global().record_delivery_failure();
            Delivery::Dropped
        }
    }
}
