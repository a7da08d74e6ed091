//! Broadcast event queues
//!
//! Two bounded FIFO queues, each with exactly one consumer: chat deliveries
//! feed the message broadcaster and group-created events feed the group
//! broadcaster. Producers wait when a queue is full.

use tokio::sync::mpsc;

use nestchat_protocol::{ChatMessage, GroupSummary};
use nestchat_utils::{NestChatError, Result};

use crate::registry::ConnectionId;

/// A persisted chat message waiting for fan-out
#[derive(Debug, Clone)]
pub struct DeliveryEvent {
    pub message: ChatMessage,
    /// Connection the message came from; never delivered back to it
    pub origin: ConnectionId,
}

/// A new group to announce to one member
#[derive(Debug, Clone)]
pub struct GroupCreatedEvent {
    pub group: GroupSummary,
    pub recipient: String,
}

/// Producer side of both queues
#[derive(Debug, Clone)]
pub struct EventQueues {
    deliveries: mpsc::Sender<DeliveryEvent>,
    group_events: mpsc::Sender<GroupCreatedEvent>,
}

/// Consumer side of both queues, split between the two broadcasters
#[derive(Debug)]
pub struct EventReceivers {
    pub deliveries: mpsc::Receiver<DeliveryEvent>,
    pub group_events: mpsc::Receiver<GroupCreatedEvent>,
}

impl EventQueues {
    /// Create both queues with the given capacities
    pub fn new(delivery_capacity: usize, group_capacity: usize) -> (Self, EventReceivers) {
        let (deliveries, delivery_rx) = mpsc::channel(delivery_capacity);
        let (group_events, group_rx) = mpsc::channel(group_capacity);
        (
            Self {
                deliveries,
                group_events,
            },
            EventReceivers {
                deliveries: delivery_rx,
                group_events: group_rx,
            },
        )
    }

    /// Enqueue a chat message for fan-out
    pub async fn enqueue_delivery(&self, event: DeliveryEvent) -> Result<()> {
        self.deliveries
            .send(event)
            .await
            .map_err(|_| NestChatError::QueueClosed("delivery"))
    }

    /// Enqueue a group-created announcement
    pub async fn enqueue_group_created(&self, event: GroupCreatedEvent) -> Result<()> {
        self.group_events
            .send(event)
            .await
            .map_err(|_| NestChatError::QueueClosed("group_created"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(content: &str) -> DeliveryEvent {
        DeliveryEvent {
            message: ChatMessage {
                group_id: "65f0a1b2c3d4e5f601234567".parse().unwrap(),
                sender_email: "alice@example.com".into(),
                content: content.into(),
                timestamp: Utc::now(),
            },
            origin: ConnectionId::new(1),
        }
    }

    #[tokio::test]
    async fn test_delivery_queue_is_fifo() {
        let (queues, mut rx) = EventQueues::new(8, 8);
        for content in ["one", "two", "three"] {
            queues.enqueue_delivery(event(content)).await.unwrap();
        }

        for expected in ["one", "two", "three"] {
            let got = rx.deliveries.recv().await.unwrap();
            assert_eq!(got.message.content, expected);
        }
    }

    #[tokio::test]
    async fn test_enqueue_after_consumer_gone() {
        let (queues, rx) = EventQueues::new(1, 1);
        drop(rx);

        let err = queues.enqueue_delivery(event("late")).await.unwrap_err();
        assert!(matches!(err, NestChatError::QueueClosed("delivery")));
        assert!(err.is_invariant_violation());
    }
}
