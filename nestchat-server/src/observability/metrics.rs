//! Metrics collection for nestchat
//!
//! Provides a simple, internal metrics system for tracking fan-out health.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use dashmap::DashMap;

/// Global metrics collector
pub struct Metrics {
    /// Connections registered since start
    pub connections_opened_total: AtomicU64,
    /// Connections torn down since start
    pub connections_closed_total: AtomicU64,

    /// Chat messages persisted by ingress
    pub messages_persisted_total: AtomicU64,
    /// Chat messages dropped because the store rejected them
    pub persistence_failures_total: AtomicU64,

    /// Successful deliveries to a connection
    pub deliveries_total: AtomicU64,
    /// Deliveries that closed the recipient connection
    pub delivery_failures_total: AtomicU64,
    /// Messages skipped for a live connection with a full buffer
    pub backlogged_total: AtomicU64,
    /// Successful deliveries per message kind
    pub deliveries_by_kind: DashMap<&'static str, u64>,

    /// Notification emails handed to the mailer successfully
    pub notifications_sent_total: AtomicU64,
    /// Notification emails that failed
    pub notifications_failed_total: AtomicU64,

    /// Group-created events consumed by the broadcaster
    pub group_events_total: AtomicU64,
}

/// Point-in-time copy of the scalar counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub messages_persisted: u64,
    pub persistence_failures: u64,
    pub deliveries: u64,
    pub delivery_failures: u64,
    pub backlogged: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    pub group_events: u64,
}

impl Metrics {
    fn new() -> Self {
        Self {
            connections_opened_total: AtomicU64::new(0),
            connections_closed_total: AtomicU64::new(0),
            messages_persisted_total: AtomicU64::new(0),
            persistence_failures_total: AtomicU64::new(0),
            deliveries_total: AtomicU64::new(0),
            delivery_failures_total: AtomicU64::new(0),
            backlogged_total: AtomicU64::new(0),
            deliveries_by_kind: DashMap::new(),
            notifications_sent_total: AtomicU64::new(0),
            notifications_failed_total: AtomicU64::new(0),
            group_events_total: AtomicU64::new(0),
        }
    }

    /// Get the global metrics instance
    pub fn global() -> &'static Self {
        static INSTANCE: OnceLock<Metrics> = OnceLock::new();
        INSTANCE.get_or_init(Self::new)
    }

    pub fn record_connection_opened(&self) {
        self.connections_opened_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        self.connections_closed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_persisted(&self) {
        self.messages_persisted_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_failure(&self) {
        self.persistence_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful delivery of a message kind
    pub fn record_delivery(&self, kind: &'static str) {
        self.deliveries_total.fetch_add(1, Ordering::Relaxed);
        *self.deliveries_by_kind.entry(kind).or_insert(0) += 1;
    }

    pub fn record_delivery_failure(&self) {
        self.delivery_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backlogged(&self) {
        self.backlogged_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one notification email
    pub fn record_notification(&self, ok: bool) {
        if ok {
            self.notifications_sent_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.notifications_failed_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_group_event(&self) {
        self.group_events_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Deliveries recorded so far for one message kind
    pub fn deliveries_of(&self, kind: &str) -> u64 {
        self.deliveries_by_kind.get(kind).map(|v| *v).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_opened: self.connections_opened_total.load(Ordering::Relaxed),
            connections_closed: self.connections_closed_total.load(Ordering::Relaxed),
            messages_persisted: self.messages_persisted_total.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures_total.load(Ordering::Relaxed),
            deliveries: self.deliveries_total.load(Ordering::Relaxed),
            delivery_failures: self.delivery_failures_total.load(Ordering::Relaxed),
            backlogged: self.backlogged_total.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent_total.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed_total.load(Ordering::Relaxed),
            group_events: self.group_events_total.load(Ordering::Relaxed),
        }
    }
}
