//! Observability subsystem for the chat server
//!
//! Process-wide counters; structured logging lives in `nestchat_utils::logging`.

pub mod metrics;

pub use metrics::{Metrics, MetricsSnapshot};
