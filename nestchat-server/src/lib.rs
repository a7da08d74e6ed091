//! nestchat-server: realtime chat fan-out for the GooseNest marketplace
//!
//! Tracks live websocket connections, routes chat messages to the members of
//! a trade group and new-group announcements to their recipient, and keeps
//! read status and inactivity emails going on the side.

pub mod broadcast;
pub mod config;
pub mod connection;
pub mod events;
pub mod groups;
pub mod hub;
pub mod ingress;
pub mod listener;
pub mod mailer;
pub mod observability;
pub mod registry;
pub mod store;
pub mod ticker;
pub mod transport;

pub use config::{AppConfig, ChatConfig, ConfigLoader, MailConfig};
pub use groups::NewGroup;
pub use hub::ChatHub;
pub use ingress::DisconnectReason;
pub use mailer::{Mailer, RecordingMailer, SmtpMailer};
pub use registry::{ConnectionEntry, ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use store::{ChatStore, MemoryStore};
pub use transport::TransportError;
