//! Configuration schema structs

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub chat: ChatConfig,
    pub mail: MailConfig,
}

/// Listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the websocket listener binds to
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8081".into(),
        }
    }
}

/// Fan-out and side-effect tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// A reply after this much silence emails the other members
    pub inactivity_threshold_secs: u64,
    /// Period of the per-connection read-status stamp
    pub read_status_interval_secs: u64,
    /// Capacity of the chat delivery queue
    pub delivery_queue_capacity: usize,
    /// Capacity of the group-created queue
    pub group_event_queue_capacity: usize,
    /// Per-connection outbound buffer
    pub outbound_buffer: usize,
    /// How long a broadcaster waits on a full outbound buffer before skipping
    /// the message for that connection; 0 skips at once
    pub backlog_wait_ms: u64,
    /// How long teardown waits for in-flight notification emails
    pub notification_drain_timeout_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            inactivity_threshold_secs: 30 * 60,
            read_status_interval_secs: 30,
            delivery_queue_capacity: 1024,
            group_event_queue_capacity: 256,
            outbound_buffer: 64,
            backlog_wait_ms: 500,
            notification_drain_timeout_ms: 2000,
        }
    }
}

impl ChatConfig {
    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.inactivity_threshold_secs)
    }

    pub fn read_status_interval(&self) -> Duration {
        Duration::from_secs(self.read_status_interval_secs)
    }

    pub fn backlog_wait(&self) -> Duration {
        Duration::from_millis(self.backlog_wait_ms)
    }

    pub fn notification_drain_timeout(&self) -> Duration {
        Duration::from_millis(self.notification_drain_timeout_ms)
    }
}

/// Outbound SMTP settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    /// SMTP relay host; empty disables sending
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    /// Sender mailbox, e.g. `GooseNest <noreply@goosenest.app>`
    pub from: String,
    /// Link to the chat page included in notification emails
    pub chat_url: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_host: String::new(),
            smtp_port: 587,
            smtp_username: String::new(),
            smtp_password: String::new(),
            from: "GooseNest <noreply@goosenest.app>".into(),
            chat_url: "http://localhost:3000/chat".into(),
        }
    }
}

impl MailConfig {
    /// Whether an SMTP relay is configured
    pub fn is_enabled(&self) -> bool {
        !self.smtp_host.trim().is_empty()
    }
}

// Keeps the password out of logs
impl std::fmt::Debug for MailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"<redacted>")
            .field("from", &self.from)
            .field("chat_url", &self.chat_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_defaults() {
        let chat = ChatConfig::default();
        assert_eq!(chat.inactivity_threshold(), Duration::from_secs(1800));
        assert_eq!(chat.read_status_interval(), Duration::from_secs(30));
        assert_eq!(chat.notification_drain_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_mail_disabled_by_default() {
        assert!(!MailConfig::default().is_enabled());
        let mail = MailConfig {
            smtp_host: "smtp.example.com".into(),
            ..MailConfig::default()
        };
        assert!(mail.is_enabled());
    }

    #[test]
    fn test_mail_debug_redacts_password() {
        let mail = MailConfig {
            smtp_password: "hunter2".into(),
            ..MailConfig::default()
        };
        let debug = format!("{:?}", mail);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [chat]
            outbound_buffer = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.chat.outbound_buffer, 8);
        assert_eq!(config.chat.read_status_interval_secs, 30);
        assert_eq!(config.chat.backlog_wait(), Duration::from_millis(500));
        assert_eq!(config.server.listen_addr, "127.0.0.1:8081");
    }
}
