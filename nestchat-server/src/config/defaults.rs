//! Default configuration values
//!
//! These are embedded in the binary and used when no config file exists.

/// Default configuration as TOML (for reference/documentation)
pub const DEFAULT_CONFIG_TOML: &str = r##"
# nestchat configuration

[server]
listen_addr = "127.0.0.1:8081"

[chat]
# Email the other members when a group has been quiet this long
inactivity_threshold_secs = 1800
read_status_interval_secs = 30
delivery_queue_capacity = 1024
group_event_queue_capacity = 256
outbound_buffer = 64
# Wait this long for a slow connection to drain before skipping a message
backlog_wait_ms = 500
notification_drain_timeout_ms = 2000

[mail]
# Leave smtp_host empty to log notifications instead of sending them
smtp_host = ""
smtp_port = 587
smtp_username = ""
smtp_password = ""
from = "GooseNest <noreply@goosenest.app>"
chat_url = "http://localhost:3000/chat"
"##;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ConfigLoader};
    use std::path::Path;

    #[test]
    fn test_default_toml_matches_default_struct() {
        let parsed = ConfigLoader::parse(DEFAULT_CONFIG_TOML, Path::new("defaults.toml")).unwrap();
        let defaults = AppConfig::default();

        assert_eq!(parsed.server.listen_addr, defaults.server.listen_addr);
        assert_eq!(parsed.chat, defaults.chat);
        assert_eq!(parsed.mail.smtp_port, defaults.mail.smtp_port);
        assert_eq!(parsed.mail.from, defaults.mail.from);
        assert!(parsed.mail.smtp_host.is_empty());
    }
}
