//! Configuration loader

use std::path::Path;

use nestchat_utils::{config_file, NestChatError, Result};

use super::AppConfig;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from default location
    pub fn load() -> Result<AppConfig> {
        let path = config_file();
        if path.exists() {
            Self::load_from_path(&path)
        } else {
            Ok(AppConfig::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<AppConfig> {
        let content = std::fs::read_to_string(path).map_err(|e| NestChatError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        Self::parse(&content, path)
    }

    /// Parse configuration from string
    pub fn parse(content: &str, path: &Path) -> Result<AppConfig> {
        toml::from_str(content).map_err(|e| NestChatError::ConfigInvalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Validate configuration
    pub fn validate(config: &AppConfig) -> Result<()> {
        if config.server.listen_addr.trim().is_empty() {
            return Err(NestChatError::config("listen_addr must not be empty"));
        }

        let chat = &config.chat;
        if chat.read_status_interval_secs == 0 {
            return Err(NestChatError::config(
                "read_status_interval_secs must be at least 1",
            ));
        }

        // tokio's bounded channels panic on zero capacity
        if chat.delivery_queue_capacity == 0
            || chat.group_event_queue_capacity == 0
            || chat.outbound_buffer == 0
        {
            return Err(NestChatError::config(
                "queue capacities and outbound_buffer must be at least 1",
            ));
        }

        if config.mail.is_enabled() && config.mail.from.parse::<lettre::message::Mailbox>().is_err() {
            return Err(NestChatError::config(format!(
                "mail.from is not a valid mailbox: {}",
                config.mail.from
            )));
        }

        Ok(())
    }

    /// Load and validate
    pub fn load_and_validate() -> Result<AppConfig> {
        let config = Self::load()?;
        Self::validate(&config)?;
        Ok(config)
    }
}
