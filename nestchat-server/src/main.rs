//! nestchat server - websocket fan-out daemon

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};

use nestchat_server::config::DEFAULT_CONFIG_TOML;
use nestchat_server::listener::run_accept_loop;
use nestchat_server::observability::Metrics;
use nestchat_server::{ChatHub, ConfigLoader, MemoryStore, SmtpMailer};
use nestchat_utils::{LogConfig, NestChatError, Result};

/// Run the server until ctrl-c
async fn run_server() -> Result<()> {
    info!("nestchat server starting");

    let app_config = ConfigLoader::load_and_validate()?;
    let mailer = SmtpMailer::new(&app_config.mail)?;
    if !mailer.is_enabled() {
        info!("Notification emails disabled (no SMTP host)");
    }

    // Chat history lives in the marketplace database; standalone runs keep it in memory
    let store = Arc::new(MemoryStore::new());
    let hub = ChatHub::start(app_config.chat.clone(), store, Arc::new(mailer));

    let listener = TcpListener::bind(&app_config.server.listen_addr)
        .await
        .map_err(|e| {
            NestChatError::connection(format!(
                "Failed to bind {}: {}",
                app_config.server.listen_addr, e
            ))
        })?;
    let accept = tokio::spawn(run_accept_loop(listener, Arc::clone(&hub)));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {}", e);
    }
    info!("Shutdown requested");

    hub.shutdown().await;
    if let Err(e) = accept.await {
        error!("Accept loop failed: {}", e);
    }

    let stats = Metrics::global().snapshot();
    info!(
        "nestchat server stopped: {} connections, {} messages, {} deliveries ({} failed), {} emails ({} failed)",
        stats.connections_opened,
        stats.messages_persisted,
        stats.deliveries,
        stats.delivery_failures,
        stats.notifications_sent + stats.notifications_failed,
        stats.notifications_failed
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(String::as_str) {
        Some("print-default-config") => {
            print!("{}", DEFAULT_CONFIG_TOML.trim_start());
            return Ok(());
        }
        Some("--daemon") => nestchat_utils::init_logging_with_config(LogConfig::daemon())?,
        _ => nestchat_utils::init_logging_with_config(LogConfig::server())?,
    }

    run_server().await
}
