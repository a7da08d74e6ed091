//! TCP accept loop for websocket clients

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::hub::ChatHub;
use crate::transport::websocket::accept_connection;

/// Accept connections until the hub shuts down
///
/// Each connection is served on a hub-tracked task so shutdown waits for it.
pub async fn run_accept_loop(listener: TcpListener, hub: Arc<ChatHub>) {
    match listener.local_addr() {
        Ok(addr) => info!("WebSocket listener bound to {}", addr),
        Err(e) => error!("WebSocket listener has no local address: {}", e),
    }

    let shutdown = hub.shutdown_token();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer_addr)) => {
                        debug!("New TCP connection from {}", peer_addr);
                        let hub_clone = Arc::clone(&hub);
                        hub.spawn(accept_connection(hub_clone, stream, peer_addr));
                    }
                    Err(e) => {
                        error!("TCP accept error: {}", e);
                    }
                }
            }
            _ = shutdown.cancelled() => {
                info!("Shutdown signal received, stopping accept loop");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatConfig;
    use crate::mailer::RecordingMailer;
    use crate::store::MemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_accept_loop_stops_on_shutdown() {
        let hub = ChatHub::start(
            ChatConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(RecordingMailer::new()),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let handle = tokio::spawn(run_accept_loop(listener, Arc::clone(&hub)));
        tokio::time::sleep(Duration::from_millis(20)).await;

        hub.shutdown().await;

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok(), "accept loop did not shut down");
    }
}
