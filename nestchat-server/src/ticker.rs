//! Periodic read-status stamping for group-scoped connections
//!
//! While a member has a chat open, their read timestamp for that group is
//! refreshed every period so the other side can show "seen".

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use nestchat_protocol::GroupId;

use crate::store::ChatStore;

/// Stamp `identity`'s read status for `group` every `period` until `cancel`
/// fires; the first stamp happens one period after start.
///
/// Returns the number of ticks that ran.
pub async fn run_read_status_ticker(
    store: Arc<dyn ChatStore>,
    group: GroupId,
    identity: Arc<str>,
    period: Duration,
    cancel: CancellationToken,
) -> u64 {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut ticks = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                ticks += 1;
                if let Err(e) = store.set_read_status(group, &identity, Utc::now()).await {
                    warn!("Read-status update for {} in group {} failed: {}", identity, group, e);
                }
            }
        }
    }

    debug!("Read-status ticker for {} in group {} stopped after {} ticks", identity, group, ticks);
    ticks
}
