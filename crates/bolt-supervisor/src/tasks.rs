use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::registry::{SessionCommand, SessionRegistry};

/// Periodically broadcast `command` to every session until `shutdown`.
/// The first tick fires one `period` after start.
pub fn start_ticker(
    registry: Arc<SessionRegistry>,
    command: SessionCommand,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let delivered = registry.broadcast(command);
                    tracing::trace!(?command, delivered, "timer tick");
                }
            }
        }
        tracing::debug!(?command, "timer stopped");
    })
}
