use std::sync::Arc;
use std::time::Duration;

use journal_pipeline::subscribers::SubscriberRegistry;

/// Interval between heartbeat pings.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Spawn a background task that pings every live job subscriber.
///
/// Runs until aborted; `main` aborts it during shutdown.
pub fn start_heartbeat(subscribers: Arc<SubscriberRegistry>) -> tokio::task::JoinHandle<()> {
    start_heartbeat_every(subscribers, HEARTBEAT_INTERVAL)
}

pub fn start_heartbeat_every(
    subscribers: Arc<SubscriberRegistry>,
    period: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;
            let outcome = subscribers.ping_all().await;
            tracing::debug!(
                delivered = outcome.delivered,
                dropped = outcome.dropped,
                "Job subscriber heartbeat ping",
            );
        }
    })
}
