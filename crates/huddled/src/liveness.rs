//! Liveness monitor - periodically evicts connections that stopped heartbeating.
//!
//! The monitor only ticks. Staleness is decided inside the hub actor so a
//! sweep can never interleave with a heartbeat from the same connection.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::hub::HubHandle;

/// Spawn a background task that triggers a stale sweep every `period`.
///
/// Exits when `cancel` fires or the hub actor has shut down.
pub fn spawn_liveness_monitor(
    hub: HubHandle,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // First sweep one full period after start
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        debug!(period_secs = period.as_secs(), "Liveness monitor started");

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Liveness monitor shutting down");
                    break;
                }

                _ = ticker.tick() => {
                    if hub.sweep_stale().await.is_err() {
                        debug!("Liveness monitor stopping: hub channel closed");
                        break;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::hub::{spawn_hub, HubEvent, RemovalReason};
    use huddle_core::{DeviceType, UserId};
    use huddle_protocol::close;

    #[tokio::test(start_paused = true)]
    async fn test_silent_connection_is_evicted_by_monitor() {
        let config = HubConfig::default();
        let hub = spawn_hub(&config);
        let cancel = CancellationToken::new();
        let task = spawn_liveness_monitor(hub.clone(), config.sweep_interval, cancel.clone());

        let mut events = hub.subscribe();
        let admission = hub.admit(UserId::new("u1"), DeviceType::Mobile).await.unwrap();

        // 30s: not stale yet. 60s: exactly at the window. 90s: past it.
        tokio::time::sleep(Duration::from_secs(95)).await;

        let severance = admission.severed.await.unwrap();
        assert_eq!(severance.code, close::HEARTBEAT_TIMEOUT);
        assert_eq!(hub.stats().await.unwrap().connections, 0);

        let mut saw_stale = false;
        while let Ok(event) = events.try_recv() {
            if let HubEvent::Removed { reason, .. } = event {
                saw_stale = reason == RemovalReason::Stale;
            }
        }
        assert!(saw_stale);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeating_connection_survives() {
        let config = HubConfig::default();
        let hub = spawn_hub(&config);
        let cancel = CancellationToken::new();
        spawn_liveness_monitor(hub.clone(), config.sweep_interval, cancel.clone());

        let admission = hub.admit(UserId::new("u1"), DeviceType::Desktop).await.unwrap();
        for _ in 0..10 {
            tokio::time::sleep(Duration::from_secs(25)).await;
            hub.touch(admission.connection_id.clone()).await.unwrap();
        }

        assert_eq!(hub.stats().await.unwrap().connections, 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_monitor_stops_on_cancel() {
        let hub = spawn_hub(&HubConfig::default());
        let cancel = CancellationToken::new();
        let task = spawn_liveness_monitor(hub, Duration::from_secs(30), cancel.clone());

        cancel.cancel();
        task.await.unwrap();
    }
}
