//! Periodic load report for the hub daemon.
//!
//! Every `metrics_interval` the reporter asks the hub for its counters,
//! samples the daemon's own memory and CPU with `sysinfo`, and logs one
//! line. Frames dropped on full outbound queues since the previous report
//! are logged at warn level, since they mean some device is missing
//! updates.

use std::process;
use std::time::Duration;

use sysinfo::{Pid, System};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::hub::{HubHandle, HubStats};

/// One load report.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSample {
    pub connections: usize,
    pub sessions: usize,

    /// Frames dropped since the previous sample
    pub new_drops: u64,

    pub memory_mb: u64,
    pub cpu_percent: f32,
}

/// Turns successive hub counters and process usage into load samples.
pub struct LoadReporter {
    system: System,
    pid: Pid,
    last_dropped: u64,
}

impl LoadReporter {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from_u32(process::id()),
            last_dropped: 0,
        }
    }

    /// Builds a sample from `stats` and the current process usage.
    ///
    /// CPU is measured against the previous call, so the first sample
    /// reports 0%.
    pub fn sample(&mut self, stats: &HubStats) -> LoadSample {
        // Single-pid refresh does not compute CPU usage
        self.system.refresh_all();
        let (memory_bytes, cpu_percent) = self
            .system
            .process(self.pid)
            .map(|p| (p.memory(), p.cpu_usage()))
            .unwrap_or((0, 0.0));

        LoadSample {
            connections: stats.connections,
            sessions: stats.sessions,
            new_drops: self.take_new_drops(stats.dropped_frames),
            memory_mb: memory_bytes / 1024 / 1024,
            cpu_percent,
        }
    }

    /// The hub sums drops over live connections only, so the total can
    /// shrink when a lossy connection leaves.
    fn take_new_drops(&mut self, dropped_frames: u64) -> u64 {
        let new_drops = dropped_frames.saturating_sub(self.last_dropped);
        self.last_dropped = dropped_frames;
        new_drops
    }
}

impl Default for LoadReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns the load reporting task.
///
/// Stops on `cancel_token` or when the hub is gone.
pub fn spawn_monitor_task(
    hub: HubHandle,
    period: Duration,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut reporter = LoadReporter::new();
        let mut tick = interval(period);

        info!(interval_secs = period.as_secs(), "Load reporter started");

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Load reporter shutting down");
                    break;
                }

                _ = tick.tick() => {
                    let Ok(stats) = hub.stats().await else {
                        debug!("Load reporter stopping: hub channel closed");
                        break;
                    };
                    log_sample(&reporter.sample(&stats));
                }
            }
        }

        debug!("Load reporter task completed");
    })
}

fn log_sample(sample: &LoadSample) {
    if sample.new_drops > 0 {
        warn!(
            new_drops = sample.new_drops,
            connections = sample.connections,
            sessions = sample.sessions,
            memory_mb = sample.memory_mb,
            "Outbound queues full, frames dropped"
        );
    } else {
        debug!(
            connections = sample.connections,
            sessions = sample.sessions,
            memory_mb = sample.memory_mb,
            cpu_percent = format!("{:.1}", sample.cpu_percent),
            "Hub load"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(connections: usize, dropped_frames: u64) -> HubStats {
        HubStats {
            connections,
            sessions: 1,
            dropped_frames,
        }
    }

    #[test]
    fn test_sample_carries_hub_counters() {
        let mut reporter = LoadReporter::new();
        let sample = reporter.sample(&stats(3, 0));

        assert_eq!(sample.connections, 3);
        assert_eq!(sample.sessions, 1);
        assert_eq!(sample.new_drops, 0);
        assert!(sample.cpu_percent >= 0.0);
    }

    #[test]
    fn test_new_drops_are_counted_once() {
        let mut reporter = LoadReporter::new();
        assert_eq!(reporter.take_new_drops(4), 4);
        assert_eq!(reporter.take_new_drops(4), 0);
        assert_eq!(reporter.take_new_drops(7), 3);

        // Lossy connection left
        assert_eq!(reporter.take_new_drops(2), 0);
        assert_eq!(reporter.take_new_drops(5), 3);
    }

    #[tokio::test]
    async fn test_monitor_task_stops_on_cancel() {
        let hub = crate::hub::spawn_hub(&crate::config::HubConfig::default());
        let cancel = CancellationToken::new();
        let task = spawn_monitor_task(hub, Duration::from_millis(10), cancel.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        task.await.unwrap();
    }
}
