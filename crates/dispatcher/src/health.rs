//! Heartbeat-based health monitor
//!
//! Periodically scans the registry and evicts workers that have not been
//! heard from within the heartbeat timeout. It only reads timestamps recorded
//! by the connection handlers and never touches the network.

use crate::registry::{Registry, WorkerEntry};
use std::sync::Arc;
use std::time::Duration;
use switchyard_common::METRICS;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Background evictor of stale workers
pub struct HealthMonitor {
    registry: Arc<Registry>,

    /// Time between scans
    interval: Duration,

    /// Heartbeat age beyond which a worker is evicted
    timeout: Duration,
}

impl HealthMonitor {
    /// Create a new health monitor
    pub fn new(registry: Arc<Registry>, interval: Duration, timeout: Duration) -> Self {
        Self {
            registry,
            interval,
            timeout,
        }
    }

    /// Evict every worker whose heartbeat age at `now` exceeds the timeout.
    ///
    /// Returns the evicted entries. Removing an entry cancels its release
    /// token, which closes the worker's connection.
    pub fn sweep(&self, now: Instant) -> Vec<WorkerEntry> {
        let snapshot = self.registry.snapshot();
        let mut evicted = Vec::new();

        for entry in snapshot {
            let age = entry.heartbeat_age(now);
            if age <= self.timeout {
                continue;
            }

            if let Some(removed) = self.registry.remove_if_stale(entry.id, now, self.timeout) {
                warn!(
                    "Evicting {} (port={}): no heartbeat for {:.1}s",
                    removed.id,
                    removed.listen_port,
                    age.as_secs_f64()
                );
                METRICS
                    .dispatcher
                    .workers_removed
                    .with_label_values(&["evicted"])
                    .inc();
                evicted.push(removed);
            }
        }

        evicted
    }

    /// Scan on every tick until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            "Health monitor started: interval={:?}, timeout={:?}",
            self.interval, self.timeout
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = self.sweep(Instant::now());
                    debug!(
                        "Health scan complete: {} evicted, {} registered",
                        evicted.len(),
                        self.registry.len()
                    );
                }
            }
        }

        info!("Health monitor stopped");
    }

    /// Start the monitor as a background task
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
