//! Periodic reconciliation of outstanding image builds.

use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::orchestrator::BuildOrchestrator;

/// Runs [`BuildOrchestrator::update_running_builds_status`] on a fixed
/// interval. A sweep is awaited before the next tick, so sweeps never
/// overlap.
pub struct Reconciler {
    orchestrator: BuildOrchestrator,
    interval: Duration,
}

impl Reconciler {
    pub fn new(orchestrator: BuildOrchestrator, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Run one sweep, logging its outcome.
    pub async fn sweep(&self) {
        match self.orchestrator.update_running_builds_status().await {
            Ok(0) => debug!("No image builds due"),
            Ok(count) => info!(builds = count, "Reconciled image builds"),
            Err(e) => warn!(error = %e, "Image build reconciliation failed"),
        }
    }

    /// Sweep every interval until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(interval_ms = self.interval.as_millis() as u64, "Starting reconciler");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.sweep().await,
            }
        }

        info!("Reconciler stopped");
    }

    /// Sweep every interval, forever.
    pub async fn run(&self) {
        self.run_until(std::future::pending()).await;
    }
}
