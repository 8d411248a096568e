//! Background expiry sweep.
//!
//! The sweep is the only thing that frees disk space. It ticks on a fixed interval
//! (first tick immediately at startup) until its cancellation token fires.

use std::{sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    index::ArtifactIndex,
    lifecycle::{Clock, LifecycleManager, SweepReport},
    store::ArtifactStore,
};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);
const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub expired: SweepReport,
    pub orphans: Option<SweepReport>,
}

impl PassReport {
    pub fn failure_count(&self) -> usize {
        self.expired.failures.len()
            + self
                .orphans
                .as_ref()
                .map_or(0, |orphans| orphans.failures.len())
    }
}

pub struct Sweeper<I, S, C> {
    lifecycle: Arc<LifecycleManager<I, S, C>>,
    interval: Duration,
    reconcile_orphans: bool,
}

impl<I, S, C> Sweeper<I, S, C>
where
    I: ArtifactIndex + 'static,
    S: ArtifactStore + 'static,
    C: Clock + 'static,
{
    /// Intervals shorter than one second are raised to one second.
    pub fn new(lifecycle: Arc<LifecycleManager<I, S, C>>, interval: Duration) -> Self {
        Self {
            lifecycle,
            interval: interval.max(MIN_SWEEP_INTERVAL),
            reconcile_orphans: true,
        }
    }

    pub fn reconcile_orphans(mut self, enabled: bool) -> Self {
        self.reconcile_orphans = enabled;
        self
    }

    /// One full pass: expired records, then untracked files.
    pub async fn run_once(&self) -> PassReport {
        let expired = self.lifecycle.sweep_expired().await;
        let orphans = if self.reconcile_orphans {
            Some(self.lifecycle.reconcile_orphans().await)
        } else {
            None
        };

        let report = PassReport { expired, orphans };
        let orphans_removed = report
            .orphans
            .as_ref()
            .map_or(0, |orphans| orphans.removed.len());
        if report.failure_count() > 0 {
            warn!(
                "Sweep finished with {} failure(s): {} record(s) scanned, {} expired removed, {} orphan(s) removed",
                report.failure_count(),
                report.expired.scanned,
                report.expired.removed.len(),
                orphans_removed
            );
        } else {
            info!(
                "Sweep finished: {} record(s) scanned, {} expired removed, {} orphan(s) removed",
                report.expired.scanned,
                report.expired.removed.len(),
                orphans_removed
            );
        }
        report
    }

    pub async fn run(self, shutdown: CancellationToken) {
        info!("Sweeper started, interval: {:?}", self.interval);
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_once().await;
                }
            }
        }

        info!("Sweeper stopped");
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
