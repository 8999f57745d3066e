use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, warn};

use super::types::{ProbeKind, ProbeResult};
use crate::orchestrator::{CallContext, ProbeOrchestrator};

/// One periodic sweep across every enabled region
#[derive(Debug, Clone)]
pub struct SweepBatch {
    pub kind: ProbeKind,
    pub results: BTreeMap<String, ProbeResult>,
}

/// Sweep configuration for scheduling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepConfig {
    pub kind: ProbeKind,
    pub interval: Duration,
}

/// Monitoring scheduler - periodically probes all regions
pub struct MonitoringScheduler {
    orchestrator: ProbeOrchestrator,
    ctx: CallContext,
    result_tx: mpsc::Sender<SweepBatch>,
}

impl MonitoringScheduler {
    pub fn new(orchestrator: ProbeOrchestrator, ctx: CallContext, result_tx: mpsc::Sender<SweepBatch>) -> Self {
        Self { orchestrator, ctx, result_tx }
    }

    /// Schedule one kind for periodic sweeps
    ///
    /// The task ends when the receiving side of the channel is dropped.
    pub fn schedule_sweep(&self, config: SweepConfig) -> tokio::task::JoinHandle<()> {
        let orchestrator = self.orchestrator.clone();
        let ctx = self.ctx.clone();
        let result_tx = self.result_tx.clone();

        tokio::spawn(async move {
            let mut timer = interval(config.interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                timer.tick().await;

                let results = match orchestrator.dispatch_all(config.kind, &ctx).await {
                    Ok(results) => results,
                    Err(e) => {
                        warn!(kind = %config.kind, "Scheduled sweep rejected: {}", e);
                        continue;
                    }
                };
                debug!(kind = %config.kind, regions = results.len(), "Scheduled sweep finished");

                if let Err(e) = result_tx.send(SweepBatch { kind: config.kind, results }).await {
                    error!("Failed to send sweep batch: {}", e);
                    break;
                }
            }
        })
    }

    /// Schedule multiple kinds
    pub fn schedule_sweeps(&self, configs: Vec<SweepConfig>) -> Vec<tokio::task::JoinHandle<()>> {
        configs.into_iter().map(|config| self.schedule_sweep(config)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::ProbeSettings;
    use crate::database::open_store;
    use crate::flags::{Capability, StaticFlags};
    use crate::monitoring::testing::{FakeConnector, fake_region};
    use crate::registry::RegionRegistry;
    use tempfile::tempdir;

    async fn scheduler(flags: StaticFlags) -> (MonitoringScheduler, mpsc::Receiver<SweepBatch>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = open_store(&dir.path().join("sweeps.db"), 2).await.unwrap();
        let registry = RegionRegistry::from_regions([fake_region("eu-west"), fake_region("us-east")]);
        let orchestrator = ProbeOrchestrator::new(
            Arc::new(registry),
            Arc::new(FakeConnector::new()),
            Arc::new(store),
            &ProbeSettings::default(),
        );
        let (tx, rx) = mpsc::channel(4);
        (MonitoringScheduler::new(orchestrator, CallContext::new(Arc::new(flags)), tx), rx, dir)
    }

    #[tokio::test]
    async fn test_sweep_delivers_batches() {
        let (scheduler, mut rx, _dir) = scheduler(StaticFlags::all_enabled()).await;

        let handle = scheduler.schedule_sweep(SweepConfig {
            kind: ProbeKind::Connection,
            interval: Duration::from_millis(20),
        });

        for _ in 0..2 {
            let batch = tokio::time::timeout(Duration::from_secs(3), rx.recv())
                .await
                .expect("Timeout waiting for batch")
                .expect("Channel closed");
            assert_eq!(batch.kind, ProbeKind::Connection);
            assert_eq!(batch.results.keys().collect::<Vec<_>>(), vec!["eu-west", "us-east"]);
        }
        handle.abort();
    }

    #[tokio::test]
    async fn test_rejected_sweeps_send_nothing() {
        let flags = StaticFlags::all_enabled().disable(Capability::TestAllRegions);
        let (scheduler, mut rx, _dir) = scheduler(flags).await;

        let handle = scheduler.schedule_sweep(SweepConfig {
            kind: ProbeKind::Connection,
            interval: Duration::from_millis(10),
        });

        let received = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(received.is_err());
        handle.abort();
    }
}
