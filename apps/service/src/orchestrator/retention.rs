//! Automatic retention of probe results.
//!
//! Results older than the horizon (7 days by default) are deleted by a
//! background task that wakes up every sweep interval (1 hour by default).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::config::RetentionConfig;
use crate::database::CheckResultStore;

/// How long results are kept and how often expired ones are swept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub horizon_days: u64,
    pub sweep_interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { horizon_days: 7, sweep_interval: Duration::from_secs(3600) }
    }
}

impl From<&RetentionConfig> for RetentionPolicy {
    fn from(config: &RetentionConfig) -> Self {
        Self { horizon_days: config.horizon_days, sweep_interval: Duration::from_secs(config.sweep_interval_secs) }
    }
}

impl RetentionPolicy {
    pub fn horizon(&self) -> Duration {
        Duration::from_secs(self.horizon_days.saturating_mul(24 * 3600))
    }
}

/// Deletes results that aged past the retention horizon
pub struct RetentionSweeper {
    store: Arc<dyn CheckResultStore>,
    policy: RetentionPolicy,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn CheckResultStore>, policy: RetentionPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Run one sweep; returns the number of deleted results
    pub async fn sweep(&self) -> Result<u64> {
        debug!("Reclaiming results older than {} days", self.policy.horizon_days);
        let deleted = self.store.reclaim(self.policy.horizon()).await?;
        if deleted > 0 {
            info!("Retention sweep deleted {} expired results", deleted);
        }
        Ok(deleted)
    }

    /// Start background sweep task
    pub fn start_periodic_sweep(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.policy.sweep_interval);

            loop {
                interval.tick().await;

                match self.sweep().await {
                    Ok(count) => debug!("Periodic retention sweep completed: {} deleted", count),
                    Err(e) => warn!("Periodic retention sweep failed: {:#}", e),
                }
            }
        })
    }
}
