//! Operational health battery.
//!
//! Only the initial connection can fail a health probe. Every metric after
//! that is best effort: a privilege or missing-object error costs that metric
//! alone, and a lost connection costs the metrics not yet read.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::checker::{Connector, Session, within};
use super::stats::from_f64;
use super::types::{HealthStats, ProbeKind, ProbePayload, ProbeResult};
use crate::error::{ErrorKind, ProbeError};
use crate::registry::Region;

/// Statements reported from the statistics extension
pub const TOP_QUERY_LIMIT: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    CacheHitRatio,
    Connections,
    DatabaseSize,
    TopQueries,
}

impl Step {
    const BATTERY: [Step; 4] = [Step::CacheHitRatio, Step::Connections, Step::DatabaseSize, Step::TopQueries];

    fn label(self) -> &'static str {
        match self {
            Step::CacheHitRatio => "cache hit ratio",
            Step::Connections => "connection counts",
            Step::DatabaseSize => "database size",
            Step::TopQueries => "top queries",
        }
    }

    /// Payload fields left unset when this step cannot run
    fn fields(self) -> &'static [&'static str] {
        match self {
            Step::CacheHitRatio => &["cache_hit_ratio"],
            Step::Connections => &["active_conn", "idle_conn", "total_conn"],
            Step::DatabaseSize => &["db_size", "db_size_bytes"],
            Step::TopQueries => &["top_queries"],
        }
    }
}

pub struct HealthInspector {
    connector: Arc<dyn Connector>,
}

impl HealthInspector {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    pub async fn inspect(&self, region: &Region, timeout: Duration) -> ProbeResult {
        let mut session = match self.connector.connect(&region.endpoint, timeout).await {
            Ok(session) => session,
            Err(e) => {
                warn!(region = %region.id, error_kind = %e.kind, "Health probe could not connect: {}", e.message);
                return ProbeResult::failed(&region.id, ProbeKind::Health, e);
            }
        };

        let stats = battery(session.as_mut(), &region.id, timeout).await;
        session.close().await;

        if stats.is_degraded() {
            warn!(
                region = %region.id,
                degraded = ?stats.degraded_fields,
                "Health probe completed with degraded fields"
            );
        } else {
            info!(
                region = %region.id,
                extended_stats = stats.extended_stats_available,
                "Health probe completed"
            );
        }
        ProbeResult::succeeded(&region.id, ProbePayload::Health(stats))
    }
}

async fn battery(session: &mut dyn Session, region_id: &str, timeout: Duration) -> HealthStats {
    let mut stats = HealthStats::default();
    let mut lost: Option<ProbeError> = None;

    for step in Step::BATTERY {
        if lost.is_some() {
            degrade(&mut stats, step);
            continue;
        }

        let Err(e) = run_step(session, step, timeout, &mut stats).await else {
            continue;
        };

        match (step, e.kind) {
            (Step::TopQueries, ErrorKind::ExtensionUnavailable) => {
                debug!(region = %region_id, "Statement statistics unavailable: {}", e.message);
            }
            (_, kind) if kind.is_connectivity() => {
                warn!(region = %region_id, step = step.label(), "Lost connection during health battery: {}", e);
                degrade(&mut stats, step);
                lost = Some(e);
            }
            _ => {
                warn!(region = %region_id, step = step.label(), "Health metric unavailable: {}", e);
                degrade(&mut stats, step);
            }
        }
    }

    stats
}

async fn run_step(
    session: &mut dyn Session,
    step: Step,
    timeout: Duration,
    stats: &mut HealthStats,
) -> Result<(), ProbeError> {
    match step {
        Step::CacheHitRatio => {
            let ratio = within(timeout, step.label(), session.cache_hit_ratio()).await?;
            stats.cache_hit_ratio = ratio.and_then(from_f64);
        }
        Step::Connections => {
            let counts = within(timeout, step.label(), session.connection_counts()).await?;
            stats.active_conn = Some(counts.active);
            stats.idle_conn = Some(counts.idle);
            stats.total_conn = Some(counts.total);
        }
        Step::DatabaseSize => {
            let size = within(timeout, step.label(), session.database_size()).await?;
            stats.db_size = Some(size.pretty);
            stats.db_size_bytes = Some(size.bytes);
        }
        Step::TopQueries => {
            stats.top_queries = within(timeout, step.label(), session.top_queries(TOP_QUERY_LIMIT)).await?;
            stats.extended_stats_available = true;
        }
    }
    Ok(())
}

fn degrade(stats: &mut HealthStats, step: Step) {
    stats.degraded_fields.extend(step.fields().iter().map(|f| f.to_string()));
}
