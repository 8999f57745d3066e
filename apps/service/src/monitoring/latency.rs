use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use super::checker::{Connector, within};
use super::stats::{duration_ms, summarize};
use super::types::{LatencyStats, ProbeFailure, ProbeKind, ProbePayload, ProbeResult};
use crate::error::ProbeError;
use crate::registry::{Endpoint, Region};

/// Repeated sequential connect + `SELECT 1` cycles
pub struct LatencyMeasurer {
    connector: Arc<dyn Connector>,
}

impl LatencyMeasurer {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    /// Sample `iterations` cycles, each bounded by `timeout`.
    ///
    /// The first failing cycle ends the run; samples taken before it are kept
    /// on the failure.
    pub async fn measure(&self, region: &Region, iterations: u32, timeout: Duration) -> ProbeResult {
        let mut samples: Vec<Decimal> = Vec::with_capacity(iterations as usize);

        for iteration in 1..=iterations {
            match within(timeout, "latency iteration", self.cycle(&region.endpoint, timeout)).await {
                Ok(sample) => {
                    debug!(region = %region.id, iteration, sample_ms = %sample, "Latency sample");
                    samples.push(sample);
                }
                Err(e) => {
                    warn!(
                        region = %region.id,
                        iteration,
                        error_kind = %e.kind,
                        "Latency measurement stopped: {}",
                        e.message
                    );
                    let failure = ProbeFailure::from(e).with_samples(samples);
                    return ProbeResult::failed(&region.id, ProbeKind::Latency, failure);
                }
            }
        }

        let Some(summary) = summarize(&samples) else {
            return ProbeResult::failed(
                &region.id,
                ProbeKind::Latency,
                ProbeError::unknown("no iterations were requested"),
            );
        };

        info!(
            region = %region.id,
            iterations,
            avg_ms = %summary.avg,
            "Latency measurement completed"
        );
        ProbeResult::succeeded(
            &region.id,
            ProbePayload::Latency(LatencyStats {
                iteration_count: iterations,
                min_ms: summary.min,
                max_ms: summary.max,
                avg_ms: summary.avg,
                samples,
            }),
        )
    }

    async fn cycle(&self, endpoint: &Endpoint, timeout: Duration) -> Result<Decimal, ProbeError> {
        let started = Instant::now();
        let mut session = self.connector.connect(endpoint, timeout).await?;
        session.round_trip().await?;
        let sample = duration_ms(started.elapsed());
        drop(session);
        Ok(sample)
    }
}
