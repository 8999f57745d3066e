use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::sync::Barrier;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::checker::{Connector, within};
use super::stats::{duration_ms, summarize, throughput};
use super::types::{LoadStats, ProbeKind, ProbePayload, ProbeResult};
use crate::error::ProbeError;
use crate::registry::{Endpoint, Region};

/// Burst of simultaneous connect + query units against one endpoint
pub struct LoadTester {
    connector: Arc<dyn Connector>,
}

impl LoadTester {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    /// Spawn `concurrency` units released together by a barrier.
    ///
    /// Failed or panicked units are counted; the run only fails when no unit
    /// succeeds. Dropping the returned future aborts every unit still running.
    pub async fn run(&self, region: &Region, concurrency: u32, timeout: Duration) -> ProbeResult {
        if concurrency == 0 {
            return ProbeResult::failed(
                &region.id,
                ProbeKind::Load,
                ProbeError::unknown("concurrency must be at least 1"),
            );
        }

        let barrier = Arc::new(Barrier::new(concurrency as usize + 1));
        let mut units = JoinSet::new();
        for _ in 0..concurrency {
            let connector = self.connector.clone();
            let endpoint = region.endpoint.clone();
            let barrier = barrier.clone();
            units.spawn(async move {
                barrier.wait().await;
                unit(connector.as_ref(), &endpoint, timeout).await
            });
        }

        barrier.wait().await;
        let started = Instant::now();
        let mut samples: Vec<Decimal> = Vec::with_capacity(concurrency as usize);
        let mut first_error: Option<ProbeError> = None;
        while let Some(outcome) = units.join_next().await {
            let outcome = outcome.unwrap_or_else(|e| Err(ProbeError::unknown(format!("load unit panicked: {e}"))));
            match outcome {
                Ok(sample) => samples.push(sample),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        let wall = started.elapsed();

        let failed_units = concurrency - samples.len() as u32;
        let Some(summary) = summarize(&samples) else {
            let cause = first_error.unwrap_or_else(|| ProbeError::unknown("no load unit completed"));
            warn!(region = %region.id, concurrency, "All load units failed: {}", cause);
            let failure = ProbeError::new(
                cause.kind,
                format!("all {concurrency} load units failed: {}", cause.message),
            );
            return ProbeResult::failed(&region.id, ProbeKind::Load, failure);
        };

        let stats = LoadStats {
            concurrency,
            failed_units,
            min_ms: summary.min,
            max_ms: summary.max,
            avg_ms: summary.avg,
            wall_time_ms: duration_ms(wall),
            throughput_per_sec: throughput(samples.len() as u32, wall),
        };

        if stats.is_degraded() {
            warn!(
                region = %region.id,
                concurrency,
                failed_units,
                "Load test completed with failed units"
            );
        } else {
            info!(
                region = %region.id,
                concurrency,
                throughput = %stats.throughput_per_sec,
                "Load test completed"
            );
        }
        ProbeResult::succeeded(&region.id, ProbePayload::Load(stats))
    }
}

async fn unit(connector: &dyn Connector, endpoint: &Endpoint, timeout: Duration) -> Result<Decimal, ProbeError> {
    let started = Instant::now();
    within(timeout, "load unit", async {
        let mut session = connector.connect(endpoint, timeout).await?;
        session.round_trip().await
    })
    .await?;
    Ok(duration_ms(started.elapsed()))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::error::ErrorKind;
    use crate::monitoring::testing::{FakeBehavior, FakeConnector, fake_region};

    #[tokio::test]
    async fn test_all_units_succeed() {
        let connector = Arc::new(FakeConnector::new());
        let tester = LoadTester::new(connector.clone());

        let result = tester.run(&fake_region("eu-west"), 10, Duration::from_secs(1)).await;

        let Some(ProbePayload::Load(stats)) = result.payload() else {
            panic!("expected load payload");
        };
        assert_eq!(stats.concurrency, 10);
        assert_eq!(stats.failed_units, 0);
        assert!(stats.min_ms <= stats.avg_ms && stats.avg_ms <= stats.max_ms);
        assert!(stats.throughput_per_sec > Decimal::ZERO);
        assert_eq!(connector.connects(), 10);
        assert_eq!(connector.open_sessions(), 0);
    }

    #[tokio::test]
    async fn test_partial_failure_is_degraded_success() {
        let behavior = FakeBehavior::healthy().failing_attempts([0, 1, 2]);
        let connector = Arc::new(FakeConnector::new().with("us-east", behavior));
        let tester = LoadTester::new(connector);

        let result = tester.run(&fake_region("us-east"), 8, Duration::from_secs(1)).await;

        let Some(ProbePayload::Load(stats)) = result.payload() else {
            panic!("expected load payload");
        };
        assert_eq!(stats.failed_units, 3);
        assert_eq!(stats.successful_units(), 5);
        assert!(stats.is_degraded());
        assert!(stats.throughput_per_sec > Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_throughput_uses_successful_units_over_wall_time() {
        let behavior = FakeBehavior::healthy().failing_attempts([0, 1]).query_delay(Duration::from_millis(50));
        let connector = Arc::new(FakeConnector::new().with("eu-west", behavior));
        let tester = LoadTester::new(connector);

        let result = tester.run(&fake_region("eu-west"), 6, Duration::from_secs(1)).await;

        let Some(ProbePayload::Load(stats)) = result.payload() else {
            panic!("expected load payload");
        };
        assert_eq!(stats.failed_units, 2);
        assert_eq!(stats.successful_units(), 4);
        assert!(stats.wall_time_ms >= dec!(50));
        let expected = Decimal::from(stats.successful_units()) * dec!(1000) / stats.wall_time_ms;
        let drift = (stats.throughput_per_sec - expected).abs();
        assert!(drift <= dec!(0.05), "throughput {} vs expected {expected}", stats.throughput_per_sec);
    }

    #[tokio::test]
    async fn test_panicking_unit_is_counted() {
        let behavior = FakeBehavior::healthy().panic_on_attempt(0);
        let connector = Arc::new(FakeConnector::new().with("eu-west", behavior));
        let tester = LoadTester::new(connector);

        let result = tester.run(&fake_region("eu-west"), 4, Duration::from_secs(1)).await;

        let Some(ProbePayload::Load(stats)) = result.payload() else {
            panic!("expected load payload");
        };
        assert_eq!(stats.failed_units, 1);
    }

    #[tokio::test]
    async fn test_every_unit_failing_fails_the_run() {
        let connector =
            Arc::new(FakeConnector::new().with("asia-pacific", FakeBehavior::refusing(ErrorKind::NetworkUnreachable)));
        let tester = LoadTester::new(connector);

        let result = tester.run(&fake_region("asia-pacific"), 5, Duration::from_secs(1)).await;

        assert!(!result.success());
        assert_eq!(result.error_kind(), Some(ErrorKind::NetworkUnreachable));
        assert!(result.error_message().unwrap().starts_with("all 5 load units failed"));
    }

    #[tokio::test]
    async fn test_hanging_units_time_out() {
        let behavior = FakeBehavior::healthy().hang_queries();
        let connector = Arc::new(FakeConnector::new().with("asia-pacific", behavior));
        let tester = LoadTester::new(connector.clone());

        let started = Instant::now();
        let result = tester.run(&fake_region("asia-pacific"), 3, Duration::from_millis(50)).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(connector.open_sessions(), 0);
    }
}
