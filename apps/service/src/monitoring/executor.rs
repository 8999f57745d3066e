use std::sync::Arc;
use std::time::Duration;

use super::checker::Connector;
use super::connection::ConnectionProber;
use super::health::HealthInspector;
use super::latency::LatencyMeasurer;
use super::load::LoadTester;
use super::types::{ProbeParameters, ProbeResult};
use crate::registry::Region;

/// Probe executor - runs one probe of any kind against one region
pub struct ProbeExecutor {
    connection: ConnectionProber,
    latency: LatencyMeasurer,
    load: LoadTester,
    health: HealthInspector,
    connect_timeout: Duration,
}

impl ProbeExecutor {
    /// Create a new probe executor sharing one connector between probers
    pub fn new(connector: Arc<dyn Connector>, connect_timeout: Duration) -> Self {
        Self {
            connection: ConnectionProber::new(connector.clone()),
            latency: LatencyMeasurer::new(connector.clone()),
            load: LoadTester::new(connector.clone()),
            health: HealthInspector::new(connector),
            connect_timeout,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Execute a probe; parameters are expected to be validated already
    pub async fn execute(&self, region: &Region, parameters: ProbeParameters) -> ProbeResult {
        let timeout = self.connect_timeout;
        match parameters {
            ProbeParameters::Connection => self.connection.probe(region, timeout).await,
            ProbeParameters::Latency { iterations } => self.latency.measure(region, iterations, timeout).await,
            ProbeParameters::Load { concurrency } => self.load.run(region, concurrency, timeout).await,
            ProbeParameters::Health => self.health.inspect(region, timeout).await,
        }
    }
}
