use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::checker::{Connector, within};
use super::stats::duration_ms;
use super::types::{ConnectionStats, ProbeKind, ProbePayload, ProbeResult};
use crate::error::ProbeError;
use crate::registry::{Endpoint, Region};

/// Single connect-and-identify probe
pub struct ConnectionProber {
    connector: Arc<dyn Connector>,
}

impl ConnectionProber {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    /// Open one connection, time it, and read the server identity
    pub async fn probe(&self, region: &Region, timeout: Duration) -> ProbeResult {
        match self.try_probe(&region.endpoint, timeout).await {
            Ok(stats) => {
                info!(
                    region = %region.id,
                    latency_ms = %stats.latency_ms,
                    backend_id = stats.backend_id,
                    "Connection probe succeeded"
                );
                ProbeResult::succeeded(&region.id, ProbePayload::Connection(stats))
            }
            Err(e) => {
                warn!(region = %region.id, error_kind = %e.kind, "Connection probe failed: {}", e.message);
                ProbeResult::failed(&region.id, ProbeKind::Connection, e)
            }
        }
    }

    async fn try_probe(&self, endpoint: &Endpoint, timeout: Duration) -> Result<ConnectionStats, ProbeError> {
        let started = Instant::now();
        let mut session = self.connector.connect(endpoint, timeout).await?;
        let latency_ms = duration_ms(started.elapsed());

        let identity = within(timeout, "identity query", session.identity()).await;
        session.close().await;
        let identity = identity?;

        Ok(ConnectionStats {
            latency_ms,
            server_identity: identity.server_identity,
            backend_id: identity.backend_id,
            server_version: identity.server_version,
        })
    }
}
