use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use crate::error::ProbeError;
use crate::monitoring::types::QueryStat;
use crate::registry::Endpoint;

/// Identity reported by the server for one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerIdentity {
    /// Backend process id serving the session
    pub backend_id: i32,
    pub server_version: String,
    /// Address and database the session ended up on
    pub server_identity: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionCounts {
    pub active: i64,
    pub idle: i64,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSize {
    pub bytes: i64,
    pub pretty: String,
}

/// Opens sessions against database endpoints
///
/// Implementations must not share sessions between calls; every returned
/// session is owned by exactly one probe.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint, timeout: Duration) -> Result<Box<dyn Session>, ProbeError>;
}

/// One open connection
///
/// Dropping a session releases the connection. `close` additionally waits
/// for a graceful shutdown and should be preferred on normal exit paths.
#[async_trait]
pub trait Session: Send {
    async fn identity(&mut self) -> Result<ServerIdentity, ProbeError>;

    /// Cheapest possible round-trip (`SELECT 1`)
    async fn round_trip(&mut self) -> Result<(), ProbeError>;

    /// Buffer cache hit percentage; `None` when the server has no block stats yet
    async fn cache_hit_ratio(&mut self) -> Result<Option<f64>, ProbeError>;

    async fn connection_counts(&mut self) -> Result<ConnectionCounts, ProbeError>;

    async fn database_size(&mut self) -> Result<DatabaseSize, ProbeError>;

    /// Most expensive statements from the statement statistics extension
    async fn top_queries(&mut self, limit: u32) -> Result<Vec<QueryStat>, ProbeError>;

    async fn close(self: Box<Self>);
}

/// Run `fut`, turning expiry of `limit` into a classified timeout error
pub async fn within<T, F>(limit: Duration, what: &str, fut: F) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, ProbeError>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::timeout(format!("{what} timed out after {}ms", limit.as_millis()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[tokio::test]
    async fn test_within_passes_through() {
        let value = within(Duration::from_secs(1), "noop", async { Ok::<_, ProbeError>(7) }).await;
        assert_eq!(value, Ok(7));
    }

    #[tokio::test]
    async fn test_within_classifies_expiry() {
        let result: Result<(), ProbeError> = within(Duration::from_millis(20), "connect", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert_eq!(err.message, "connect timed out after 20ms");
    }
}
