//! Scripted in-process connector used by unit tests.
//!
//! Behaviour is looked up by endpoint host, so a region built with
//! [`fake_region`] is addressed by its id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal_macros::dec;

use super::checker::{ConnectionCounts, Connector, DatabaseSize, ServerIdentity, Session, within};
use super::types::QueryStat;
use crate::error::{ErrorKind, ProbeError};
use crate::registry::{Endpoint, Region, TlsMode};

pub const STEP_IDENTITY: &str = "identity";
pub const STEP_ROUND_TRIP: &str = "round_trip";
pub const STEP_CACHE_HIT: &str = "cache_hit_ratio";
pub const STEP_CONNECTIONS: &str = "connections";
pub const STEP_DATABASE_SIZE: &str = "database_size";
pub const STEP_TOP_QUERIES: &str = "top_queries";

#[derive(Debug, Clone, Default)]
pub struct FakeBehavior {
    pub connect_delay: Duration,
    pub connect_error: Option<ErrorKind>,
    /// Attempts (0-based, per host) that fail as unreachable
    pub failing_attempts: Vec<usize>,
    /// Attempt (0-based, per host) whose connect panics
    pub panic_on_attempt: Option<usize>,
    pub query_delay: Duration,
    pub hang_queries: bool,
    pub query_errors: HashMap<&'static str, ErrorKind>,
}

impl FakeBehavior {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn refusing(kind: ErrorKind) -> Self {
        Self { connect_error: Some(kind), ..Self::default() }
    }

    pub fn hanging() -> Self {
        Self { connect_delay: Duration::from_secs(3600), ..Self::default() }
    }

    pub fn slow_connect(delay: Duration) -> Self {
        Self { connect_delay: delay, ..Self::default() }
    }

    pub fn failing_attempts(mut self, attempts: impl IntoIterator<Item = usize>) -> Self {
        self.failing_attempts.extend(attempts);
        self
    }

    pub fn panic_on_attempt(mut self, attempt: usize) -> Self {
        self.panic_on_attempt = Some(attempt);
        self
    }

    pub fn hang_queries(mut self) -> Self {
        self.hang_queries = true;
        self
    }

    pub fn query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = delay;
        self
    }

    pub fn failing_query(mut self, step: &'static str, kind: ErrorKind) -> Self {
        self.query_errors.insert(step, kind);
        self
    }
}

#[derive(Debug, Default)]
struct Counters {
    connects: AtomicUsize,
    open: AtomicUsize,
}

#[derive(Default)]
pub struct FakeConnector {
    behaviors: Mutex<HashMap<String, FakeBehavior>>,
    attempts: Mutex<HashMap<String, usize>>,
    counters: Arc<Counters>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, host: &str, behavior: FakeBehavior) -> Self {
        self.set(host, behavior);
        self
    }

    pub fn set(&self, host: &str, behavior: FakeBehavior) {
        self.behaviors.lock().unwrap().insert(host.to_string(), behavior);
    }

    /// Connection attempts across all hosts
    pub fn connects(&self) -> usize {
        self.counters.connects.load(Ordering::SeqCst)
    }

    /// Sessions handed out and not yet dropped
    pub fn open_sessions(&self) -> usize {
        self.counters.open.load(Ordering::SeqCst)
    }

    fn next_attempt(&self, host: &str) -> usize {
        let mut attempts = self.attempts.lock().unwrap();
        let slot = attempts.entry(host.to_string()).or_insert(0);
        let attempt = *slot;
        *slot += 1;
        attempt
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, endpoint: &Endpoint, timeout: Duration) -> Result<Box<dyn Session>, ProbeError> {
        let behavior = self.behaviors.lock().unwrap().get(&endpoint.host).cloned().unwrap_or_default();
        let attempt = self.next_attempt(&endpoint.host);
        self.counters.connects.fetch_add(1, Ordering::SeqCst);

        if behavior.panic_on_attempt == Some(attempt) {
            panic!("scripted panic on attempt {attempt}");
        }

        let counters = self.counters.clone();
        let host = endpoint.host.clone();
        let identity = format!("{}:{}/{}", endpoint.host, endpoint.port, endpoint.database);
        within(timeout, "connect", async move {
            if !behavior.connect_delay.is_zero() {
                tokio::time::sleep(behavior.connect_delay).await;
            }
            if let Some(kind) = behavior.connect_error {
                return Err(ProbeError::new(kind, format!("{host}: scripted {kind}")));
            }
            if behavior.failing_attempts.contains(&attempt) {
                return Err(ProbeError::new(
                    ErrorKind::NetworkUnreachable,
                    format!("{host}: connection refused"),
                ));
            }

            counters.open.fetch_add(1, Ordering::SeqCst);
            let session: Box<dyn Session> = Box::new(FakeSession {
                behavior,
                counters,
                backend_id: 1000 + attempt as i32,
                identity,
            });
            Ok(session)
        })
        .await
    }
}

struct FakeSession {
    behavior: FakeBehavior,
    counters: Arc<Counters>,
    backend_id: i32,
    identity: String,
}

impl FakeSession {
    async fn step(&self, name: &'static str) -> Result<(), ProbeError> {
        if self.behavior.hang_queries {
            std::future::pending::<()>().await;
        }
        if !self.behavior.query_delay.is_zero() {
            tokio::time::sleep(self.behavior.query_delay).await;
        }
        match self.behavior.query_errors.get(name) {
            Some(kind) => Err(ProbeError::new(*kind, format!("scripted {kind} on {name}"))),
            None => Ok(()),
        }
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.counters.open.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn identity(&mut self) -> Result<ServerIdentity, ProbeError> {
        self.step(STEP_IDENTITY).await?;
        Ok(ServerIdentity {
            backend_id: self.backend_id,
            server_version: "16.4".to_string(),
            server_identity: self.identity.clone(),
        })
    }

    async fn round_trip(&mut self) -> Result<(), ProbeError> {
        self.step(STEP_ROUND_TRIP).await
    }

    async fn cache_hit_ratio(&mut self) -> Result<Option<f64>, ProbeError> {
        self.step(STEP_CACHE_HIT).await?;
        Ok(Some(99.456))
    }

    async fn connection_counts(&mut self) -> Result<ConnectionCounts, ProbeError> {
        self.step(STEP_CONNECTIONS).await?;
        Ok(ConnectionCounts { active: 2, idle: 5, total: 8 })
    }

    async fn database_size(&mut self) -> Result<DatabaseSize, ProbeError> {
        self.step(STEP_DATABASE_SIZE).await?;
        Ok(DatabaseSize { bytes: 8_388_608, pretty: "8192 kB".to_string() })
    }

    async fn top_queries(&mut self, limit: u32) -> Result<Vec<QueryStat>, ProbeError> {
        self.step(STEP_TOP_QUERIES).await?;
        let all = vec![
            QueryStat {
                query: "SELECT * FROM orders WHERE id = $1".to_string(),
                calls: 1200,
                total_time_ms: dec!(840.50),
                mean_time_ms: dec!(0.70),
            },
            QueryStat {
                query: "UPDATE accounts SET balance = $1".to_string(),
                calls: 40,
                total_time_ms: dec!(120.00),
                mean_time_ms: dec!(3.00),
            },
        ];
        Ok(all.into_iter().take(limit as usize).collect())
    }

    async fn close(self: Box<Self>) {}
}

/// Region whose endpoint host is its id
pub fn fake_region(id: &str) -> Region {
    Region {
        id: id.to_string(),
        display_name: id.to_uppercase(),
        endpoint: Endpoint::new(id, 5432, "defaultdb", "prober").with_tls(TlsMode::Disable),
        enabled: true,
        latitude: None,
        longitude: None,
    }
}
