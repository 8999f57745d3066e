//! PostgreSQL implementation of the probe seam, on tokio-postgres.
//!
//! TLS uses rustls with the webpki root set, extended with the region's CA
//! bundle when one is configured (managed services usually ship their own).

use std::error::Error as StdError;
use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio_postgres::config::SslMode;
use tokio_postgres::error::SqlState;
use tokio_postgres::{Client, Config, NoTls, Row};
use tokio_postgres_rustls::MakeRustlsConnect;
use tracing::debug;

use super::checker::{ConnectionCounts, Connector, DatabaseSize, ServerIdentity, Session, within};
use super::stats::{fixed, from_f64};
use super::types::QueryStat;
use crate::error::{ErrorKind, ProbeError};
use crate::registry::{Endpoint, TlsMode};

/// How long `close` waits for the server to acknowledge termination
const CLOSE_GRACE: Duration = Duration::from_secs(1);

const IDENTITY_SQL: &str = "SELECT pg_backend_pid(), \
     current_setting('server_version'), \
     COALESCE(host(inet_server_addr()), 'local') || ':' || \
     COALESCE(inet_server_port()::text, '-') || '/' || current_database()";

const CACHE_HIT_SQL: &str = "SELECT (sum(blks_hit) * 100.0 / \
     NULLIF(sum(blks_hit) + sum(blks_read), 0))::float8 FROM pg_stat_database";

const CONNECTIONS_SQL: &str = "SELECT \
     count(*) FILTER (WHERE state = 'active'), \
     count(*) FILTER (WHERE state = 'idle'), \
     count(*) \
     FROM pg_stat_activity WHERE datname = current_database()";

const DATABASE_SIZE_SQL: &str = "SELECT pg_database_size(current_database()), \
     pg_size_pretty(pg_database_size(current_database()))";

const TOP_QUERIES_SQL: &str = "SELECT query, calls, total_exec_time::float8, mean_exec_time::float8 \
     FROM pg_stat_statements ORDER BY total_exec_time DESC LIMIT $1";

/// Dials real PostgreSQL servers
pub struct PostgresConnector {
    application_name: String,
}

impl PostgresConnector {
    pub fn new(application_name: impl Into<String>) -> Self {
        Self { application_name: application_name.into() }
    }
}

impl Default for PostgresConnector {
    fn default() -> Self {
        Self::new("regionpulse")
    }
}

#[async_trait]
impl Connector for PostgresConnector {
    async fn connect(&self, endpoint: &Endpoint, timeout: Duration) -> Result<Box<dyn Session>, ProbeError> {
        let mut config = Config::new();
        config
            .host(&endpoint.host)
            .port(endpoint.port)
            .dbname(&endpoint.database)
            .user(&endpoint.user)
            .application_name(&self.application_name)
            .connect_timeout(timeout);
        if let Some(password) = endpoint.password() {
            config.password(password);
        }

        let connect = async {
            match endpoint.tls {
                TlsMode::Disable => {
                    config.ssl_mode(SslMode::Disable);
                    let (client, connection) = config.connect(NoTls).await.map_err(|e| classify(&e))?;
                    Ok::<_, ProbeError>(PgSession::spawn(client, connection))
                }
                TlsMode::Require => {
                    config.ssl_mode(SslMode::Require);
                    let tls = MakeRustlsConnect::new(tls_config(endpoint).await?);
                    let (client, connection) = config.connect(tls).await.map_err(|e| classify(&e))?;
                    Ok::<_, ProbeError>(PgSession::spawn(client, connection))
                }
            }
        };

        let session = within(timeout, "connect", connect).await?;
        Ok(Box::new(session))
    }
}

async fn tls_config(endpoint: &Endpoint) -> Result<rustls::ClientConfig, ProbeError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(path) = &endpoint.ca_cert_path {
        let pem = tokio::fs::read(path).await.map_err(|e| {
            ProbeError::unknown(format!("cannot read CA bundle {}: {e}", path.display()))
        })?;
        for cert in rustls_pemfile::certs(&mut pem.as_slice()) {
            let cert = cert.map_err(|e| ProbeError::unknown(format!("invalid CA bundle: {e}")))?;
            roots
                .add(cert)
                .map_err(|e| ProbeError::unknown(format!("invalid CA certificate: {e}")))?;
        }
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ProbeError::unknown(format!("tls setup failed: {e}")))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(config)
}

/// An open tokio-postgres client plus the task driving its socket
struct PgSession {
    client: Option<Client>,
    driver: Option<JoinHandle<()>>,
}

impl PgSession {
    fn spawn<F>(client: Client, connection: F) -> Self
    where
        F: Future<Output = Result<(), tokio_postgres::Error>> + Send + 'static,
    {
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Connection driver stopped: {}", e);
            }
        });
        Self { client: Some(client), driver: Some(driver) }
    }

    fn client(&self) -> Result<&Client, ProbeError> {
        self.client.as_ref().ok_or_else(|| ProbeError::unknown("session already closed"))
    }

    async fn query_one(&self, sql: &str, params: &[&(dyn tokio_postgres::types::ToSql + Sync)]) -> Result<Row, ProbeError> {
        self.client()?.query_one(sql, params).await.map_err(|e| classify(&e))
    }
}

impl Drop for PgSession {
    fn drop(&mut self) {
        // Dropping the client asks the driver to terminate; the driver gets a
        // short grace period and is aborted after that.
        drop(self.client.take());
        if let Some(driver) = self.driver.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(reap(driver));
                }
                Err(_) => driver.abort(),
            }
        }
    }
}

async fn reap(mut driver: JoinHandle<()>) {
    if tokio::time::timeout(CLOSE_GRACE, &mut driver).await.is_err() {
        driver.abort();
    }
}

fn column<'a, T>(row: &'a Row, idx: usize) -> Result<T, ProbeError>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get(idx).map_err(|e| classify(&e))
}

#[async_trait]
impl Session for PgSession {
    async fn identity(&mut self) -> Result<ServerIdentity, ProbeError> {
        let row = self.query_one(IDENTITY_SQL, &[]).await?;
        Ok(ServerIdentity {
            backend_id: column(&row, 0)?,
            server_version: column(&row, 1)?,
            server_identity: column(&row, 2)?,
        })
    }

    async fn round_trip(&mut self) -> Result<(), ProbeError> {
        self.client()?.simple_query("SELECT 1").await.map_err(|e| classify(&e))?;
        Ok(())
    }

    async fn cache_hit_ratio(&mut self) -> Result<Option<f64>, ProbeError> {
        let row = self.query_one(CACHE_HIT_SQL, &[]).await?;
        column(&row, 0)
    }

    async fn connection_counts(&mut self) -> Result<ConnectionCounts, ProbeError> {
        let row = self.query_one(CONNECTIONS_SQL, &[]).await?;
        Ok(ConnectionCounts { active: column(&row, 0)?, idle: column(&row, 1)?, total: column(&row, 2)? })
    }

    async fn database_size(&mut self) -> Result<DatabaseSize, ProbeError> {
        let row = self.query_one(DATABASE_SIZE_SQL, &[]).await?;
        Ok(DatabaseSize { bytes: column(&row, 0)?, pretty: column(&row, 1)? })
    }

    async fn top_queries(&mut self, limit: u32) -> Result<Vec<QueryStat>, ProbeError> {
        let limit = i64::from(limit);
        let rows = self
            .client()?
            .query(TOP_QUERIES_SQL, &[&limit])
            .await
            .map_err(|e| match e.code() {
                // pre-13 servers name the timing columns differently
                Some(code) if *code == SqlState::UNDEFINED_COLUMN => ProbeError::new(
                    ErrorKind::ExtensionUnavailable,
                    "pg_stat_statements version is not supported",
                ),
                _ => classify(&e),
            })?;

        rows.iter()
            .map(|row| {
                let total: f64 = column(row, 2)?;
                let mean: f64 = column(row, 3)?;
                Ok(QueryStat {
                    query: column(row, 0)?,
                    calls: column(row, 1)?,
                    total_time_ms: from_f64(total).unwrap_or_else(|| fixed(Decimal::ZERO)),
                    mean_time_ms: from_f64(mean).unwrap_or_else(|| fixed(Decimal::ZERO)),
                })
            })
            .collect()
    }

    async fn close(mut self: Box<Self>) {
        drop(self.client.take());
        if let Some(driver) = self.driver.take() {
            reap(driver).await;
        }
    }
}

/// Map a driver error onto the probe error taxonomy
fn classify(err: &tokio_postgres::Error) -> ProbeError {
    if let Some(db) = err.as_db_error() {
        return ProbeError::new(classify_sql_state(db.code()), db.message());
    }

    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(io_err) = cause.downcast_ref::<io::Error>() {
            return ProbeError::new(classify_io(io_err), err.to_string());
        }
        source = cause.source();
    }

    if err.is_closed() {
        return ProbeError::new(ErrorKind::NetworkUnreachable, err.to_string());
    }
    ProbeError::unknown(err.to_string())
}

fn classify_sql_state(code: &SqlState) -> ErrorKind {
    if *code == SqlState::INVALID_PASSWORD || *code == SqlState::INVALID_AUTHORIZATION_SPECIFICATION {
        ErrorKind::AuthFailure
    } else if *code == SqlState::INSUFFICIENT_PRIVILEGE {
        ErrorKind::PermissionDenied
    } else if *code == SqlState::UNDEFINED_TABLE
        || *code == SqlState::UNDEFINED_FUNCTION
        || *code == SqlState::UNDEFINED_OBJECT
        || *code == SqlState::OBJECT_NOT_IN_PREREQUISITE_STATE
    {
        ErrorKind::ExtensionUnavailable
    } else {
        ErrorKind::Unknown
    }
}

fn classify_io(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ErrorKind::Timeout,
        _ => ErrorKind::NetworkUnreachable,
    }
}
