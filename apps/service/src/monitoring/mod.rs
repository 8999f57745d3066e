/// Probe engine module - measures remote database endpoints
///
/// This module is responsible for:
/// - The connector seam and its PostgreSQL implementation
/// - Connection, latency, load and health probers
/// - Validating probe parameters
/// - Scheduling periodic sweeps
pub mod checker;
pub mod connection;
pub mod executor;
pub mod health;
pub mod latency;
pub mod load;
pub mod postgres;
pub mod scheduler;
pub mod stats;
pub mod types;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use checker::{Connector, Session};
pub use executor::ProbeExecutor;
pub use postgres::PostgresConnector;
pub use scheduler::{MonitoringScheduler, SweepBatch, SweepConfig};
pub use types::{
    ConnectionStats, HealthStats, LatencyStats, LoadStats, Outcome, ProbeFailure, ProbeKind, ProbeParameters,
    ProbePayload, ProbeRequest, ProbeResult, QueryStat,
};
