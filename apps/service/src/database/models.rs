use std::collections::BTreeSet;
use std::str::FromStr;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use libsql::{Row, Value};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::error::ErrorKind;
use crate::monitoring::stats::fixed;
use crate::monitoring::types::{
    ConnectionStats, HealthStats, LatencyStats, LoadStats, Outcome, ProbeFailure, ProbeKind, ProbePayload,
    ProbeResult, QueryStat,
};

/// Column list shared by every `probe_results` read, in [`ProbeRecord::from_row`] order
pub const RECORD_COLUMNS: &str = "uuid, region_id, kind, checked_at, success, error_kind, error_message, \
     actor_key, latency_ms, server_identity, backend_id, server_version, iteration_count, min_ms, max_ms, \
     avg_ms, samples, concurrency, failed_units, wall_time_ms, throughput_per_sec, cache_hit_ratio, \
     active_conn, idle_conn, total_conn, db_size, db_size_bytes, extended_stats_available, \
     degraded_fields, top_queries";

/// Flat row of `probe_results`; every kind-specific column is nullable
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeRecord {
    pub uuid: String,
    pub region_id: String,
    pub kind: String,
    /// Capture time in unix microseconds
    pub checked_at: i64,
    pub success: bool,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub actor_key: Option<String>,
    /// Headline latency of the probe (see [`ProbeResult::latency_ms`])
    pub latency_ms: Option<String>,
    pub server_identity: Option<String>,
    pub backend_id: Option<i64>,
    pub server_version: Option<String>,
    pub iteration_count: Option<i64>,
    pub min_ms: Option<String>,
    pub max_ms: Option<String>,
    pub avg_ms: Option<String>,
    /// JSON array; latency samples, or partial samples of a failed measurement
    pub samples: Option<String>,
    pub concurrency: Option<i64>,
    pub failed_units: Option<i64>,
    pub wall_time_ms: Option<String>,
    pub throughput_per_sec: Option<String>,
    pub cache_hit_ratio: Option<String>,
    pub active_conn: Option<i64>,
    pub idle_conn: Option<i64>,
    pub total_conn: Option<i64>,
    pub db_size: Option<String>,
    pub db_size_bytes: Option<i64>,
    pub extended_stats_available: Option<bool>,
    pub degraded_fields: Option<String>,
    pub top_queries: Option<String>,
}

fn decimal_text(value: Decimal) -> String {
    fixed(value).to_string()
}

fn parse_decimal(column: &str, raw: Option<&str>) -> Result<Decimal> {
    let raw = raw.ok_or_else(|| anyhow!("column {column} is NULL"))?;
    Decimal::from_str(raw).with_context(|| format!("column {column} holds an invalid decimal: {raw}"))
}

fn parse_optional_decimal(column: &str, raw: Option<&str>) -> Result<Option<Decimal>> {
    raw.map(|r| parse_decimal(column, Some(r))).transpose()
}

fn required<T>(column: &str, value: Option<T>) -> Result<T> {
    value.ok_or_else(|| anyhow!("column {column} is NULL"))
}

fn text(value: Option<String>) -> Value {
    value.map(Value::Text).unwrap_or(Value::Null)
}

fn integer(value: Option<i64>) -> Value {
    value.map(Value::Integer).unwrap_or(Value::Null)
}

impl ProbeRecord {
    pub fn from_result(result: &ProbeResult) -> Result<Self> {
        let mut record = ProbeRecord {
            uuid: result.id.to_string(),
            region_id: result.region_id.clone(),
            kind: result.kind.as_str().to_string(),
            checked_at: result.timestamp.timestamp_micros(),
            success: result.success(),
            actor_key: result.actor_key.clone(),
            latency_ms: result.latency_ms().map(decimal_text),
            ..Default::default()
        };

        match &result.outcome {
            Outcome::Failure(failure) => {
                record.error_kind = Some(failure.kind.as_str().to_string());
                record.error_message = Some(failure.message.clone());
                if !failure.partial_samples.is_empty() {
                    record.samples = Some(serde_json::to_string(&failure.partial_samples)?);
                }
            }
            Outcome::Success(ProbePayload::Connection(stats)) => {
                record.server_identity = Some(stats.server_identity.clone());
                record.backend_id = Some(i64::from(stats.backend_id));
                record.server_version = Some(stats.server_version.clone());
            }
            Outcome::Success(ProbePayload::Latency(stats)) => {
                record.iteration_count = Some(i64::from(stats.iteration_count));
                record.min_ms = Some(decimal_text(stats.min_ms));
                record.max_ms = Some(decimal_text(stats.max_ms));
                record.avg_ms = Some(decimal_text(stats.avg_ms));
                record.samples = Some(serde_json::to_string(&stats.samples)?);
            }
            Outcome::Success(ProbePayload::Load(stats)) => {
                record.concurrency = Some(i64::from(stats.concurrency));
                record.failed_units = Some(i64::from(stats.failed_units));
                record.min_ms = Some(decimal_text(stats.min_ms));
                record.max_ms = Some(decimal_text(stats.max_ms));
                record.avg_ms = Some(decimal_text(stats.avg_ms));
                record.wall_time_ms = Some(decimal_text(stats.wall_time_ms));
                record.throughput_per_sec = Some(decimal_text(stats.throughput_per_sec));
            }
            Outcome::Success(ProbePayload::Health(stats)) => {
                record.cache_hit_ratio = stats.cache_hit_ratio.map(decimal_text);
                record.active_conn = stats.active_conn;
                record.idle_conn = stats.idle_conn;
                record.total_conn = stats.total_conn;
                record.db_size = stats.db_size.clone();
                record.db_size_bytes = stats.db_size_bytes;
                record.extended_stats_available = Some(stats.extended_stats_available);
                record.degraded_fields = Some(serde_json::to_string(&stats.degraded_fields)?);
                if !stats.top_queries.is_empty() {
                    record.top_queries = Some(serde_json::to_string(&stats.top_queries)?);
                }
            }
        }

        Ok(record)
    }

    /// Positional values for the insert statement, in [`RECORD_COLUMNS`] order
    pub fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.uuid.clone()),
            Value::Text(self.region_id.clone()),
            Value::Text(self.kind.clone()),
            Value::Integer(self.checked_at),
            Value::Integer(i64::from(self.success)),
            text(self.error_kind.clone()),
            text(self.error_message.clone()),
            text(self.actor_key.clone()),
            text(self.latency_ms.clone()),
            text(self.server_identity.clone()),
            integer(self.backend_id),
            text(self.server_version.clone()),
            integer(self.iteration_count),
            text(self.min_ms.clone()),
            text(self.max_ms.clone()),
            text(self.avg_ms.clone()),
            text(self.samples.clone()),
            integer(self.concurrency),
            integer(self.failed_units),
            text(self.wall_time_ms.clone()),
            text(self.throughput_per_sec.clone()),
            text(self.cache_hit_ratio.clone()),
            integer(self.active_conn),
            integer(self.idle_conn),
            integer(self.total_conn),
            text(self.db_size.clone()),
            integer(self.db_size_bytes),
            integer(self.extended_stats_available.map(i64::from)),
            text(self.degraded_fields.clone()),
            text(self.top_queries.clone()),
        ]
    }

    pub fn from_row(row: &Row) -> Result<Self> {
        Ok(ProbeRecord {
            uuid: row.get(0)?,
            region_id: row.get(1)?,
            kind: row.get(2)?,
            checked_at: row.get(3)?,
            success: row.get::<i64>(4)? != 0,
            error_kind: row.get(5)?,
            error_message: row.get(6)?,
            actor_key: row.get(7)?,
            latency_ms: row.get(8)?,
            server_identity: row.get(9)?,
            backend_id: row.get(10)?,
            server_version: row.get(11)?,
            iteration_count: row.get(12)?,
            min_ms: row.get(13)?,
            max_ms: row.get(14)?,
            avg_ms: row.get(15)?,
            samples: row.get(16)?,
            concurrency: row.get(17)?,
            failed_units: row.get(18)?,
            wall_time_ms: row.get(19)?,
            throughput_per_sec: row.get(20)?,
            cache_hit_ratio: row.get(21)?,
            active_conn: row.get(22)?,
            idle_conn: row.get(23)?,
            total_conn: row.get(24)?,
            db_size: row.get(25)?,
            db_size_bytes: row.get(26)?,
            extended_stats_available: row.get::<Option<i64>>(27)?.map(|v| v != 0),
            degraded_fields: row.get(28)?,
            top_queries: row.get(29)?,
        })
    }

    fn decoded_samples(&self) -> Result<Vec<Decimal>> {
        match &self.samples {
            Some(raw) => serde_json::from_str(raw).context("invalid samples column"),
            None => Ok(Vec::new()),
        }
    }

    pub fn into_result(self) -> Result<ProbeResult> {
        let id = Uuid::parse_str(&self.uuid).with_context(|| format!("invalid result id {}", self.uuid))?;
        let kind = ProbeKind::from_str(&self.kind).map_err(|e| anyhow!(e))?;
        let timestamp = DateTime::<Utc>::from_timestamp_micros(self.checked_at)
            .ok_or_else(|| anyhow!("checked_at out of range: {}", self.checked_at))?;

        let outcome = if self.success {
            Outcome::Success(self.payload(kind)?)
        } else {
            let error_kind = self
                .error_kind
                .as_deref()
                .and_then(|k| ErrorKind::from_str(k).ok())
                .unwrap_or(ErrorKind::Unknown);
            Outcome::Failure(ProbeFailure {
                kind: error_kind,
                message: self.error_message.clone().unwrap_or_default(),
                partial_samples: self.decoded_samples()?,
            })
        };

        Ok(ProbeResult { id, region_id: self.region_id, kind, timestamp, actor_key: self.actor_key, outcome })
    }

    fn payload(&self, kind: ProbeKind) -> Result<ProbePayload> {
        let payload = match kind {
            ProbeKind::Connection => ProbePayload::Connection(ConnectionStats {
                latency_ms: parse_decimal("latency_ms", self.latency_ms.as_deref())?,
                server_identity: required("server_identity", self.server_identity.clone())?,
                backend_id: i32::try_from(required("backend_id", self.backend_id)?)?,
                server_version: required("server_version", self.server_version.clone())?,
            }),
            ProbeKind::Latency => ProbePayload::Latency(LatencyStats {
                iteration_count: u32::try_from(required("iteration_count", self.iteration_count)?)?,
                min_ms: parse_decimal("min_ms", self.min_ms.as_deref())?,
                max_ms: parse_decimal("max_ms", self.max_ms.as_deref())?,
                avg_ms: parse_decimal("avg_ms", self.avg_ms.as_deref())?,
                samples: self.decoded_samples()?,
            }),
            ProbeKind::Load => ProbePayload::Load(LoadStats {
                concurrency: u32::try_from(required("concurrency", self.concurrency)?)?,
                failed_units: u32::try_from(required("failed_units", self.failed_units)?)?,
                min_ms: parse_decimal("min_ms", self.min_ms.as_deref())?,
                max_ms: parse_decimal("max_ms", self.max_ms.as_deref())?,
                avg_ms: parse_decimal("avg_ms", self.avg_ms.as_deref())?,
                wall_time_ms: parse_decimal("wall_time_ms", self.wall_time_ms.as_deref())?,
                throughput_per_sec: parse_decimal("throughput_per_sec", self.throughput_per_sec.as_deref())?,
            }),
            ProbeKind::Health => {
                let degraded_fields: BTreeSet<String> = match &self.degraded_fields {
                    Some(raw) => serde_json::from_str(raw).context("invalid degraded_fields column")?,
                    None => BTreeSet::new(),
                };
                let top_queries: Vec<QueryStat> = match &self.top_queries {
                    Some(raw) => serde_json::from_str(raw).context("invalid top_queries column")?,
                    None => Vec::new(),
                };
                ProbePayload::Health(HealthStats {
                    cache_hit_ratio: parse_optional_decimal("cache_hit_ratio", self.cache_hit_ratio.as_deref())?,
                    active_conn: self.active_conn,
                    idle_conn: self.idle_conn,
                    total_conn: self.total_conn,
                    db_size: self.db_size.clone(),
                    db_size_bytes: self.db_size_bytes,
                    extended_stats_available: self.extended_stats_available.unwrap_or(false),
                    degraded_fields,
                    top_queries,
                })
            }
        };
        Ok(payload)
    }
}

/// Aggregate over a trailing window for one region
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub region_id: String,
    pub window_secs: u64,
    pub total_checks: u64,
    pub successful_checks: u64,
    /// Percentage with two decimals; absent when there were no checks
    pub success_rate: Option<Decimal>,
    pub avg_latency_ms: Option<Decimal>,
    pub min_latency_ms: Option<Decimal>,
    pub max_latency_ms: Option<Decimal>,
}

/// One point of a trend chart
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: Decimal,
}

/// Row of the `region_summary_24h` view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollingSummary {
    pub region_id: String,
    pub kind: ProbeKind,
    pub total_checks: i64,
    pub successful_checks: i64,
    pub success_rate: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    pub last_checked_at: DateTime<Utc>,
}
