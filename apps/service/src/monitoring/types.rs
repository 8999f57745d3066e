use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorKind, ProbeError};

/// Kind of probe to run against a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    Connection,
    Latency,
    Load,
    Health,
}

impl ProbeKind {
    pub const ALL: [ProbeKind; 4] =
        [ProbeKind::Connection, ProbeKind::Latency, ProbeKind::Load, ProbeKind::Health];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Connection => "connection",
            ProbeKind::Latency => "latency",
            ProbeKind::Load => "load",
            ProbeKind::Health => "health",
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "connection" | "test" => Ok(ProbeKind::Connection),
            "latency" => Ok(ProbeKind::Latency),
            "load" | "load_test" | "load-test" => Ok(ProbeKind::Load),
            "health" => Ok(ProbeKind::Health),
            other => Err(format!("unknown probe kind: {other}")),
        }
    }
}

/// Kind-specific knobs of a probe request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeParameters {
    Connection,
    Latency { iterations: u32 },
    Load { concurrency: u32 },
    Health,
}

impl ProbeParameters {
    pub fn kind(&self) -> ProbeKind {
        match self {
            ProbeParameters::Connection => ProbeKind::Connection,
            ProbeParameters::Latency { .. } => ProbeKind::Latency,
            ProbeParameters::Load { .. } => ProbeKind::Load,
            ProbeParameters::Health => ProbeKind::Health,
        }
    }
}

/// One probe invocation against one region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRequest {
    pub region_id: String,
    pub parameters: ProbeParameters,
}

impl ProbeRequest {
    pub fn new(region_id: impl Into<String>, parameters: ProbeParameters) -> Self {
        Self { region_id: region_id.into(), parameters }
    }

    pub fn kind(&self) -> ProbeKind {
        self.parameters.kind()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    /// Dial start to ready, in milliseconds
    pub latency_ms: Decimal,
    pub server_identity: String,
    pub backend_id: i32,
    pub server_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub iteration_count: u32,
    pub min_ms: Decimal,
    pub max_ms: Decimal,
    pub avg_ms: Decimal,
    /// Per-iteration durations in execution order
    pub samples: Vec<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadStats {
    pub concurrency: u32,
    pub failed_units: u32,
    pub min_ms: Decimal,
    pub max_ms: Decimal,
    pub avg_ms: Decimal,
    pub wall_time_ms: Decimal,
    pub throughput_per_sec: Decimal,
}

impl LoadStats {
    pub fn successful_units(&self) -> u32 {
        self.concurrency.saturating_sub(self.failed_units)
    }

    pub fn is_degraded(&self) -> bool {
        self.failed_units > 0
    }
}

/// Row of the statement statistics extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStat {
    pub query: String,
    pub calls: i64,
    pub total_time_ms: Decimal,
    pub mean_time_ms: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit_ratio: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_conn: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_conn: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_conn: Option<i64>,
    /// Human readable size as reported by the server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_size_bytes: Option<i64>,
    pub extended_stats_available: bool,
    /// Metrics that could not be read; non-empty means partial success
    #[serde(default)]
    pub degraded_fields: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_queries: Vec<QueryStat>,
}

impl HealthStats {
    pub fn is_degraded(&self) -> bool {
        !self.degraded_fields.is_empty()
    }
}

/// Kind-specific statistics of a successful probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "stats", rename_all = "snake_case")]
pub enum ProbePayload {
    Connection(ConnectionStats),
    Latency(LatencyStats),
    Load(LoadStats),
    Health(HealthStats),
}

impl ProbePayload {
    pub fn kind(&self) -> ProbeKind {
        match self {
            ProbePayload::Connection(_) => ProbeKind::Connection,
            ProbePayload::Latency(_) => ProbeKind::Latency,
            ProbePayload::Load(_) => ProbeKind::Load,
            ProbePayload::Health(_) => ProbeKind::Health,
        }
    }
}

/// Why a probe failed, plus whatever partial data was gathered first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFailure {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partial_samples: Vec<Decimal>,
}

impl ProbeFailure {
    pub fn with_samples(mut self, samples: Vec<Decimal>) -> Self {
        self.partial_samples = samples;
        self
    }
}

impl From<ProbeError> for ProbeFailure {
    fn from(err: ProbeError) -> Self {
        Self { kind: err.kind, message: err.message, partial_samples: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success(ProbePayload),
    Failure(ProbeFailure),
}

/// Immutable record of one probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub id: Uuid,
    pub region_id: String,
    pub kind: ProbeKind,
    /// Capture time, strictly increasing within the process
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_key: Option<String>,
    pub outcome: Outcome,
}

impl ProbeResult {
    pub fn succeeded(region_id: impl Into<String>, payload: ProbePayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            region_id: region_id.into(),
            kind: payload.kind(),
            timestamp: capture_timestamp(),
            actor_key: None,
            outcome: Outcome::Success(payload),
        }
    }

    pub fn failed(region_id: impl Into<String>, kind: ProbeKind, failure: impl Into<ProbeFailure>) -> Self {
        Self {
            id: Uuid::new_v4(),
            region_id: region_id.into(),
            kind,
            timestamp: capture_timestamp(),
            actor_key: None,
            outcome: Outcome::Failure(failure.into()),
        }
    }

    /// Attach the caller identity used for later attribution
    pub fn with_actor(mut self, actor_key: Option<String>) -> Self {
        self.actor_key = actor_key;
        self
    }

    pub fn success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    pub fn payload(&self) -> Option<&ProbePayload> {
        match &self.outcome {
            Outcome::Success(payload) => Some(payload),
            Outcome::Failure(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&ProbeFailure> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure(failure) => Some(failure),
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        self.failure().map(|f| f.message.as_str())
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.failure().map(|f| f.kind)
    }

    /// Headline latency: connect time, average iteration, or average load unit
    pub fn latency_ms(&self) -> Option<Decimal> {
        match self.payload()? {
            ProbePayload::Connection(stats) => Some(stats.latency_ms),
            ProbePayload::Latency(stats) => Some(stats.avg_ms),
            ProbePayload::Load(stats) => Some(stats.avg_ms),
            ProbePayload::Health(_) => None,
        }
    }

    /// Value plotted for trend charts of this kind
    pub fn metric_value(&self) -> Option<Decimal> {
        match self.payload()? {
            ProbePayload::Connection(stats) => Some(stats.latency_ms),
            ProbePayload::Latency(stats) => Some(stats.avg_ms),
            ProbePayload::Load(stats) => Some(stats.throughput_per_sec),
            ProbePayload::Health(stats) => stats.cache_hit_ratio,
        }
    }
}

static LAST_CAPTURE_MICROS: AtomicI64 = AtomicI64::new(0);

/// Wall-clock capture time, bumped by a microsecond when the clock has not
/// advanced (or went backwards) since the previous capture.
pub fn capture_timestamp() -> DateTime<Utc> {
    let now = Utc::now();
    let mut prev = LAST_CAPTURE_MICROS.load(Ordering::Relaxed);
    loop {
        let next = now.timestamp_micros().max(prev + 1);
        match LAST_CAPTURE_MICROS.compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Relaxed) {
            Ok(_) => return DateTime::from_timestamp_micros(next).unwrap_or(now),
            Err(actual) => prev = actual,
        }
    }
}
