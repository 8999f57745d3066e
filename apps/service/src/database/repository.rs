use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::params::Params;
use libsql::{Value, params};
use rust_decimal::Decimal;

use super::models::{MetricPoint, ProbeRecord, RECORD_COLUMNS, RollingSummary, Summary};
use crate::monitoring::stats::{percentage, summarize};
use crate::monitoring::types::{ProbeKind, ProbeResult};
use crate::pool::{LibsqlManager, LibsqlPool};

/// Append-only sink and query surface for probe results
#[async_trait]
pub trait CheckResultStore: Send + Sync {
    /// Append one result; rows are never updated
    async fn save(&self, result: &ProbeResult) -> Result<i64>;

    /// Newest first
    async fn recent(&self, region_id: &str, limit: usize) -> Result<Vec<ProbeResult>>;

    /// Newest first across several regions
    async fn recent_across(&self, region_ids: &[String], limit: usize) -> Result<Vec<ProbeResult>>;

    async fn summary(&self, region_id: &str, window: Duration) -> Result<Summary>;

    /// Chronological trend points of successful checks of one kind
    async fn metric_series(&self, region_id: &str, kind: ProbeKind, limit: usize) -> Result<Vec<MetricPoint>>;

    /// Delete rows captured before `now - horizon`; returns how many went
    async fn reclaim(&self, horizon: Duration) -> Result<u64>;

    /// Contents of the `region_summary_24h` view
    async fn rolling_24h(&self) -> Result<Vec<RollingSummary>>;
}

/// LibSQL implementation of [`CheckResultStore`]
pub struct LibsqlStore {
    pool: LibsqlPool,
}

impl LibsqlStore {
    pub fn new_from_pool(pool: LibsqlPool) -> Self {
        Self { pool }
    }

    async fn get_conn(&self) -> Result<deadpool::managed::Object<LibsqlManager>> {
        self.pool.get().await.map_err(|e| anyhow!("failed to get database connection: {e}"))
    }

    async fn query_results(&self, sql: &str, params: Params) -> Result<Vec<ProbeResult>> {
        let conn = self.get_conn().await?;
        let mut rows = conn.query(sql, params).await?;
        let mut results = Vec::new();
        while let Some(row) = rows.next().await? {
            results.push(ProbeRecord::from_row(&row)?.into_result()?);
        }
        Ok(results)
    }
}

fn micros_before_now(window: Duration) -> Result<i64> {
    let window = chrono::Duration::from_std(window).context("window out of range")?;
    let cutoff = Utc::now().checked_sub_signed(window).context("window out of range")?;
    Ok(cutoff.timestamp_micros())
}

fn limit_value(limit: usize) -> Value {
    Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX))
}

#[async_trait]
impl CheckResultStore for LibsqlStore {
    async fn save(&self, result: &ProbeResult) -> Result<i64> {
        let record = ProbeRecord::from_result(result)?;
        let mut values = record.values();
        values.push(Value::Integer(Utc::now().timestamp_micros()));
        let placeholders = vec!["?"; values.len()].join(", ");

        let conn = self.get_conn().await?;
        conn.execute(
            &format!("INSERT INTO probe_results ({RECORD_COLUMNS}, created_at) VALUES ({placeholders})"),
            Params::Positional(values),
        )
        .await
        .with_context(|| format!("failed to insert result {}", result.id))?;

        Ok(conn.last_insert_rowid())
    }

    async fn recent(&self, region_id: &str, limit: usize) -> Result<Vec<ProbeResult>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM probe_results WHERE region_id = ? ORDER BY checked_at DESC LIMIT ?"
        );
        self.query_results(&sql, Params::Positional(vec![Value::Text(region_id.to_string()), limit_value(limit)]))
            .await
    }

    async fn recent_across(&self, region_ids: &[String], limit: usize) -> Result<Vec<ProbeResult>> {
        if region_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; region_ids.len()].join(", ");
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM probe_results WHERE region_id IN ({placeholders}) \
             ORDER BY checked_at DESC LIMIT ?"
        );
        let mut values: Vec<Value> = region_ids.iter().cloned().map(Value::Text).collect();
        values.push(limit_value(limit));
        self.query_results(&sql, Params::Positional(values)).await
    }

    async fn summary(&self, region_id: &str, window: Duration) -> Result<Summary> {
        let since = micros_before_now(window)?;
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT success, latency_ms FROM probe_results WHERE region_id = ? AND checked_at >= ?",
                params![region_id, since],
            )
            .await?;

        let mut total_checks = 0u64;
        let mut successful_checks = 0u64;
        let mut latencies = Vec::new();
        while let Some(row) = rows.next().await? {
            total_checks += 1;
            if row.get::<i64>(0)? != 0 {
                successful_checks += 1;
            }
            if let Some(raw) = row.get::<Option<String>>(1)? {
                latencies.push(Decimal::from_str(&raw).with_context(|| format!("invalid latency {raw}"))?);
            }
        }

        let latency = summarize(&latencies);
        Ok(Summary {
            region_id: region_id.to_string(),
            window_secs: window.as_secs(),
            total_checks,
            successful_checks,
            success_rate: percentage(successful_checks, total_checks),
            avg_latency_ms: latency.map(|s| s.avg),
            min_latency_ms: latency.map(|s| s.min),
            max_latency_ms: latency.map(|s| s.max),
        })
    }

    async fn metric_series(&self, region_id: &str, kind: ProbeKind, limit: usize) -> Result<Vec<MetricPoint>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM probe_results WHERE region_id = ? AND kind = ? AND success = 1 \
             ORDER BY checked_at DESC LIMIT ?"
        );
        let params = Params::Positional(vec![
            Value::Text(region_id.to_string()),
            Value::Text(kind.as_str().to_string()),
            limit_value(limit),
        ]);
        let mut points: Vec<MetricPoint> = self
            .query_results(&sql, params)
            .await?
            .into_iter()
            .filter_map(|result| {
                Some(MetricPoint { timestamp: result.timestamp, value: result.metric_value()? })
            })
            .collect();
        points.reverse();
        Ok(points)
    }

    async fn reclaim(&self, horizon: Duration) -> Result<u64> {
        let cutoff = micros_before_now(horizon)?;
        let conn = self.get_conn().await?;
        let deleted = conn
            .execute("DELETE FROM probe_results WHERE checked_at < ?", params![cutoff])
            .await?;
        Ok(deleted)
    }

    async fn rolling_24h(&self) -> Result<Vec<RollingSummary>> {
        let conn = self.get_conn().await?;
        let mut rows = conn
            .query(
                "SELECT region_id, kind, total_checks, successful_checks, success_rate, avg_latency_ms, \
                 min_latency_ms, max_latency_ms, last_checked_at \
                 FROM region_summary_24h ORDER BY region_id, kind",
                (),
            )
            .await?;

        let mut summaries = Vec::new();
        while let Some(row) = rows.next().await? {
            let kind: String = row.get(1)?;
            let last_checked_at: i64 = row.get(8)?;
            summaries.push(RollingSummary {
                region_id: row.get(0)?,
                kind: ProbeKind::from_str(&kind).map_err(|e| anyhow!(e))?,
                total_checks: row.get(2)?,
                successful_checks: row.get(3)?,
                success_rate: row.get(4)?,
                avg_latency_ms: row.get(5)?,
                min_latency_ms: row.get(6)?,
                max_latency_ms: row.get(7)?,
                last_checked_at: DateTime::<Utc>::from_timestamp_micros(last_checked_at)
                    .ok_or_else(|| anyhow!("last_checked_at out of range"))?,
            });
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::open_store;
    use crate::error::ProbeError;
    use crate::monitoring::types::{
        ConnectionStats, HealthStats, LatencyStats, LoadStats, ProbeFailure, ProbePayload,
    };
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tempfile::{TempDir, tempdir};

    async fn store() -> (LibsqlStore, TempDir) {
        let dir = tempdir().unwrap();
        let store = open_store(&dir.path().join("results.db"), 2).await.unwrap();
        (store, dir)
    }

    fn connection(region: &str, latency: Decimal) -> ProbeResult {
        ProbeResult::succeeded(
            region,
            ProbePayload::Connection(ConnectionStats {
                latency_ms: latency,
                server_identity: format!("{region}:5432/defaultdb"),
                backend_id: 41,
                server_version: "16.4".into(),
            }),
        )
    }

    fn aged(mut result: ProbeResult, days: i64) -> ProbeResult {
        result.timestamp = Utc::now() - chrono::Duration::days(days);
        result
    }

    #[tokio::test]
    async fn test_round_trip_preserves_two_decimals() {
        let (store, _dir) = store().await;
        let latency = ProbeResult::succeeded(
            "eu-west",
            ProbePayload::Latency(LatencyStats {
                iteration_count: 3,
                min_ms: dec!(10.10),
                max_ms: dec!(30.30),
                avg_ms: dec!(20.00),
                samples: vec![dec!(10.10), dec!(19.60), dec!(30.30)],
            }),
        );
        let load = ProbeResult::succeeded(
            "eu-west",
            ProbePayload::Load(LoadStats {
                concurrency: 10,
                failed_units: 2,
                min_ms: dec!(4.00),
                max_ms: dec!(9.99),
                avg_ms: dec!(6.50),
                wall_time_ms: dec!(12.01),
                throughput_per_sec: dec!(666.11),
            }),
        );
        store.save(&latency).await.unwrap();
        store.save(&load).await.unwrap();

        let recent = store.recent("eu-west", 10).await.unwrap();
        assert_eq!(recent, vec![load, latency]);
        let Some(ProbePayload::Latency(stats)) = recent[1].payload() else {
            panic!("expected latency payload");
        };
        assert_eq!(stats.avg_ms.to_string(), "20.00");
    }

    #[tokio::test]
    async fn test_absent_fields_are_null() {
        let (store, _dir) = store().await;
        let health = ProbeResult::succeeded(
            "asia-pacific",
            ProbePayload::Health(HealthStats { cache_hit_ratio: Some(dec!(97.25)), ..HealthStats::default() }),
        );
        store.save(&health).await.unwrap();

        let conn = store.get_conn().await.unwrap();
        let mut rows = conn
            .query("SELECT latency_ms, active_conn, db_size, min_ms FROM probe_results", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<Option<String>>(0).unwrap(), None);
        assert_eq!(row.get::<Option<i64>>(1).unwrap(), None);
        assert_eq!(row.get::<Option<String>>(2).unwrap(), None);
        assert_eq!(row.get::<Option<String>>(3).unwrap(), None);
    }

    #[tokio::test]
    async fn test_recent_is_newest_first_and_limited() {
        let (store, _dir) = store().await;
        for latency in [dec!(1.00), dec!(2.00), dec!(3.00)] {
            store.save(&connection("us-east", latency)).await.unwrap();
        }
        store.save(&connection("eu-west", dec!(9.00))).await.unwrap();

        let recent = store.recent("us-east", 2).await.unwrap();
        let latencies: Vec<_> = recent.iter().filter_map(|r| r.latency_ms()).collect();
        assert_eq!(latencies, vec![dec!(3.00), dec!(2.00)]);

        let across = store.recent_across(&["us-east".into(), "eu-west".into()], 10).await.unwrap();
        assert_eq!(across.len(), 4);
        assert_eq!(across[0].region_id, "eu-west");
        assert!(store.recent_across(&[], 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_summary_over_window() {
        let (store, _dir) = store().await;
        store.save(&connection("us-east", dec!(10.00))).await.unwrap();
        store.save(&connection("us-east", dec!(20.00))).await.unwrap();
        store.save(&connection("us-east", dec!(33.00))).await.unwrap();
        store
            .save(&ProbeResult::failed(
                "us-east",
                ProbeKind::Connection,
                ProbeError::timeout("connect timed out after 100ms"),
            ))
            .await
            .unwrap();
        store.save(&aged(connection("us-east", dec!(500.00)), 3)).await.unwrap();

        let summary = store.summary("us-east", Duration::from_secs(24 * 3600)).await.unwrap();
        assert_eq!(summary.total_checks, 4);
        assert_eq!(summary.successful_checks, 3);
        assert_eq!(summary.success_rate, Some(dec!(75.00)));
        assert_eq!(summary.avg_latency_ms, Some(dec!(21.00)));
        assert_eq!(summary.min_latency_ms, Some(dec!(10.00)));
        assert_eq!(summary.max_latency_ms, Some(dec!(33.00)));

        let empty = store.summary("eu-west", Duration::from_secs(3600)).await.unwrap();
        assert_eq!(empty.total_checks, 0);
        assert_eq!(empty.success_rate, None);
        assert_eq!(empty.avg_latency_ms, None);
    }

    #[tokio::test]
    async fn test_reclaim_is_idempotent() {
        let (store, _dir) = store().await;
        store.save(&aged(connection("us-east", dec!(1.00)), 10)).await.unwrap();
        store.save(&aged(connection("us-east", dec!(2.00)), 8)).await.unwrap();
        store.save(&connection("us-east", dec!(3.00))).await.unwrap();

        let horizon = Duration::from_secs(7 * 24 * 3600);
        assert_eq!(store.reclaim(horizon).await.unwrap(), 2);
        assert_eq!(store.reclaim(horizon).await.unwrap(), 0);
        assert_eq!(store.recent("us-east", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reclaim_rejects_unrepresentable_horizon() {
        let (store, _dir) = store().await;
        store.save(&connection("us-east", dec!(1.00))).await.unwrap();

        assert!(store.reclaim(Duration::from_secs(u64::MAX)).await.is_err());
        assert!(store.reclaim(Duration::from_secs(100_000_000 * 24 * 3600)).await.is_err());
        assert_eq!(store.recent("us-east", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_metric_series_is_chronological() {
        let (store, _dir) = store().await;
        store.save(&connection("eu-west", dec!(5.00))).await.unwrap();
        store
            .save(&ProbeResult::failed("eu-west", ProbeKind::Connection, ProbeError::timeout("slow")))
            .await
            .unwrap();
        store.save(&connection("eu-west", dec!(7.00))).await.unwrap();

        let series = store.metric_series("eu-west", ProbeKind::Connection, 10).await.unwrap();
        let values: Vec<_> = series.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![dec!(5.00), dec!(7.00)]);
        assert!(series[0].timestamp < series[1].timestamp);
    }

    #[tokio::test]
    async fn test_rolling_view_groups_by_region_and_kind() {
        let (store, _dir) = store().await;
        store.save(&connection("eu-west", dec!(10.00))).await.unwrap();
        store.save(&connection("eu-west", dec!(20.00))).await.unwrap();
        let failure = ProbeFailure::from(ProbeError::timeout("slow")).with_samples(vec![dec!(1.00)]);
        store.save(&ProbeResult::failed("eu-west", ProbeKind::Latency, failure)).await.unwrap();
        store.save(&aged(connection("us-east", dec!(1.00)), 2)).await.unwrap();

        let rolling = store.rolling_24h().await.unwrap();
        assert_eq!(rolling.len(), 2);
        let conn = &rolling[0];
        assert_eq!((conn.region_id.as_str(), conn.kind), ("eu-west", ProbeKind::Connection));
        assert_eq!(conn.total_checks, 2);
        assert_eq!(conn.success_rate, Some(100.0));
        assert_eq!(conn.avg_latency_ms, Some(15.0));
        assert_eq!(rolling[1].successful_checks, 0);
        assert!(rolling[1].last_checked_at > Utc.timestamp_opt(0, 0).unwrap());
    }
}
