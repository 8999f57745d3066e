use anyhow::Result;
use chrono::Utc;
use libsql::Connection;

/// Schema version - increment when making schema changes
const SCHEMA_VERSION: i32 = 2;

/// Bring the result schema up to date.
///
/// Every migration is idempotent so a crash between a migration and its
/// bookkeeping row is harmless.
pub async fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current_version = get_current_version(conn).await?;

    if current_version >= SCHEMA_VERSION {
        tracing::debug!("Database schema is up to date (version {})", current_version);
        return Ok(());
    }

    tracing::info!("Running migrations from version {} to {}", current_version, SCHEMA_VERSION);

    if current_version < 1 {
        run_migration_v1(conn).await?;
        record_migration(conn, 1, "Create probe_results").await?;
    }

    if current_version < 2 {
        run_migration_v2(conn).await?;
        record_migration(conn, 2, "Add region_summary_24h view").await?;
    }

    tracing::info!("Database migrations completed (now at version {})", SCHEMA_VERSION);
    Ok(())
}

/// Get current schema version from database
pub async fn get_current_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;

    if let Some(row) = rows.next().await? {
        let version: Option<i32> = row.get(0)?;
        Ok(version.unwrap_or(0))
    } else {
        Ok(0)
    }
}

async fn record_migration(conn: &Connection, version: i32, description: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at, description) VALUES (?, ?, ?)",
        libsql::params![version, Utc::now().timestamp(), description],
    )
    .await?;

    tracing::info!("Applied migration v{}: {}", version, description);
    Ok(())
}

/// Migration v1: one append-only row per probe, kind-specific columns nullable.
/// Decimal values are TEXT with two fractional digits; times are unix micros.
async fn run_migration_v1(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS probe_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            uuid TEXT NOT NULL UNIQUE,
            region_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            checked_at INTEGER NOT NULL,
            success INTEGER NOT NULL,
            error_kind TEXT,
            error_message TEXT,
            actor_key TEXT,
            latency_ms TEXT,
            server_identity TEXT,
            backend_id INTEGER,
            server_version TEXT,
            iteration_count INTEGER,
            min_ms TEXT,
            max_ms TEXT,
            avg_ms TEXT,
            samples TEXT,
            concurrency INTEGER,
            failed_units INTEGER,
            wall_time_ms TEXT,
            throughput_per_sec TEXT,
            cache_hit_ratio TEXT,
            active_conn INTEGER,
            idle_conn INTEGER,
            total_conn INTEGER,
            db_size TEXT,
            db_size_bytes INTEGER,
            extended_stats_available INTEGER,
            degraded_fields TEXT,
            top_queries TEXT,
            created_at INTEGER NOT NULL
        )",
        (),
    )
    .await?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_probe_results_region_checked ON probe_results(region_id, checked_at DESC)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_probe_results_checked ON probe_results(checked_at)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_probe_results_region_kind ON probe_results(region_id, kind, checked_at DESC)",
        (),
    )
    .await?;

    Ok(())
}

/// Migration v2: rolling 24 hour aggregate per region and kind
async fn run_migration_v2(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE VIEW IF NOT EXISTS region_summary_24h AS
         SELECT
            region_id,
            kind,
            COUNT(*) AS total_checks,
            SUM(success) AS successful_checks,
            ROUND(100.0 * SUM(success) / COUNT(*), 2) AS success_rate,
            ROUND(AVG(CAST(latency_ms AS REAL)), 2) AS avg_latency_ms,
            MIN(CAST(latency_ms AS REAL)) AS min_latency_ms,
            MAX(CAST(latency_ms AS REAL)) AS max_latency_ms,
            MAX(checked_at) AS last_checked_at
         FROM probe_results
         WHERE checked_at >= (CAST(strftime('%s', 'now') AS INTEGER) - 86400) * 1000000
         GROUP BY region_id, kind",
        (),
    )
    .await?;

    Ok(())
}
