/// Result storage
///
/// Probe results are appended to a local libsql database and only ever
/// removed by the retention sweep.
pub mod migrations;
pub mod models;
pub mod repository;

pub use models::{MetricPoint, RollingSummary, Summary};
pub use repository::{CheckResultStore, LibsqlStore};

use std::path::Path;

use anyhow::Result;

use crate::pool::open_pool;

/// Initialize database with schema
pub async fn initialize_database(conn: &libsql::Connection) -> Result<()> {
    migrations::run_migrations(conn).await
}

/// Open the result database at `path`, migrate it, and return a store
pub async fn open_store(path: &Path, pool_size: usize) -> Result<LibsqlStore> {
    let pool = open_pool(path, pool_size).await?;
    {
        let conn = pool.get().await.map_err(|e| anyhow::anyhow!("failed to get database connection: {e}"))?;
        initialize_database(&conn).await?;
    }
    Ok(LibsqlStore::new_from_pool(pool))
}
