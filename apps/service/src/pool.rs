use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use deadpool::managed::{self, Pool, RecycleError, RecycleResult};
use libsql::{Builder, Connection, Database, Error as LibsqlError, params};

/// Milliseconds a writer waits on a locked database before giving up
const BUSY_TIMEOUT_MS: u64 = 5_000;

pub struct LibsqlManager {
    database: Database,
    recycle_count: AtomicUsize,
}

impl LibsqlManager {
    pub fn new(database: Database) -> Self {
        Self { database, recycle_count: AtomicUsize::new(0) }
    }
}

impl managed::Manager for LibsqlManager {
    type Type = Connection;
    type Error = LibsqlError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let conn = self.database.connect()?;
        // Both pragmas report their new value as a row
        conn.query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), ()).await?;
        conn.query("PRAGMA journal_mode = WAL", ()).await?;
        Ok(conn)
    }

    async fn recycle(&self, conn: &mut Self::Type, _: &managed::Metrics) -> RecycleResult<Self::Error> {
        let recycle_count = self.recycle_count.fetch_add(1, Ordering::Relaxed) as u64;
        let row = conn
            .query("SELECT ?1", params![recycle_count])
            .await?
            .next()
            .await?
            .ok_or(LibsqlError::QueryReturnedNoRows)?;
        if row.get::<u64>(0)? != recycle_count {
            return Err(RecycleError::Message("connection returned a stale result".into()));
        }
        Ok(())
    }
}

pub type LibsqlPool = Pool<LibsqlManager>;

/// Open (creating if needed) the result database and wrap it in a pool
pub async fn open_pool(path: &Path, max_size: usize) -> Result<LibsqlPool> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }

    let database = Builder::new_local(path)
        .build()
        .await
        .with_context(|| format!("failed to open database {}", path.display()))?;
    let pool = Pool::builder(LibsqlManager::new(database))
        .max_size(max_size)
        .build()
        .context("failed to build connection pool")?;
    Ok(pool)
}
