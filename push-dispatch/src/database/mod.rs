//! Persistence layer for push dispatch.
//!
//! Subscriptions, preferences, farm membership, settings and the dispatch
//! log all live in one SQLite file opened in WAL mode.

pub mod models;
pub mod repositories;
pub mod retry;
pub mod time;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;
use std::time::Duration;

use crate::Result;

/// Database connection pool type alias.
pub type DbPool = Pool<Sqlite>;

const MIN_CONNECTIONS: u32 = 2;
const MAX_CONNECTIONS: u32 = 16;

const BUSY_TIMEOUT: Duration = Duration::from_secs(30);
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Pool size for a given delivery fan-out width.
///
/// Every delivery task writes its bookkeeping row once when it finishes, so
/// the pool only needs to cover part of the fan-out.
pub fn pool_size_for(concurrency: usize) -> u32 {
    let half = u32::try_from(concurrency / 2).unwrap_or(MAX_CONNECTIONS);
    half.clamp(MIN_CONNECTIONS, MAX_CONNECTIONS)
}

/// Open the pool at `database_url`, creating the file if needed.
pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<DbPool> {
    let connect_options = SqliteConnectOptions::from_str(database_url)?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT)
        .foreign_keys(true)
        .create_if_missing(true)
        .pragma("cache_size", "-8000")
        .pragma("temp_store", "MEMORY");

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(connect_options)
        .await?;

    let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
        .fetch_one(&pool)
        .await?;
    if mode != "wal" && mode != "memory" {
        tracing::warn!(journal_mode = %mode, "SQLite did not switch to WAL");
    }

    tracing::info!(max_connections, journal_mode = %mode, "Database pool ready");
    Ok(pool)
}

/// Apply the embedded schema migrations.
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    tracing::debug!("Database migrations applied");
    Ok(())
}
