//! SQLite database connection pool management.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to create pool: {0}")]
    PoolCreationFailed(#[source] sqlx::Error),
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
    #[error("Failed to create directory: {0}")]
    DirectoryCreationFailed(#[source] std::io::Error),
    #[error("Migration failed: {0}")]
    MigrationFailed(#[source] sqlx::Error),
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(3),
        }
    }
}

pub async fn create_pool(database_url: &str, config: Option<PoolConfig>) -> Result<SqlitePool, ConnectionError> {
    let config = config.unwrap_or_default();
    ensure_database_directory(database_url)?;

    let connect_options = SqliteConnectOptions::from_str(database_url)
        .map_err(|_| ConnectionError::InvalidDatabaseUrl(database_url.to_string()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(connect_options)
        .await
        .map_err(ConnectionError::PoolCreationFailed)?;

    Ok(pool)
}

/// In-memory pool for tests. Single connection so the memory database is
/// shared across all uses of the pool.
pub async fn create_test_pool() -> Result<SqlitePool, ConnectionError> {
    let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|_| ConnectionError::InvalidDatabaseUrl("sqlite::memory:".to_string()))?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true);

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(connect_options)
        .await
        .map_err(ConnectionError::PoolCreationFailed)
}

fn ensure_database_directory(database_url: &str) -> Result<(), ConnectionError> {
    let path = database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url);

    if path == ":memory:" || path.is_empty() {
        return Ok(());
    }

    let path = Path::new(path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(ConnectionError::DirectoryCreationFailed)?;
        }
    }
    Ok(())
}

/// Create the schema. One table per entity: scoped identifier columns for
/// the query paths the ports expose, plus a single JSON blob.
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), ConnectionError> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS actors (
            guid TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS slices (
            id TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            resource_type TEXT,
            blob TEXT NOT NULL,
            PRIMARY KEY (actor_id, id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_slices_kind ON slices (actor_id, kind)",
        "CREATE TABLE IF NOT EXISTS reservations (
            id TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            slice_id TEXT NOT NULL,
            category TEXT NOT NULL,
            state TEXT NOT NULL,
            pending TEXT NOT NULL,
            blob TEXT NOT NULL,
            PRIMARY KEY (actor_id, id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_reservations_slice ON reservations (actor_id, slice_id)",
        "CREATE INDEX IF NOT EXISTS idx_reservations_state ON reservations (actor_id, state)",
        "CREATE TABLE IF NOT EXISTS delegations (
            id TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            slice_id TEXT NOT NULL,
            state TEXT NOT NULL,
            blob TEXT NOT NULL,
            PRIMARY KEY (actor_id, id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_delegations_slice ON delegations (actor_id, slice_id)",
        "CREATE TABLE IF NOT EXISTS units (
            id TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            reservation_id TEXT NOT NULL,
            slice_id TEXT NOT NULL,
            state TEXT NOT NULL,
            blob TEXT NOT NULL,
            PRIMARY KEY (actor_id, id)
        )",
        "CREATE INDEX IF NOT EXISTS idx_units_reservation ON units (actor_id, reservation_id)",
        "CREATE TABLE IF NOT EXISTS clients (
            guid TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            name TEXT NOT NULL,
            topic TEXT NOT NULL,
            PRIMARY KEY (actor_id, guid)
        )",
        "CREATE TABLE IF NOT EXISTS miscellaneous (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(ConnectionError::MigrationFailed)?;
    }
    Ok(())
}
