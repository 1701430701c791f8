//! Durable key registry: a single indexed SQLite table.
//!
//! The registry is the source of truth for key membership; the pool's
//! in-memory view is a cache refreshed by reconciliation. Nothing else is
//! persisted — per-key runtime statistics are volatile by design.

mod store;

pub use store::{KeyStore, StatusFilter};

use std::path::Path;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use keymux_types::RegistryError;

/// Open (creating if missing) the SQLite database and apply the schema.
pub async fn open_database(path: &Path) -> Result<SqlitePool, RegistryError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir).map_err(RegistryError::database)?;
        }
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(RegistryError::database)?;

    apply_schema(&pool).await?;
    Ok(pool)
}

/// In-memory database for tests.
pub async fn open_in_memory() -> Result<SqlitePool, RegistryError> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .map_err(RegistryError::database)?;
    apply_schema(&pool).await?;
    Ok(pool)
}

async fn apply_schema(pool: &SqlitePool) -> Result<(), RegistryError> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS api_keys (
               id INTEGER PRIMARY KEY AUTOINCREMENT,
               secret TEXT NOT NULL UNIQUE,
               enabled INTEGER NOT NULL DEFAULT 1,
               created_at TEXT NOT NULL
           )"#,
    )
    .execute(pool)
    .await
    .map_err(RegistryError::database)?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_api_keys_enabled ON api_keys (enabled)")
        .execute(pool)
        .await
        .map_err(RegistryError::database)?;

    Ok(())
}
