//! SQLite pool for the fill log.
//!
//! The database file and its parent directory are created on first use.
//! WAL mode lets `GET /filled` read while a fill appends; writers that
//! collide wait up to `db.busy_timeout_ms` instead of failing with
//! `SQLITE_BUSY`.

use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db = &config.db;

    if let Some(parent) = db.path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db.path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(db.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(db.max_connections)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open database: {}", db.path.display()))?;

    tracing::debug!(
        path = %db.path.display(),
        max_connections = db.max_connections,
        "database pool ready"
    );
    Ok(pool)
}
