//! SQLite pool setup and embedded schema migrations.
//!
//! The blob store and the catalog index each get their own pool so that the
//! two backends can fail independently.

use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr, time::Duration};
use tokio::fs;

/// Schema for bucket and object descriptors.
pub const BLOB_MIGRATIONS: &str = include_str!("../migrations/0001_blobs.sql");

/// Schema for catalog records.
pub const CATALOG_MIGRATIONS: &str = include_str!("../migrations/0002_catalog.sql");

/// Open a pool for `db_url`, creating the database file and its parent
/// directory when needed.
///
/// In-memory URLs get a single long-lived connection, since every new
/// connection would otherwise see an empty database.
pub async fn connect(db_url: &str, acquire_timeout: Duration) -> Result<SqlitePool> {
    let in_memory = db_url.contains(":memory:");

    if !in_memory {
        let db_path = db_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:")
            .trim_start_matches("file:");
        tracing::debug!("Interpreted SQLite path => {}", db_path);

        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("creating database directory {:?}", parent))?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)
        .with_context(|| format!("parsing database url `{}`", db_url))?
        .create_if_missing(true);

    let mut pool = SqlitePoolOptions::new().acquire_timeout(acquire_timeout);
    pool = if in_memory {
        pool.max_connections(1)
            .min_connections(1)
            .idle_timeout(None::<Duration>)
            .max_lifetime(None::<Duration>)
    } else {
        pool.max_connections(5)
    };

    pool.connect_with(options)
        .await
        .with_context(|| format!("connecting to {}", db_url))
}

/// Run an embedded migration script statement by statement.
///
/// Every statement uses `IF NOT EXISTS`, so running it again is a no-op.
pub async fn run_migrations(db: &SqlitePool, sql: &str) -> Result<()> {
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(())
}
