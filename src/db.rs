//! SQLite connection and schema setup.

use anyhow::Result;
use sqlx::{SqlitePool, sqlite::SqlitePoolOptions};
use std::path::Path;

/// Schema applied by `--migrate` (and by tests against in-memory databases).
pub const SCHEMA: &str = include_str!("../migrations/0001_init.sql");

/// Open a pool for `db_url`, creating the database file's parent directory.
pub async fn connect(db_url: &str) -> Result<SqlitePool> {
    // Extract the local file path SQLx will use
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if !db_path.starts_with(":memory:") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let url = if db_url.contains('?') || db_path.starts_with(":memory:") {
        db_url.to_string()
    } else {
        format!("{db_url}?mode=rwc")
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&url)
        .await?;
    Ok(pool)
}

/// Execute each `;`-separated statement of `sql`. Returns the statement count.
pub async fn apply_schema(db: &SqlitePool, sql: &str) -> Result<usize, sqlx::Error> {
    let statements = sql
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in &statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(db).await?;
    }

    Ok(statements.len())
}
