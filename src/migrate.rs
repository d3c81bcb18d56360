//! Idempotent schema setup for the SQLite backend.
//!
//! Timestamps are stored as Unix milliseconds.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS materials (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            source_kind TEXT NOT NULL CHECK (source_kind IN ('url', 'pdf', 'youtube')),
            source_location TEXT NOT NULL CHECK (length(trim(source_location)) > 0),
            status TEXT NOT NULL,
            extracted_title TEXT,
            extracted_content TEXT,
            content_fingerprint TEXT,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            last_checked_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schedules (
            id TEXT PRIMARY KEY,
            material_id TEXT NOT NULL,
            interval_secs INTEGER NOT NULL CHECK (interval_secs >= 60),
            next_run_at INTEGER NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            claimed_until INTEGER,
            last_run_at INTEGER,
            created_at INTEGER NOT NULL,
            FOREIGN KEY (material_id) REFERENCES materials(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_materials_recent ON materials(created_at DESC, id ASC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_schedules_due ON schedules(active, next_run_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_schedules_material ON schedules(material_id)")
        .execute(pool)
        .await?;

    Ok(())
}
