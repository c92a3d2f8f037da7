//! Schema for the three relations: `repositories` (one row per entity),
//! `stars_history` (append-only samples) and `crawl_checkpoints`.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Open the configured database and create the schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create all tables and indexes. Safe to run repeatedly.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS repositories (
            entity_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            owner_login TEXT NOT NULL,
            full_name TEXT NOT NULL,
            url TEXT NOT NULL,
            star_count INTEGER NOT NULL DEFAULT 0,
            fork_count INTEGER NOT NULL DEFAULT 0,
            primary_language TEXT,
            description TEXT,
            created_at INTEGER,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Append-only; rows are never updated or deleted
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stars_history (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_id TEXT NOT NULL,
            star_count INTEGER NOT NULL,
            observed_at INTEGER NOT NULL,
            FOREIGN KEY (entity_id) REFERENCES repositories(entity_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS crawl_checkpoints (
            partition_key TEXT PRIMARY KEY,
            pagination_cursor TEXT,
            page_offset INTEGER NOT NULL DEFAULT 0,
            fetched_count INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_stars_history_entity ON stars_history(entity_id, observed_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_repositories_stars ON repositories(star_count DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
