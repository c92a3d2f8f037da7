//! SQLite-backed [`RepoStore`] and [`CheckpointStore`].
//!
//! Entity upserts use `ON CONFLICT(entity_id) DO UPDATE`, so re-delivering a
//! batch after a crash is safe. Checkpoint saves accumulate `fetched_count`
//! inside the conflict clause itself.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::models::{Checkpoint, Repository, StarSample};

use super::{CheckpointStore, RepoStore, StoredRepository};

/// SQLite implementation of both storage traits.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn repository_from_row(row: &SqliteRow) -> StoredRepository {
    let created_at: Option<i64> = row.get("created_at");
    let star_count: i64 = row.get("star_count");
    let fork_count: i64 = row.get("fork_count");

    StoredRepository {
        repository: Repository {
            entity_id: row.get("entity_id"),
            name: row.get("name"),
            owner_login: row.get("owner_login"),
            full_name: row.get("full_name"),
            url: row.get("url"),
            star_count: star_count.max(0) as u64,
            fork_count: fork_count.max(0) as u64,
            primary_language: row.get("primary_language"),
            description: row.get("description"),
            created_at: created_at.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        },
        updated_at: row.get("updated_at"),
    }
}

fn checkpoint_from_row(row: &SqliteRow) -> Checkpoint {
    let page_offset: i64 = row.get("page_offset");
    let fetched_count: i64 = row.get("fetched_count");

    Checkpoint {
        partition_key: row.get("partition_key"),
        pagination_cursor: row.get("pagination_cursor"),
        page_offset: page_offset.max(0) as u64,
        fetched_count: fetched_count.max(0) as u64,
        updated_at: Some(row.get("updated_at")),
    }
}

#[async_trait]
impl RepoStore for SqliteStore {
    async fn bulk_upsert(&self, repos: &[Repository]) -> Result<()> {
        if repos.is_empty() {
            return Ok(());
        }

        let now = Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for repo in repos {
            sqlx::query(
                r#"
                INSERT INTO repositories (entity_id, name, owner_login, full_name, url,
                                          star_count, fork_count, primary_language,
                                          description, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(entity_id) DO UPDATE SET
                    star_count = excluded.star_count,
                    fork_count = excluded.fork_count,
                    primary_language = excluded.primary_language,
                    description = excluded.description,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&repo.entity_id)
            .bind(&repo.name)
            .bind(&repo.owner_login)
            .bind(&repo.full_name)
            .bind(&repo.url)
            .bind(repo.star_count as i64)
            .bind(repo.fork_count as i64)
            .bind(&repo.primary_language)
            .bind(&repo.description)
            .bind(repo.created_at.map(|dt| dt.timestamp()))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        for repo in repos {
            sqlx::query(
                "INSERT INTO stars_history (entity_id, star_count, observed_at) VALUES (?, ?, ?)",
            )
            .bind(&repo.entity_id)
            .bind(repo.star_count as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn all_repositories(&self) -> Result<Vec<StoredRepository>> {
        let rows = sqlx::query(
            "SELECT entity_id, name, owner_login, full_name, url, star_count, fork_count, \
             primary_language, description, created_at, updated_at \
             FROM repositories ORDER BY entity_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(repository_from_row).collect())
    }

    async fn star_history(&self, entity_id: &str) -> Result<Vec<StarSample>> {
        let rows = sqlx::query(
            "SELECT entity_id, star_count, observed_at FROM stars_history \
             WHERE entity_id = ? ORDER BY id",
        )
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let star_count: i64 = row.get("star_count");
                StarSample {
                    entity_id: row.get("entity_id"),
                    star_count: star_count.max(0) as u64,
                    observed_at: row.get("observed_at"),
                }
            })
            .collect())
    }
}

#[async_trait]
impl CheckpointStore for SqliteStore {
    async fn get(&self, partition_key: &str) -> Result<Checkpoint> {
        let row = sqlx::query(
            "SELECT partition_key, pagination_cursor, page_offset, fetched_count, updated_at \
             FROM crawl_checkpoints WHERE partition_key = ?",
        )
        .bind(partition_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => checkpoint_from_row(&row),
            None => Checkpoint {
                partition_key: partition_key.to_string(),
                ..Default::default()
            },
        })
    }

    async fn save(
        &self,
        partition_key: &str,
        cursor: Option<&str>,
        page_offset: u64,
        fetched_delta: u64,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO crawl_checkpoints (partition_key, pagination_cursor, page_offset, fetched_count, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(partition_key) DO UPDATE SET
                pagination_cursor = excluded.pagination_cursor,
                page_offset = excluded.page_offset,
                fetched_count = crawl_checkpoints.fetched_count + excluded.fetched_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(partition_key)
        .bind(cursor)
        .bind(page_offset as i64)
        .bind(fetched_delta as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query(
            "SELECT partition_key, pagination_cursor, page_offset, fetched_count, updated_at \
             FROM crawl_checkpoints ORDER BY partition_key",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(checkpoint_from_row).collect())
    }
}
