//! Storage contracts for the crawl pipeline.
//!
//! Two traits split the single relational store by concern:
//!
//! | Trait | Tables | Purpose |
//! |-------|--------|---------|
//! | [`RepoStore`] | `repositories`, `stars_history` | Idempotent entity upsert, append-only history, export |
//! | [`CheckpointStore`] | `crawl_checkpoints` | Per-partition resume state |
//!
//! [`sqlite::SqliteStore`] implements both over sqlx; [`memory::InMemoryStore`]
//! implements both over `RwLock`ed collections for tests.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use crate::export;
use crate::models::{Checkpoint, Repository, StarSample};

/// A repository row as currently stored.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRepository {
    pub repository: Repository,
    pub updated_at: i64,
}

#[async_trait]
pub trait RepoStore: Send + Sync {
    /// Upsert `repos` by `entity_id` and append one star sample per repo,
    /// all in one unit of work. No-op for an empty slice.
    async fn bulk_upsert(&self, repos: &[Repository]) -> Result<()>;

    /// Every stored repository, ordered by `entity_id`.
    async fn all_repositories(&self) -> Result<Vec<StoredRepository>>;

    /// Star samples for one repository, oldest first.
    async fn star_history(&self, entity_id: &str) -> Result<Vec<StarSample>>;

    /// Write the full repository table to `destination` as CSV.
    ///
    /// Returns the number of rows written.
    async fn export_all(&self, destination: &Path) -> Result<u64> {
        let rows = self.all_repositories().await?;
        export::write_csv(&rows, destination)
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Resume state for `partition_key`; an empty checkpoint when none exists.
    async fn get(&self, partition_key: &str) -> Result<Checkpoint>;

    /// Record progress: overwrite cursor and page offset, *add*
    /// `fetched_delta` to the stored count.
    async fn save(
        &self,
        partition_key: &str,
        cursor: Option<&str>,
        page_offset: u64,
        fetched_delta: u64,
    ) -> Result<()>;

    /// All checkpoints, ordered by partition key.
    async fn list(&self) -> Result<Vec<Checkpoint>>;
}
