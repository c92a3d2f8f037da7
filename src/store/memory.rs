//! In-memory [`RepoStore`] / [`CheckpointStore`] for tests.
//!
//! Uses `HashMap`/`BTreeMap` and `Vec` behind `std::sync::RwLock`, with the
//! same upsert and cumulative-counter semantics as the SQLite store.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;

use crate::models::{Checkpoint, Repository, StarSample};

use super::{CheckpointStore, RepoStore, StoredRepository};

pub struct InMemoryStore {
    repos: RwLock<HashMap<String, StoredRepository>>,
    history: RwLock<Vec<StarSample>>,
    checkpoints: RwLock<BTreeMap<String, Checkpoint>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            repos: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
            checkpoints: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of stored repositories. Test helper.
    pub fn repository_count(&self) -> usize {
        self.repos.read().unwrap().len()
    }

    /// Number of star samples across all repositories. Test helper.
    pub fn history_count(&self) -> usize {
        self.history.read().unwrap().len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RepoStore for InMemoryStore {
    async fn bulk_upsert(&self, repos: &[Repository]) -> Result<()> {
        if repos.is_empty() {
            return Ok(());
        }
        let now = Utc::now().timestamp();
        let mut stored = self.repos.write().unwrap();
        let mut history = self.history.write().unwrap();

        for repo in repos {
            match stored.get_mut(&repo.entity_id) {
                Some(existing) => {
                    let current = &mut existing.repository;
                    current.star_count = repo.star_count;
                    current.fork_count = repo.fork_count;
                    current.primary_language = repo.primary_language.clone();
                    current.description = repo.description.clone();
                    existing.updated_at = now;
                }
                None => {
                    stored.insert(
                        repo.entity_id.clone(),
                        StoredRepository {
                            repository: repo.clone(),
                            updated_at: now,
                        },
                    );
                }
            }
            history.push(StarSample {
                entity_id: repo.entity_id.clone(),
                star_count: repo.star_count,
                observed_at: now,
            });
        }
        Ok(())
    }

    async fn all_repositories(&self) -> Result<Vec<StoredRepository>> {
        let mut rows: Vec<StoredRepository> = self.repos.read().unwrap().values().cloned().collect();
        rows.sort_by(|a, b| a.repository.entity_id.cmp(&b.repository.entity_id));
        Ok(rows)
    }

    async fn star_history(&self, entity_id: &str) -> Result<Vec<StarSample>> {
        Ok(self
            .history
            .read()
            .unwrap()
            .iter()
            .filter(|s| s.entity_id == entity_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStore {
    async fn get(&self, partition_key: &str) -> Result<Checkpoint> {
        Ok(self
            .checkpoints
            .read()
            .unwrap()
            .get(partition_key)
            .cloned()
            .unwrap_or_else(|| Checkpoint {
                partition_key: partition_key.to_string(),
                ..Default::default()
            }))
    }

    async fn save(
        &self,
        partition_key: &str,
        cursor: Option<&str>,
        page_offset: u64,
        fetched_delta: u64,
    ) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().unwrap();
        let entry = checkpoints
            .entry(partition_key.to_string())
            .or_insert_with(|| Checkpoint {
                partition_key: partition_key.to_string(),
                ..Default::default()
            });
        entry.pagination_cursor = cursor.map(str::to_string);
        entry.page_offset = page_offset;
        entry.fetched_count += fetched_delta;
        entry.updated_at = Some(Utc::now().timestamp());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        Ok(self.checkpoints.read().unwrap().values().cloned().collect())
    }
}
