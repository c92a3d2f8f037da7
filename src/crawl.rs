//! Partition crawling.
//!
//! [`PartitionCrawler::crawl`] paginates one [`Partition`] to completion (or
//! to its `target_fetch_count`) and is safe to re-run after a crash:
//!
//! ```text
//! load checkpoint ─▶ request page ─┬─ rejected ──▶ wait, same page (bounded)
//!        ▲                         ├─ budget low ─▶ wait for reset, same page
//!        │                         └─ ok ─▶ parse nodes ─▶ batch full? ─▶ upsert ─▶ checkpoint
//!        └──────────── polite delay ◀── next page? ◀──────────────────────────┘
//! ```
//!
//! # Checkpoint semantics
//!
//! A checkpoint names the cursor of the page holding the last flushed record
//! plus `page_offset`, the number of that page's records already flushed.
//! Resuming re-requests that page and skips `page_offset` nodes, so records
//! counted in `fetched_count` are never counted twice. Storage is always
//! written before the checkpoint; unflushed records are refetched on resume.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::CrawlConfig;
use crate::error::HarvestError;
use crate::models::{Partition, Repository};
use crate::progress::{CrawlProgressEvent, CrawlProgressReporter};
use crate::search::{parse_repo_node, RateLimitSnapshot, SearchBackend, SearchOutcome};
use crate::store::{CheckpointStore, RepoStore};

/// Minimum rate-limit cooldown, also added on top of the time to reset.
const RATE_LIMIT_PADDING_SECS: f64 = 5.0;

/// Why the crawler is pausing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    RateLimit,
    Rejected,
    Politeness,
}

/// Suspension seam, so tests can observe waits instead of sleeping.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, reason: WaitReason, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, _reason: WaitReason, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// How long to wait before retrying a page, if the budget is below
/// `low_water_mark`: `max(5, seconds_until_reset + 5)`.
pub fn rate_limit_wait(
    snapshot: &RateLimitSnapshot,
    low_water_mark: i64,
    now: DateTime<Utc>,
) -> Option<Duration> {
    if snapshot.remaining >= low_water_mark {
        return None;
    }
    let until_reset = (snapshot.reset_at - now).num_milliseconds() as f64 / 1000.0;
    let secs = (until_reset + RATE_LIMIT_PADDING_SECS).max(RATE_LIMIT_PADDING_SECS);
    Some(Duration::from_secs_f64(secs))
}

#[derive(Debug, Clone)]
pub struct CrawlSettings {
    pub page_size: u32,
    pub batch_size: usize,
    pub low_water_mark: i64,
    pub polite_delay: Duration,
    pub rejected_delay: Duration,
    pub max_rejected_retries: u32,
}

impl From<&CrawlConfig> for CrawlSettings {
    fn from(config: &CrawlConfig) -> Self {
        Self {
            page_size: config.page_size,
            batch_size: config.batch_size.max(1),
            low_water_mark: config.low_water_mark,
            polite_delay: Duration::from_millis(config.polite_delay_ms),
            rejected_delay: Duration::from_secs(config.rejected_delay_secs),
            max_rejected_retries: config.max_rejected_retries,
        }
    }
}

/// Position of the last consumed record: page cursor + records consumed on it.
#[derive(Debug, Clone, Default)]
struct PagePosition {
    cursor: Option<String>,
    offset: u64,
}

pub struct PartitionCrawler<'a> {
    backend: &'a dyn SearchBackend,
    repos: &'a dyn RepoStore,
    checkpoints: &'a dyn CheckpointStore,
    sleeper: &'a dyn Sleeper,
    progress: &'a dyn CrawlProgressReporter,
    settings: CrawlSettings,
}

impl<'a> PartitionCrawler<'a> {
    pub fn new(
        backend: &'a dyn SearchBackend,
        repos: &'a dyn RepoStore,
        checkpoints: &'a dyn CheckpointStore,
        sleeper: &'a dyn Sleeper,
        progress: &'a dyn CrawlProgressReporter,
        settings: CrawlSettings,
    ) -> Self {
        Self {
            backend,
            repos,
            checkpoints,
            sleeper,
            progress,
            settings,
        }
    }

    /// Crawl `partition`, resuming from its checkpoint.
    ///
    /// Returns the partition's cumulative fetched count (including records
    /// fetched by earlier, interrupted runs).
    pub async fn crawl(&self, partition: &Partition) -> Result<u64> {
        let key = partition.partition_key.as_str();
        let target = partition.target_fetch_count;

        let checkpoint = self.checkpoints.get(key).await?;
        let mut cursor = checkpoint.pagination_cursor;
        let mut skip = checkpoint.page_offset;
        let mut fetched = checkpoint.fetched_count;

        if fetched >= target {
            debug!(partition = key, fetched, target, "partition already complete");
            return Ok(fetched);
        }

        info!(
            partition = key,
            resumed_from = fetched,
            target,
            "start partition"
        );
        self.progress.report(CrawlProgressEvent::PartitionStarted {
            partition: key.to_string(),
            resumed_from: fetched,
            target,
        });

        let mut batch: Vec<Repository> = Vec::with_capacity(self.settings.batch_size);
        let mut position = PagePosition {
            cursor: cursor.clone(),
            offset: skip,
        };
        let mut rejections = 0u32;

        while fetched < target {
            let page = match self
                .backend
                .search(
                    &partition.query_expression,
                    cursor.as_deref(),
                    self.settings.page_size,
                )
                .await?
            {
                SearchOutcome::Page(page) => page,
                SearchOutcome::Rejected(messages) => {
                    rejections += 1;
                    if rejections > self.settings.max_rejected_retries {
                        return Err(HarvestError::QueryRejected {
                            partition: key.to_string(),
                            attempts: rejections,
                            messages,
                        }
                        .into());
                    }
                    warn!(
                        partition = key,
                        attempt = rejections,
                        errors = %messages.join("; "),
                        "query rejected, retrying page"
                    );
                    self.sleeper
                        .sleep(WaitReason::Rejected, self.settings.rejected_delay)
                        .await;
                    continue;
                }
            };
            rejections = 0;

            if let Some(snapshot) = &page.rate_limit {
                if let Some(wait) =
                    rate_limit_wait(snapshot, self.settings.low_water_mark, Utc::now())
                {
                    info!(
                        partition = key,
                        remaining = snapshot.remaining,
                        reset_at = %snapshot.reset_at,
                        wait_secs = wait.as_secs(),
                        "rate limit low, sleeping until reset"
                    );
                    self.progress.report(CrawlProgressEvent::RateLimited {
                        partition: key.to_string(),
                        wait_secs: wait.as_secs(),
                    });
                    self.sleeper.sleep(WaitReason::RateLimit, wait).await;
                    continue;
                }
            }

            position = PagePosition {
                cursor: cursor.clone(),
                offset: skip,
            };

            for node in page.nodes.iter().skip(skip as usize) {
                if fetched >= target {
                    break;
                }
                position.offset += 1;

                match parse_repo_node(node) {
                    Some(repo) => {
                        batch.push(repo);
                        fetched += 1;
                    }
                    None => {
                        warn!(partition = key, "skipping search node without an id");
                    }
                }

                if batch.len() >= self.settings.batch_size {
                    self.flush(key, &mut batch, &position, fetched, target)
                        .await?;
                }
            }
            skip = 0;

            if !page.has_next_page || fetched >= target {
                break;
            }
            match page.end_cursor {
                Some(next) => cursor = Some(next),
                None => {
                    warn!(partition = key, "page reported more results but no end cursor");
                    break;
                }
            }

            self.sleeper
                .sleep(WaitReason::Politeness, self.settings.polite_delay)
                .await;
        }

        self.flush(key, &mut batch, &position, fetched, target)
            .await?;

        info!(partition = key, fetched, "done partition");
        Ok(fetched)
    }

    /// Persist `batch`, then checkpoint it. No-op when empty.
    async fn flush(
        &self,
        key: &str,
        batch: &mut Vec<Repository>,
        position: &PagePosition,
        fetched: u64,
        target: u64,
    ) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        self.repos.bulk_upsert(batch).await?;
        self.checkpoints
            .save(
                key,
                position.cursor.as_deref(),
                position.offset,
                batch.len() as u64,
            )
            .await?;

        debug!(
            partition = key,
            rows = batch.len(),
            fetched,
            "upserted batch"
        );
        self.progress.report(CrawlProgressEvent::BatchFlushed {
            partition: key.to_string(),
            fetched,
            target,
        });

        batch.clear();
        Ok(())
    }
}
