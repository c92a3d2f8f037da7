//! Planner, crawler and orchestrator driven through the library API.
//!
//! The remote search API is replaced by [`ScriptedSearch`], which serves
//! pre-built pages keyed by `(created range, cursor)` and answers one-result
//! count probes from a table. Waits go to a [`RecordingSleeper`].

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

use repo_harvester::config::Config;
use repo_harvester::crawl::{CrawlSettings, PartitionCrawler, Sleeper, WaitReason};
use repo_harvester::db;
use repo_harvester::error::HarvestError;
use repo_harvester::harvest::harvest;
use repo_harvester::migrate;
use repo_harvester::models::{Checkpoint, DateRange, Partition};
use repo_harvester::planner::{PartitionPlanner, SearchFilter};
use repo_harvester::progress::NoProgress;
use repo_harvester::search::{
    RateLimitSnapshot, RawOwner, RawRepoNode, SearchBackend, SearchOutcome, SearchPage,
};
use repo_harvester::store::memory::InMemoryStore;
use repo_harvester::store::sqlite::SqliteStore;
use repo_harvester::store::{CheckpointStore, RepoStore};

// ─── Scripted search backend ────────────────────────────────────────

#[derive(Default)]
struct ScriptedSearch {
    counts: HashMap<String, u64>,
    pages: HashMap<(String, Option<String>), SearchPage>,
    interjections: Mutex<VecDeque<SearchOutcome>>,
    page_requests: Mutex<Vec<(String, Option<String>)>>,
}

fn created_range(query: &str) -> String {
    query.rsplit("created:").next().unwrap_or_default().to_string()
}

fn node(id: u64) -> RawRepoNode {
    RawRepoNode {
        id: Some(format!("R_{}", id)),
        database_id: Some(id as i64),
        name: Some(format!("repo-{}", id)),
        owner: Some(RawOwner {
            login: Some("octo".to_string()),
        }),
        url: Some(format!("https://github.com/octo/repo-{}", id)),
        stargazer_count: Some(id * 3),
        fork_count: Some(id % 7),
        created_at: Some("2024-01-01T10:00:00Z".to_string()),
        ..Default::default()
    }
}

fn healthy_budget() -> Option<RateLimitSnapshot> {
    Some(RateLimitSnapshot {
        remaining: 4000,
        reset_at: Utc::now() + chrono::Duration::minutes(30),
    })
}

impl ScriptedSearch {
    /// Serve `ids` for the `created` range in pages of `page_size`,
    /// chaining cursors `"{created}#1"`, `"{created}#2"`, ...
    fn add_partition(&mut self, created: &str, ids: Vec<u64>, page_size: usize) {
        self.counts.insert(created.to_string(), ids.len() as u64);

        let chunks: Vec<&[u64]> = ids.chunks(page_size).collect();
        let mut cursor: Option<String> = None;
        for (i, chunk) in chunks.iter().enumerate() {
            let has_next = i + 1 < chunks.len();
            let next = has_next.then(|| format!("{}#{}", created, i + 1));
            self.pages.insert(
                (created.to_string(), cursor.clone()),
                SearchPage {
                    repository_count: ids.len() as u64,
                    has_next_page: has_next,
                    end_cursor: next.clone(),
                    nodes: chunk.iter().copied().map(node).collect(),
                    rate_limit: healthy_budget(),
                },
            );
            cursor = next;
        }
    }

    fn set_count(&mut self, created: &str, count: u64) {
        self.counts.insert(created.to_string(), count);
    }

    fn interject(&self, outcome: SearchOutcome) {
        self.interjections.lock().unwrap().push_back(outcome);
    }

    fn requested_cursors(&self) -> Vec<Option<String>> {
        self.page_requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, c)| c.clone())
            .collect()
    }

    fn probed(&self, created: &str) -> bool {
        self.page_requests
            .lock()
            .unwrap()
            .iter()
            .any(|(range, _)| range == created)
    }
}

#[async_trait]
impl SearchBackend for ScriptedSearch {
    async fn search(
        &self,
        query: &str,
        cursor: Option<&str>,
        first: u32,
    ) -> Result<SearchOutcome> {
        let created = created_range(query);
        self.page_requests
            .lock()
            .unwrap()
            .push((created.clone(), cursor.map(str::to_string)));

        if first == 1 && cursor.is_none() {
            return Ok(SearchOutcome::Page(SearchPage {
                repository_count: self.counts.get(&created).copied().unwrap_or(0),
                rate_limit: healthy_budget(),
                ..Default::default()
            }));
        }

        if let Some(outcome) = self.interjections.lock().unwrap().pop_front() {
            return Ok(outcome);
        }

        self.pages
            .get(&(created.clone(), cursor.map(str::to_string)))
            .cloned()
            .map(SearchOutcome::Page)
            .ok_or_else(|| anyhow!("no scripted page for {} at {:?}", created, cursor))
    }
}

// ─── Test doubles for waits and checkpoints ─────────────────────────

#[derive(Default)]
struct RecordingSleeper {
    waits: Mutex<Vec<(WaitReason, Duration)>>,
}

impl RecordingSleeper {
    fn waits_for(&self, reason: WaitReason) -> Vec<Duration> {
        self.waits
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| *r == reason)
            .map(|(_, d)| *d)
            .collect()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, reason: WaitReason, duration: Duration) {
        self.waits.lock().unwrap().push((reason, duration));
    }
}

/// Records the cumulative count after every save; can fail the Nth save
/// to simulate a crash between storage flush and checkpoint write.
struct RecordingCheckpoints<'a, S: CheckpointStore> {
    inner: &'a S,
    fail_on_save: Option<usize>,
    saves: AtomicUsize,
    history: Mutex<Vec<Checkpoint>>,
}

impl<'a, S: CheckpointStore> RecordingCheckpoints<'a, S> {
    fn new(inner: &'a S) -> Self {
        Self {
            inner,
            fail_on_save: None,
            saves: AtomicUsize::new(0),
            history: Mutex::new(Vec::new()),
        }
    }

    fn failing_on(inner: &'a S, save_number: usize) -> Self {
        Self {
            fail_on_save: Some(save_number),
            ..Self::new(inner)
        }
    }

    fn cumulative_counts(&self) -> Vec<u64> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.fetched_count)
            .collect()
    }
}

#[async_trait]
impl<'a, S: CheckpointStore> CheckpointStore for RecordingCheckpoints<'a, S> {
    async fn get(&self, partition_key: &str) -> Result<Checkpoint> {
        self.inner.get(partition_key).await
    }

    async fn save(
        &self,
        partition_key: &str,
        cursor: Option<&str>,
        page_offset: u64,
        fetched_delta: u64,
    ) -> Result<()> {
        let n = self.saves.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_on_save == Some(n) {
            bail!("simulated crash before checkpoint write");
        }
        self.inner
            .save(partition_key, cursor, page_offset, fetched_delta)
            .await?;
        let snapshot = self.inner.get(partition_key).await?;
        self.history.lock().unwrap().push(snapshot);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Checkpoint>> {
        self.inner.list().await
    }
}

// ─── Helpers ────────────────────────────────────────────────────────

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn settings(page_size: u32) -> CrawlSettings {
    CrawlSettings {
        page_size,
        batch_size: 50,
        low_water_mark: 10,
        polite_delay: Duration::from_millis(500),
        rejected_delay: Duration::from_secs(10),
        max_rejected_retries: 3,
    }
}

fn filter() -> SearchFilter {
    SearchFilter {
        min_stars: 0,
        language: Some("Python".to_string()),
    }
}

fn partition(start: &str, end: &str, target: u64) -> Partition {
    let range = DateRange::new(date(start), date(end));
    Partition {
        partition_key: filter().partition_key(&range),
        query_expression: filter().query_for(&range),
        range,
        expected_count: target,
        target_fetch_count: target,
    }
}

async fn sqlite_store(tmp: &TempDir) -> SqliteStore {
    let mut config = Config::minimal();
    config.db.path = tmp.path().join("data/harvest.sqlite");
    let pool = db::connect(&config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    SqliteStore::new(pool)
}

// ─── Crawler ────────────────────────────────────────────────────────

#[tokio::test]
async fn three_pages_flush_three_batches_with_cumulative_checkpoints() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;

    let mut backend = ScriptedSearch::default();
    backend.add_partition("2024-01-01..2024-01-07", (1..=120).collect(), 50);

    let checkpoints = RecordingCheckpoints::new(&store);
    let sleeper = RecordingSleeper::default();
    let crawler = PartitionCrawler::new(
        &backend,
        &store,
        &checkpoints,
        &sleeper,
        &NoProgress,
        settings(50),
    );

    let part = partition("2024-01-01", "2024-01-07", 120);
    let fetched = crawler.crawl(&part).await.unwrap();

    assert_eq!(fetched, 120);
    assert_eq!(checkpoints.cumulative_counts(), vec![50, 100, 120]);

    let repos = store.all_repositories().await.unwrap();
    assert_eq!(repos.len(), 120);
    assert_eq!(store.star_history("120").await.unwrap().len(), 1);

    let cp = store.get(&part.partition_key).await.unwrap();
    assert_eq!(cp.fetched_count, 120);
    assert_eq!(cp.pagination_cursor.as_deref(), Some("2024-01-01..2024-01-07#2"));
    assert_eq!(cp.page_offset, 20);

    // two polite pauses between three pages, no rate-limit waits
    assert_eq!(sleeper.waits_for(WaitReason::Politeness).len(), 2);
    assert!(sleeper.waits_for(WaitReason::RateLimit).is_empty());
}

#[tokio::test]
async fn resume_skips_records_already_counted() {
    let store = InMemoryStore::new();
    let mut backend = ScriptedSearch::default();
    backend.add_partition("2024-01-01..2024-01-07", (1..=150).collect(), 100);
    let part = partition("2024-01-01", "2024-01-07", 120);
    let sleeper = RecordingSleeper::default();

    // First run: the second batch reaches storage, its checkpoint never does.
    {
        let crashing = RecordingCheckpoints::failing_on(&store, 2);
        let crawler = PartitionCrawler::new(
            &backend,
            &store,
            &crashing,
            &sleeper,
            &NoProgress,
            settings(100),
        );
        assert!(crawler.crawl(&part).await.is_err());
    }

    let cp = store.get(&part.partition_key).await.unwrap();
    assert_eq!(cp.fetched_count, 50);
    assert_eq!(cp.pagination_cursor, None);
    assert_eq!(cp.page_offset, 50);
    assert_eq!(store.repository_count(), 100);
    assert_eq!(store.history_count(), 100);

    // Second run resumes mid-page and fetches only target - F more.
    let checkpoints = RecordingCheckpoints::new(&store);
    let crawler = PartitionCrawler::new(
        &backend,
        &store,
        &checkpoints,
        &sleeper,
        &NoProgress,
        settings(100),
    );
    let fetched = crawler.crawl(&part).await.unwrap();

    assert_eq!(fetched, 120);
    assert_eq!(checkpoints.cumulative_counts(), vec![100, 120]);
    assert_eq!(store.repository_count(), 120);

    // records 1..=50 were counted before the crash and are not replayed
    assert_eq!(store.star_history("1").await.unwrap().len(), 1);
    // records 51..=100 were flushed but not checkpointed: replayed, new samples appended
    assert_eq!(store.star_history("75").await.unwrap().len(), 2);
    assert_eq!(store.history_count(), 100 + 70);
}

#[tokio::test]
async fn completed_partition_makes_no_requests() {
    let store = InMemoryStore::new();
    store.save("2024-01-01_2024-01-07_stars>0_Python", Some("c9"), 0, 300).await.unwrap();

    let backend = ScriptedSearch::default();
    let sleeper = RecordingSleeper::default();
    let crawler = PartitionCrawler::new(
        &backend,
        &store,
        &store,
        &sleeper,
        &NoProgress,
        settings(100),
    );

    let fetched = crawler
        .crawl(&partition("2024-01-01", "2024-01-07", 250))
        .await
        .unwrap();
    assert_eq!(fetched, 300);
    assert!(backend.requested_cursors().is_empty());
}

#[tokio::test]
async fn low_budget_sleeps_until_reset_and_retries_same_page() {
    let store = InMemoryStore::new();
    let mut backend = ScriptedSearch::default();
    backend.add_partition("2024-01-01..2024-01-07", (1..=40).collect(), 100);
    backend.interject(SearchOutcome::Page(SearchPage {
        repository_count: 40,
        has_next_page: false,
        nodes: (900..=939).map(node).collect(),
        rate_limit: Some(RateLimitSnapshot {
            remaining: 3,
            reset_at: Utc::now() + chrono::Duration::seconds(120),
        }),
        ..Default::default()
    }));

    let sleeper = RecordingSleeper::default();
    let crawler = PartitionCrawler::new(
        &backend,
        &store,
        &store,
        &sleeper,
        &NoProgress,
        settings(100),
    );
    let fetched = crawler
        .crawl(&partition("2024-01-01", "2024-01-07", 40))
        .await
        .unwrap();

    assert_eq!(fetched, 40);
    let waits = sleeper.waits_for(WaitReason::RateLimit);
    assert_eq!(waits.len(), 1);
    assert!(waits[0] >= Duration::from_secs(120));
    assert!(waits[0] <= Duration::from_secs(126));

    // the throttled page was discarded and requested again
    assert_eq!(backend.requested_cursors(), vec![None, None]);
    assert!(store.star_history("900").await.unwrap().is_empty());
    assert_eq!(store.repository_count(), 40);
}

#[tokio::test]
async fn healthy_budget_never_sleeps_for_rate_limit() {
    let store = InMemoryStore::new();
    let mut backend = ScriptedSearch::default();
    backend.add_partition("2024-01-01..2024-01-07", (1..=250).collect(), 100);

    let sleeper = RecordingSleeper::default();
    let crawler = PartitionCrawler::new(
        &backend,
        &store,
        &store,
        &sleeper,
        &NoProgress,
        settings(100),
    );
    crawler
        .crawl(&partition("2024-01-01", "2024-01-07", 1000))
        .await
        .unwrap();

    assert!(sleeper.waits_for(WaitReason::RateLimit).is_empty());
    assert_eq!(store.repository_count(), 250);
}

#[tokio::test]
async fn rejected_page_is_retried_then_recovers() {
    let store = InMemoryStore::new();
    let mut backend = ScriptedSearch::default();
    backend.add_partition("2024-01-01..2024-01-07", (1..=10).collect(), 100);
    backend.interject(SearchOutcome::Rejected(vec!["timeout".to_string()]));
    backend.interject(SearchOutcome::Rejected(vec!["timeout".to_string()]));

    let sleeper = RecordingSleeper::default();
    let crawler = PartitionCrawler::new(
        &backend,
        &store,
        &store,
        &sleeper,
        &NoProgress,
        settings(100),
    );
    let fetched = crawler
        .crawl(&partition("2024-01-01", "2024-01-07", 10))
        .await
        .unwrap();

    assert_eq!(fetched, 10);
    assert_eq!(
        sleeper.waits_for(WaitReason::Rejected),
        vec![Duration::from_secs(10), Duration::from_secs(10)]
    );
    assert_eq!(backend.requested_cursors(), vec![None, None, None]);
}

#[tokio::test]
async fn persistent_rejection_is_fatal_after_bound() {
    let store = InMemoryStore::new();
    let backend = ScriptedSearch::default();
    for _ in 0..10 {
        backend.interject(SearchOutcome::Rejected(vec![
            "Invalid search query".to_string(),
        ]));
    }

    let sleeper = RecordingSleeper::default();
    let crawler = PartitionCrawler::new(
        &backend,
        &store,
        &store,
        &sleeper,
        &NoProgress,
        settings(100),
    );
    let err = crawler
        .crawl(&partition("2024-01-01", "2024-01-07", 10))
        .await
        .unwrap_err();

    match err.downcast_ref::<HarvestError>() {
        Some(HarvestError::QueryRejected {
            partition,
            attempts,
            messages,
        }) => {
            assert_eq!(partition, "2024-01-01_2024-01-07_stars>0_Python");
            assert_eq!(*attempts, 4);
            assert_eq!(messages[0], "Invalid search query");
        }
        other => panic!("expected QueryRejected, got {:?}", other),
    }
    assert_eq!(sleeper.waits_for(WaitReason::Rejected).len(), 3);
    assert_eq!(store.repository_count(), 0);
}

#[tokio::test]
async fn target_reached_mid_page_still_flushes_partial_batch() {
    let store = InMemoryStore::new();
    let mut backend = ScriptedSearch::default();
    backend.add_partition("2024-01-01..2024-01-07", (1..=300).collect(), 100);

    let sleeper = RecordingSleeper::default();
    let crawler = PartitionCrawler::new(
        &backend,
        &store,
        &store,
        &sleeper,
        &NoProgress,
        settings(100),
    );
    let fetched = crawler
        .crawl(&partition("2024-01-01", "2024-01-07", 130))
        .await
        .unwrap();

    assert_eq!(fetched, 130);
    assert_eq!(store.repository_count(), 130);
    let cp = store.get("2024-01-01_2024-01-07_stars>0_Python").await.unwrap();
    assert_eq!(cp.fetched_count, 130);
    assert_eq!(cp.page_offset, 30);
}

// ─── Orchestrator ───────────────────────────────────────────────────

#[tokio::test]
async fn harvest_stops_at_global_target() {
    let tmp = TempDir::new().unwrap();
    let store = sqlite_store(&tmp).await;

    let mut backend = ScriptedSearch::default();
    backend.add_partition("2024-01-01..2024-01-07", (1..=30).collect(), 100);
    backend.set_count("2024-01-08..2024-01-14", 2000);
    backend.add_partition("2024-01-08..2024-01-08", (1001..=1040).collect(), 100);
    backend.add_partition("2024-01-09..2024-01-15", (2001..=2025).collect(), 100);

    let sleeper = RecordingSleeper::default();
    let crawler = PartitionCrawler::new(
        &backend,
        &store,
        &store,
        &sleeper,
        &NoProgress,
        settings(100),
    );
    let range = DateRange::new(date("2024-01-01"), date("2024-01-21"));
    let mut planner = PartitionPlanner::new(&backend, filter(), range, 1000, 7);

    let summary = harvest(&mut planner, &crawler, 80, &NoProgress).await.unwrap();

    assert_eq!(summary.partitions, 3);
    assert_eq!(summary.collected, 80);
    assert_eq!(store.all_repositories().await.unwrap().len(), 80);
    assert!(!backend.probed("2024-01-16..2024-01-21"));

    let keys: Vec<String> = store
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.partition_key)
        .collect();
    assert_eq!(
        keys,
        vec![
            "2024-01-01_2024-01-07_stars>0_Python",
            "2024-01-08_2024-01-08_stars>0_Python",
            "2024-01-09_2024-01-15_stars>0_Python"
        ]
    );
}

#[tokio::test]
async fn harvest_rerun_resumes_without_recounting() {
    let store = InMemoryStore::new();
    let mut backend = ScriptedSearch::default();
    backend.add_partition("2024-02-01..2024-02-07", (1..=60).collect(), 100);
    backend.add_partition("2024-02-08..2024-02-10", (101..=120).collect(), 100);

    let sleeper = RecordingSleeper::default();
    let crawler = PartitionCrawler::new(
        &backend,
        &store,
        &store,
        &sleeper,
        &NoProgress,
        settings(100),
    );
    let range = DateRange::new(date("2024-02-01"), date("2024-02-10"));

    let mut planner = PartitionPlanner::new(&backend, filter(), range, 1000, 7);
    let first = harvest(&mut planner, &crawler, 1000, &NoProgress).await.unwrap();
    assert_eq!(first.collected, 80);
    assert!(planner.is_exhausted());

    let history_after_first = store.history_count();
    let mut planner = PartitionPlanner::new(&backend, filter(), range, 1000, 7);
    let second = harvest(&mut planner, &crawler, 1000, &NoProgress).await.unwrap();

    assert_eq!(second.collected, 80);
    assert_eq!(store.history_count(), history_after_first);
    assert_eq!(store.repository_count(), 80);
}

#[tokio::test]
async fn changing_the_filter_starts_a_fresh_checkpoint() {
    let store = InMemoryStore::new();
    let sleeper = RecordingSleeper::default();
    let range = DateRange::new(date("2024-01-01"), date("2024-01-07"));

    let mut python = ScriptedSearch::default();
    python.add_partition("2024-01-01..2024-01-07", (1..=40).collect(), 100);
    let crawler = PartitionCrawler::new(
        &python,
        &store,
        &store,
        &sleeper,
        &NoProgress,
        settings(100),
    );
    let mut planner = PartitionPlanner::new(&python, filter(), range, 1000, 7);
    let first = harvest(&mut planner, &crawler, 1000, &NoProgress).await.unwrap();
    assert_eq!(first.collected, 40);

    let mut rust = ScriptedSearch::default();
    rust.add_partition("2024-01-01..2024-01-07", (501..=530).collect(), 100);
    let rust_filter = SearchFilter {
        min_stars: 0,
        language: Some("Rust".to_string()),
    };
    let crawler = PartitionCrawler::new(
        &rust,
        &store,
        &store,
        &sleeper,
        &NoProgress,
        settings(100),
    );
    let mut planner = PartitionPlanner::new(&rust, rust_filter, range, 1000, 7);
    let partition = planner.next_partition(1000).await.unwrap();
    assert_eq!(partition.partition_key, "2024-01-01_2024-01-07_stars>0_Rust");

    let fetched = crawler.crawl(&partition).await.unwrap();

    assert_eq!(fetched, 30);
    assert_eq!(rust.requested_cursors(), vec![None, None]);
    assert_eq!(store.repository_count(), 70);

    let checkpoints: Vec<(String, u64)> = store
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|c| (c.partition_key, c.fetched_count))
        .collect();
    assert_eq!(
        checkpoints,
        vec![
            ("2024-01-01_2024-01-07_stars>0_Python".to_string(), 40),
            ("2024-01-01_2024-01-07_stars>0_Rust".to_string(), 30),
        ]
    );
}
