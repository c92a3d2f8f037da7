//! Crawl orchestration.
//!
//! Drives planner → crawler until the global target is collected or the
//! date range is exhausted, then exports the repository table.
//!
//! Partitions are planned one at a time so each partition's
//! `target_fetch_count` reflects what is still missing from the global
//! target. Partitions run strictly in sequence.

use anyhow::{bail, Result};
use std::path::Path;
use tracing::info;

use crate::client::GraphQlClient;
use crate::config::Config;
use crate::crawl::{CrawlSettings, PartitionCrawler, TokioSleeper};
use crate::db;
use crate::migrate;
use crate::planner::{PartitionPlanner, SearchFilter};
use crate::progress::{CrawlProgressEvent, CrawlProgressReporter, ProgressMode};
use crate::search::GithubSearch;
use crate::store::sqlite::SqliteStore;
use crate::store::RepoStore;

/// Totals for one crawl run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HarvestSummary {
    pub partitions: u64,
    pub collected: u64,
}

/// Crawl partitions until `global_target` records are collected or the
/// planner runs out of range.
pub async fn harvest(
    planner: &mut PartitionPlanner<'_>,
    crawler: &PartitionCrawler<'_>,
    global_target: u64,
    progress: &dyn CrawlProgressReporter,
) -> Result<HarvestSummary> {
    let mut summary = HarvestSummary::default();

    while summary.collected < global_target {
        let remaining = global_target - summary.collected;
        let Some(partition) = planner.next_partition(remaining).await else {
            break;
        };

        let fetched = crawler.crawl(&partition).await?;
        summary.partitions += 1;
        summary.collected += fetched;

        info!(
            partition = %partition.partition_key,
            fetched,
            collected = summary.collected,
            global_target,
            "partition complete"
        );
        progress.report(CrawlProgressEvent::PartitionDone {
            partition: partition.partition_key.clone(),
            fetched,
            collected: summary.collected,
            global_target,
        });
    }

    Ok(summary)
}

/// Options for `harvest crawl` beyond the config file.
#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub export: bool,
    pub progress: ProgressMode,
}

/// `harvest crawl`: run the partitioned crawl against the configured
/// endpoint and database, then export CSV.
pub async fn run_crawl(config: &Config, options: &CrawlOptions) -> Result<()> {
    if config.github.token.is_none() {
        bail!("GITHUB_TOKEN is not set; the search API requires an auth token");
    }

    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store = SqliteStore::new(pool);

    let backend = GithubSearch::new(GraphQlClient::new(&config.github)?);
    let sleeper = TokioSleeper;
    let reporter = options.progress.reporter();

    let range = config.crawl_range();
    let filter = SearchFilter {
        min_stars: config.crawl.min_stars,
        language: config.crawl.language.clone(),
    };
    let global_target = config.crawl.target;

    info!(
        since = %range.start,
        until = %range.end,
        global_target,
        "starting crawl"
    );

    let mut planner = PartitionPlanner::new(
        &backend,
        filter,
        range,
        config.crawl.ceiling,
        config.crawl.window_days,
    );
    let crawler = PartitionCrawler::new(
        &backend,
        &store,
        &store,
        &sleeper,
        reporter.as_ref(),
        CrawlSettings::from(&config.crawl),
    );

    let summary = harvest(&mut planner, &crawler, global_target, reporter.as_ref()).await?;

    println!("crawl {}..{}", range.start, range.end);
    println!("  partitions: {}", summary.partitions);
    println!("  collected: {} / {}", summary.collected, global_target);

    if options.export {
        let path: &Path = config.export.path.as_path();
        let exported = store.export_all(path).await?;
        println!("  exported: {} rows to {}", exported, path.display());
    }
    println!("ok");

    store.pool().close().await;
    Ok(())
}
