//! Crawl progress overview.
//!
//! Prints entity and history totals plus one line per partition checkpoint,
//! so operators can see how far an interrupted run got before resuming it.

use anyhow::Result;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::store::sqlite::SqliteStore;
use crate::store::CheckpointStore;

pub async fn run_status(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;

    let repositories: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM repositories")
        .fetch_one(&pool)
        .await?;
    let samples: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM stars_history")
        .fetch_one(&pool)
        .await?;

    let store = SqliteStore::new(pool);
    let checkpoints = store.list().await?;
    let fetched_total: u64 = checkpoints.iter().map(|c| c.fetched_count).sum();

    println!("  Database:      {}", config.db.path.display());
    println!("  Repositories:  {}", repositories);
    println!("  Star samples:  {}", samples);
    println!("  Partitions:    {}", checkpoints.len());
    println!("  Fetched:       {}", fetched_total);

    if !checkpoints.is_empty() {
        println!();
        println!(
            "{:<40} {:>8} {:>8} {:<7} UPDATED",
            "PARTITION", "FETCHED", "OFFSET", "CURSOR"
        );
        for cp in &checkpoints {
            let updated = cp
                .updated_at
                .and_then(|ts| chrono::DateTime::from_timestamp(ts, 0))
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{:<40} {:>8} {:>8} {:<7} {}",
                cp.partition_key,
                cp.fetched_count,
                cp.page_offset,
                if cp.pagination_cursor.is_some() { "yes" } else { "start" },
                updated
            );
        }
    }

    store.pool().close().await;
    Ok(())
}
