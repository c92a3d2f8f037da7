//! Export the repository table as CSV.
//!
//! Produces one header row followed by one row per repository, ordered by
//! `entity_id`. Timestamps are ISO-8601 UTC; missing optional fields are
//! empty cells.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::store::sqlite::SqliteStore;
use crate::store::{RepoStore, StoredRepository};

#[derive(Serialize)]
struct ExportRow<'a> {
    entity_id: &'a str,
    name: &'a str,
    owner_login: &'a str,
    full_name: &'a str,
    url: &'a str,
    star_count: u64,
    fork_count: u64,
    primary_language: Option<&'a str>,
    description: Option<&'a str>,
    created_at: Option<String>,
    updated_at: String,
}

impl<'a> From<&'a StoredRepository> for ExportRow<'a> {
    fn from(row: &'a StoredRepository) -> Self {
        let repo = &row.repository;
        Self {
            entity_id: &repo.entity_id,
            name: &repo.name,
            owner_login: &repo.owner_login,
            full_name: &repo.full_name,
            url: &repo.url,
            star_count: repo.star_count,
            fork_count: repo.fork_count,
            primary_language: repo.primary_language.as_deref(),
            description: repo.description.as_deref(),
            created_at: repo
                .created_at
                .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            updated_at: format_ts_iso(row.updated_at),
        }
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Write `rows` to `path` as CSV, creating parent directories.
///
/// Returns the number of data rows written.
pub fn write_csv(rows: &[StoredRepository], path: &Path) -> Result<u64> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create export file: {}", path.display()))?;

    if rows.is_empty() {
        // serde only emits headers alongside the first record
        writer.write_record([
            "entity_id",
            "name",
            "owner_login",
            "full_name",
            "url",
            "star_count",
            "fork_count",
            "primary_language",
            "description",
            "created_at",
            "updated_at",
        ])?;
    }

    for row in rows {
        writer.serialize(ExportRow::from(row))?;
    }
    writer.flush()?;

    Ok(rows.len() as u64)
}

/// `harvest export`: dump the repository table to `output`, or to the
/// configured export path.
pub async fn run_export(config: &Config, output: Option<&Path>) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let store = SqliteStore::new(pool);

    let path = output.unwrap_or(config.export.path.as_path());
    let count = store.export_all(path).await?;
    println!("Exported {} repositories to {}", count, path.display());

    store.pool().close().await;
    Ok(())
}
