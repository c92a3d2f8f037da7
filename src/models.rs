//! Core data models used throughout the harvester.
//!
//! These types represent the repository records, star observations,
//! partitions and checkpoints that flow through the crawl pipeline.

use chrono::{DateTime, NaiveDate, Utc};

/// Canonical repository record persisted to the `repositories` table.
///
/// `entity_id` is the source-assigned key; re-fetching the same remote object
/// updates the mutable fields in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Repository {
    pub entity_id: String,
    pub name: String,
    pub owner_login: String,
    pub full_name: String,
    pub url: String,
    pub star_count: u64,
    pub fork_count: u64,
    pub primary_language: Option<String>,
    pub description: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

/// One append-only observation of a repository's star count.
#[derive(Debug, Clone, PartialEq)]
pub struct StarSample {
    pub entity_id: String,
    pub star_count: u64,
    pub observed_at: i64,
}

/// An inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Number of days covered, both ends included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// A bounded slice of the search space, crawled with its own checkpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub partition_key: String,
    pub query_expression: String,
    pub range: DateRange,
    /// Match count reported by the probe (or the fallback estimate).
    pub expected_count: u64,
    pub target_fetch_count: u64,
}

/// Durable resume state for one partition.
///
/// `pagination_cursor` is the cursor that fetched the page holding the last
/// flushed record (`None` is the first page); `page_offset` is how many
/// records of that page were already flushed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkpoint {
    pub partition_key: String,
    pub pagination_cursor: Option<String>,
    pub page_offset: u64,
    pub fetched_count: u64,
    pub updated_at: Option<i64>,
}
