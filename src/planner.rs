//! Partition planning.
//!
//! The search API stops paginating after a fixed number of results (the
//! *ceiling*), so a crawl over a long date range is split into `created:`
//! windows whose match counts stay under it:
//!
//! 1. Take a window of `window_days` (default 7) starting at the cursor date,
//!    clipped to the end of the range.
//! 2. Probe its exact match count with a one-result search.
//! 3. If the count exceeds the ceiling, shrink the window to its first day
//!    and probe again.
//! 4. Emit the window as a [`Partition`]; the next window starts the day after.
//!
//! Probe failures never abort planning: a failed first probe assumes the
//! ceiling as the count, a failed re-probe keeps `min(ceiling, count)`.

use anyhow::{anyhow, Result};
use chrono::{Duration, NaiveDate};
use tracing::{debug, warn};

use crate::models::{DateRange, Partition};
use crate::search::{SearchBackend, SearchOutcome};

/// Filter terms shared by every partition's query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    pub min_stars: u64,
    pub language: Option<String>,
}

impl SearchFilter {
    /// `stars:>N [language:L] created:START..END`
    pub fn query_for(&self, range: &DateRange) -> String {
        let mut query = format!("stars:>{}", self.min_stars);
        if let Some(language) = self.language.as_deref().filter(|l| !l.trim().is_empty()) {
            query.push_str(&format!(" language:{}", language.trim()));
        }
        query.push_str(&format!(
            " created:{}..{}",
            range.start.format("%Y-%m-%d"),
            range.end.format("%Y-%m-%d")
        ));
        query
    }

    /// Checkpoint key for a window: `START_END_stars>N[_LANGUAGE]`.
    ///
    /// The filter terms are part of the key so that crawls of the same
    /// dates with a different filter keep separate resume state.
    pub fn partition_key(&self, range: &DateRange) -> String {
        let mut key = format!(
            "{}_{}_stars>{}",
            range.start.format("%Y-%m-%d"),
            range.end.format("%Y-%m-%d"),
            self.min_stars
        );
        if let Some(language) = self.language.as_deref().filter(|l| !l.trim().is_empty()) {
            key.push('_');
            key.push_str(&language.split_whitespace().collect::<Vec<_>>().join("-"));
        }
        key
    }
}

/// Walks a [`DateRange`] window by window, probing counts lazily.
pub struct PartitionPlanner<'a> {
    backend: &'a dyn SearchBackend,
    filter: SearchFilter,
    range: DateRange,
    ceiling: u64,
    window_days: i64,
    next_start: NaiveDate,
}

impl<'a> PartitionPlanner<'a> {
    pub fn new(
        backend: &'a dyn SearchBackend,
        filter: SearchFilter,
        range: DateRange,
        ceiling: u64,
        window_days: i64,
    ) -> Self {
        Self {
            backend,
            filter,
            range,
            ceiling,
            window_days: window_days.max(1),
            next_start: range.start,
        }
    }

    /// True once every day of the range has been assigned to a partition.
    pub fn is_exhausted(&self) -> bool {
        self.next_start > self.range.end
    }

    /// Plan the next window. `remaining` bounds its `target_fetch_count`.
    pub async fn next_partition(&mut self, remaining: u64) -> Option<Partition> {
        if self.is_exhausted() {
            return None;
        }

        let start = self.next_start;
        let end = (start + Duration::days(self.window_days - 1)).min(self.range.end);
        let mut window = DateRange::new(start, end);

        let mut count = match self.probe(&window).await {
            Ok(count) => count,
            Err(e) => {
                warn!(
                    partition = %self.filter.partition_key(&window),
                    error = %e,
                    fallback = self.ceiling,
                    "failed to get partition count"
                );
                self.ceiling
            }
        };

        if count > self.ceiling && window.days() > 1 {
            debug!(
                partition = %self.filter.partition_key(&window),
                count,
                ceiling = self.ceiling,
                "window over ceiling, narrowing to a single day"
            );
            window = DateRange::new(start, start);
            count = match self.probe(&window).await {
                Ok(count) => count,
                Err(_) => self.ceiling.min(count),
            };
        }

        if count > self.ceiling {
            warn!(
                partition = %self.filter.partition_key(&window),
                count,
                ceiling = self.ceiling,
                "single-day partition exceeds the pagination ceiling"
            );
        }

        self.next_start = window.end + Duration::days(1);

        Some(Partition {
            partition_key: self.filter.partition_key(&window),
            query_expression: self.filter.query_for(&window),
            range: window,
            expected_count: count,
            target_fetch_count: count.min(remaining),
        })
    }

    /// Plan the whole range up front.
    pub async fn plan(mut self, remaining: u64) -> Vec<Partition> {
        let mut partitions = Vec::new();
        while let Some(partition) = self.next_partition(remaining).await {
            partitions.push(partition);
        }
        partitions
    }

    async fn probe(&self, window: &DateRange) -> Result<u64> {
        let query = self.filter.query_for(window);
        match self.backend.search(&query, None, 1).await? {
            SearchOutcome::Page(page) => Ok(page.repository_count),
            SearchOutcome::Rejected(messages) => {
                Err(anyhow!("count probe rejected: {}", messages.join("; ")))
            }
        }
    }
}
