//! Configuration parsing and validation.
//!
//! Settings come from three layers, later layers winning:
//!
//! 1. A TOML file (`--config`, default `./config/harvest.toml`). The file is
//!    optional; when it does not exist [`Config::minimal`] is used.
//! 2. Environment variables: `GITHUB_TOKEN`, `DATABASE_URL`, `CRAWL_TARGET`.
//! 3. CLI flags (applied by the caller on the returned [`Config`]).
//!
//! ```toml
//! [db]
//! path = "./data/harvest.sqlite"
//!
//! [github]
//! endpoint = "https://api.github.com/graphql"
//! max_attempts = 6
//!
//! [crawl]
//! target = 5000
//! language = "Rust"
//! since = "2024-01-01"
//!
//! [export]
//! path = "repos_dump.csv"
//! ```

use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::models::DateRange;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/harvest.sqlite"),
        }
    }
}

/// Remote GraphQL endpoint and transport retry policy.
#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Bearer token. Never read from the file; filled from `GITHUB_TOKEN`.
    #[serde(skip)]
    pub token: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ceiling_secs")]
    pub backoff_ceiling_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            token: None,
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
            backoff_ceiling_secs: default_backoff_ceiling_secs(),
        }
    }
}

fn default_endpoint() -> String {
    "https://api.github.com/graphql".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    6
}
fn default_backoff_ceiling_secs() -> u64 {
    60
}

/// Partitioning, pagination and pacing of a crawl run.
#[derive(Debug, Deserialize, Clone)]
pub struct CrawlConfig {
    #[serde(default = "default_target")]
    pub target: u64,
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,
    #[serde(default)]
    pub since: Option<NaiveDate>,
    #[serde(default)]
    pub until: Option<NaiveDate>,
    #[serde(default = "default_language")]
    pub language: Option<String>,
    #[serde(default)]
    pub min_stars: u64,
    #[serde(default = "default_ceiling")]
    pub ceiling: u64,
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_low_water_mark")]
    pub low_water_mark: i64,
    #[serde(default = "default_polite_delay_ms")]
    pub polite_delay_ms: u64,
    #[serde(default = "default_rejected_delay_secs")]
    pub rejected_delay_secs: u64,
    #[serde(default = "default_max_rejected_retries")]
    pub max_rejected_retries: u32,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
            lookback_days: default_lookback_days(),
            since: None,
            until: None,
            language: default_language(),
            min_stars: 0,
            ceiling: default_ceiling(),
            window_days: default_window_days(),
            page_size: default_page_size(),
            batch_size: default_batch_size(),
            low_water_mark: default_low_water_mark(),
            polite_delay_ms: default_polite_delay_ms(),
            rejected_delay_secs: default_rejected_delay_secs(),
            max_rejected_retries: default_max_rejected_retries(),
        }
    }
}

fn default_target() -> u64 {
    100_000
}
fn default_lookback_days() -> i64 {
    365 * 5
}
fn default_language() -> Option<String> {
    Some("Python".to_string())
}
fn default_ceiling() -> u64 {
    1000
}
fn default_window_days() -> i64 {
    7
}
fn default_page_size() -> u32 {
    100
}
fn default_batch_size() -> usize {
    50
}
fn default_low_water_mark() -> i64 {
    10
}
fn default_polite_delay_ms() -> u64 {
    500
}
fn default_rejected_delay_secs() -> u64 {
    10
}
fn default_max_rejected_retries() -> u32 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    pub path: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("repos_dump.csv"),
        }
    }
}

impl Config {
    /// Built-in defaults, used when no config file exists.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig::default(),
            github: GithubConfig::default(),
            crawl: CrawlConfig::default(),
            export: ExportConfig::default(),
        }
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup("GITHUB_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.github.token = Some(token);
        }

        if let Some(url) = lookup("DATABASE_URL").filter(|u| !u.trim().is_empty()) {
            self.db.path = sqlite_path_from_url(&url);
        }

        if let Some(target) = lookup("CRAWL_TARGET").filter(|t| !t.trim().is_empty()) {
            self.crawl.target = target
                .trim()
                .parse()
                .with_context(|| format!("CRAWL_TARGET is not a valid count: '{}'", target))?;
        }

        Ok(())
    }

    /// The inclusive date range a crawl covers, resolved against today (UTC).
    pub fn crawl_range(&self) -> DateRange {
        let until = self.crawl.until.unwrap_or_else(|| Utc::now().date_naive());
        let since = self
            .crawl
            .since
            .unwrap_or_else(|| until - Duration::days(self.crawl.lookback_days));
        DateRange::new(since, until)
    }

    pub fn validate(&self) -> Result<()> {
        let crawl = &self.crawl;

        if crawl.batch_size == 0 {
            bail!("crawl.batch_size must be > 0");
        }
        if crawl.page_size == 0 || crawl.page_size > 100 {
            bail!("crawl.page_size must be in [1, 100]");
        }
        if crawl.ceiling == 0 {
            bail!("crawl.ceiling must be > 0");
        }
        if crawl.window_days < 1 {
            bail!("crawl.window_days must be >= 1");
        }
        if crawl.lookback_days < 0 {
            bail!("crawl.lookback_days must be >= 0");
        }
        let range = self.crawl_range();
        if range.start > range.end {
            bail!(
                "crawl.since ({}) is after crawl.until ({})",
                range.start,
                range.end
            );
        }
        if self.github.max_attempts == 0 {
            bail!("github.max_attempts must be >= 1");
        }

        Ok(())
    }
}

/// Accept `sqlite:path`, `sqlite://path` or a bare filesystem path.
fn sqlite_path_from_url(url: &str) -> PathBuf {
    let trimmed = url.trim();
    let path = trimmed
        .strip_prefix("sqlite://")
        .or_else(|| trimmed.strip_prefix("sqlite:"))
        .unwrap_or(trimmed);
    let path = path.split('?').next().unwrap_or(path);
    PathBuf::from(path)
}

/// Load the config file (if present), then apply environment overrides.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content).with_context(|| "Failed to parse config file")?
    } else {
        Config::minimal()
    };

    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;

    Ok(config)
}
