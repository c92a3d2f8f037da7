//! # Repo Harvester CLI (`harvest`)
//!
//! ## Usage
//!
//! ```bash
//! harvest --config ./config/harvest.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `harvest init` | Create the SQLite database and run schema migrations |
//! | `harvest crawl` | Run the partitioned crawl, then export CSV |
//! | `harvest export` | Write the repository table to CSV |
//! | `harvest status` | Show totals and per-partition checkpoints |
//!
//! ## Environment
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `GITHUB_TOKEN` | Auth token for the search API (required by `crawl`) |
//! | `DATABASE_URL` | `sqlite:` URL or path, overrides `[db].path` |
//! | `CRAWL_TARGET` | Global record target, overrides `[crawl].target` |
//! | `RUST_LOG` | Log filter (default `repo_harvester=info`) |
//! | `LOG_FORMAT` | `json` for JSON logs on stderr |

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use repo_harvester::config;
use repo_harvester::export;
use repo_harvester::harvest::{self, CrawlOptions};
use repo_harvester::migrate;
use repo_harvester::progress::ProgressMode;
use repo_harvester::status;

/// Repo Harvester: partitioned, checkpointed harvesting of repository
/// search metadata into SQLite.
#[derive(Parser)]
#[command(
    name = "harvest",
    about = "Repo Harvester: resumable repository metadata crawler",
    version,
    long_about = "Repo Harvester splits a date range into search partitions small enough for the \
    API's pagination ceiling, paginates each one with durable checkpoints, honors the rate-limit \
    budget, and upserts every repository into SQLite."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/harvest.toml`. When the file does not exist,
    /// built-in defaults are used.
    #[arg(long, global = true, default_value = "./config/harvest.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the repositories, stars_history
    /// and crawl_checkpoints tables. Running it repeatedly is safe.
    Init,

    /// Crawl the search API and store repositories.
    ///
    /// Resumes every partition from its checkpoint, so an interrupted crawl
    /// can simply be started again.
    Crawl {
        /// Global number of repositories to collect (overrides CRAWL_TARGET).
        #[arg(long)]
        target: Option<u64>,

        /// First creation date to crawl (YYYY-MM-DD).
        #[arg(long)]
        since: Option<NaiveDate>,

        /// Last creation date to crawl (YYYY-MM-DD).
        #[arg(long)]
        until: Option<NaiveDate>,

        /// Restrict to one primary language (use "" for any).
        #[arg(long)]
        language: Option<String>,

        /// Skip the CSV export after crawling.
        #[arg(long)]
        no_export: bool,

        /// Progress output on stderr: off, human, json. Defaults to human on a TTY.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Export the repository table to CSV.
    Export {
        /// Output path (defaults to `[export].path`).
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Show repository totals and partition checkpoints.
    Status,
}

fn init_tracing() {
    let json_format = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("repo_harvester=info"));

    if json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Crawl {
            target,
            since,
            until,
            language,
            no_export,
            progress,
        } => {
            if let Some(target) = target {
                cfg.crawl.target = target;
            }
            if since.is_some() {
                cfg.crawl.since = since;
            }
            if until.is_some() {
                cfg.crawl.until = until;
            }
            if let Some(language) = language {
                cfg.crawl.language = Some(language).filter(|l| !l.trim().is_empty());
            }
            cfg.validate()?;

            let progress = match progress.as_deref() {
                Some(value) => ProgressMode::parse(value).ok_or_else(|| {
                    anyhow::anyhow!("Unknown progress mode: '{}'. Use off, human, or json.", value)
                })?,
                None => ProgressMode::default_for_tty(),
            };

            let options = CrawlOptions {
                export: !no_export,
                progress,
            };
            harvest::run_crawl(&cfg, &options).await?;
        }
        Commands::Export { output } => {
            export::run_export(&cfg, output.as_deref()).await?;
        }
        Commands::Status => {
            status::run_status(&cfg).await?;
        }
    }

    Ok(())
}
