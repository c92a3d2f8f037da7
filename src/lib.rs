//! # Repo Harvester
//!
//! Incrementally harvests repository metadata from the GitHub GraphQL search
//! API into SQLite, resuming interrupted runs from per-partition checkpoints.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌───────────┐   ┌──────────┐
//! │ Planner  │──▶│ Crawler  │──▶│  Stores   │──▶│   CSV    │
//! │ windows  │   │ paginate │   │ upsert +  │   │  export  │
//! └────┬─────┘   └────┬─────┘   │ checkpoint│   └──────────┘
//!      │              │         └───────────┘
//!      └──────┬───────┘
//!             ▼
//!      ┌─────────────┐
//!      │ GraphQL     │
//!      │ client      │
//!      └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! harvest init                        # create database
//! GITHUB_TOKEN=... harvest crawl      # crawl, then write repos_dump.csv
//! harvest status                      # inspect checkpoints
//! harvest export --output out.csv
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML + environment configuration |
//! | [`models`] | Core data types |
//! | [`client`] | GraphQL transport with retry |
//! | [`search`] | Search backend trait and GitHub implementation |
//! | [`planner`] | Date-window partitioning |
//! | [`crawl`] | Checkpointed partition pagination |
//! | [`harvest`] | Run orchestration |
//! | [`store`] | Repository and checkpoint storage |
//! | [`export`] | CSV export |
//! | [`progress`] | Crawl progress on stderr |
//! | [`status`] | Checkpoint and totals overview |
//! | [`error`] | Fatal crawl errors |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod client;
pub mod config;
pub mod crawl;
pub mod db;
pub mod error;
pub mod export;
pub mod harvest;
pub mod migrate;
pub mod models;
pub mod planner;
pub mod progress;
pub mod search;
pub mod status;
pub mod store;
