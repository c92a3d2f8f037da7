//! Crawl progress reporting.
//!
//! Reports observable progress during `harvest crawl` so operators see which
//! partition is running, how far it got, and when the run is waiting on the
//! rate limit. Progress is emitted on **stderr** so stdout remains parseable
//! for scripts.

use std::io::Write;

/// A single progress event for a crawl run.
#[derive(Clone, Debug, PartialEq)]
pub enum CrawlProgressEvent {
    /// A partition is about to be crawled (possibly resuming).
    PartitionStarted {
        partition: String,
        resumed_from: u64,
        target: u64,
    },
    /// A batch was persisted and checkpointed.
    BatchFlushed {
        partition: String,
        fetched: u64,
        target: u64,
    },
    /// The crawler is sleeping until the rate-limit window resets.
    RateLimited { partition: String, wait_secs: u64 },
    /// A partition finished; `collected` is the run-wide total.
    PartitionDone {
        partition: String,
        fetched: u64,
        collected: u64,
        global_target: u64,
    },
}

/// Reports crawl progress. Implementations write to stderr (human or JSON).
pub trait CrawlProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the crawler and orchestrator.
    fn report(&self, event: CrawlProgressEvent);
}

/// Human-friendly progress on stderr: "crawl 2024-01-01_2024-01-07_stars>0_Python  flushed  100 / 640 repos".
pub struct StderrProgress;

impl CrawlProgressReporter for StderrProgress {
    fn report(&self, event: CrawlProgressEvent) {
        let line = match &event {
            CrawlProgressEvent::PartitionStarted {
                partition,
                resumed_from,
                target,
            } => {
                if *resumed_from > 0 {
                    format!(
                        "crawl {}  resuming at {} / {} repos\n",
                        partition,
                        format_number(*resumed_from),
                        format_number(*target)
                    )
                } else {
                    format!(
                        "crawl {}  starting  0 / {} repos\n",
                        partition,
                        format_number(*target)
                    )
                }
            }
            CrawlProgressEvent::BatchFlushed {
                partition,
                fetched,
                target,
            } => format!(
                "crawl {}  flushed  {} / {} repos\n",
                partition,
                format_number(*fetched),
                format_number(*target)
            ),
            CrawlProgressEvent::RateLimited {
                partition,
                wait_secs,
            } => format!(
                "crawl {}  rate limited, waiting {}s\n",
                partition, wait_secs
            ),
            CrawlProgressEvent::PartitionDone {
                partition,
                fetched,
                collected,
                global_target,
            } => format!(
                "crawl {}  done  {} repos  (total {} / {})\n",
                partition,
                format_number(*fetched),
                format_number(*collected),
                format_number(*global_target)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl CrawlProgressReporter for JsonProgress {
    fn report(&self, event: CrawlProgressEvent) {
        let obj = match &event {
            CrawlProgressEvent::PartitionStarted {
                partition,
                resumed_from,
                target,
            } => serde_json::json!({
                "event": "partition_started",
                "partition": partition,
                "resumed_from": resumed_from,
                "target": target
            }),
            CrawlProgressEvent::BatchFlushed {
                partition,
                fetched,
                target,
            } => serde_json::json!({
                "event": "batch_flushed",
                "partition": partition,
                "fetched": fetched,
                "target": target
            }),
            CrawlProgressEvent::RateLimited {
                partition,
                wait_secs,
            } => serde_json::json!({
                "event": "rate_limited",
                "partition": partition,
                "wait_secs": wait_secs
            }),
            CrawlProgressEvent::PartitionDone {
                partition,
                fetched,
                collected,
                global_target,
            } => serde_json::json!({
                "event": "partition_done",
                "partition": partition,
                "fetched": fetched,
                "collected": collected,
                "global_target": global_target
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl CrawlProgressReporter for NoProgress {
    fn report(&self, _event: CrawlProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Parse the `--progress` flag value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn CrawlProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
