//! Fatal crawl outcomes.
//!
//! Everything else in the crate propagates through `anyhow`; these variants
//! exist so callers (and tests) can tell *why* a run aborted.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarvestError {
    /// Transport failures on every attempt of a single request.
    #[error("request failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The remote side kept rejecting the same page.
    #[error("query for partition {partition} rejected {attempts} times: {}", messages.join("; "))]
    QueryRejected {
        partition: String,
        attempts: u32,
        messages: Vec<String>,
    },

    /// A 2xx response whose body did not have the expected shape.
    #[error("malformed search response: {0}")]
    MalformedResponse(String),
}
