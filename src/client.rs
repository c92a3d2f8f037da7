//! Rate-limited GraphQL request client.
//!
//! Wraps `POST {endpoint}` with a bearer token and retries transport
//! failures with exponential backoff.
//!
//! # Retry strategy
//!
//! - Connection error, timeout, non-2xx status, undecodable body → retry
//!   after `min(backoff_ceiling_secs, 2^attempt)` seconds
//! - 2xx with a GraphQL `errors` list → returned as-is; the caller decides
//! - All attempts failed → [`HarvestError::RetriesExhausted`]

use anyhow::Result;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

use crate::config::GithubConfig;
use crate::error::HarvestError;

/// Delay before the next attempt after `attempt` (1-based) failed.
pub fn backoff_delay(attempt: u32, ceiling_secs: u64) -> Duration {
    let exp = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(exp.min(ceiling_secs))
}

/// GraphQL transport with bounded retry.
///
/// All settings, including the auth token, are taken from the
/// [`GithubConfig`] at construction.
pub struct GraphQlClient {
    http: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    max_attempts: u32,
    backoff_ceiling_secs: u64,
}

impl GraphQlClient {
    pub fn new(config: &GithubConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(concat!("repo-harvester/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
            max_attempts: config.max_attempts.max(1),
            backoff_ceiling_secs: config.backoff_ceiling_secs,
        })
    }

    /// Send one GraphQL request, retrying transport failures.
    pub async fn post(&self, query: &str, variables: Value) -> Result<Value> {
        let body = serde_json::json!({
            "query": query,
            "variables": variables,
        });

        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.send_once(&body).await {
                Ok(json) => return Ok(json),
                Err(e) => {
                    last_error = e.to_string();
                    if attempt == self.max_attempts {
                        break;
                    }
                    let wait = backoff_delay(attempt, self.backoff_ceiling_secs);
                    warn!(
                        attempt,
                        error = %last_error,
                        wait_secs = wait.as_secs(),
                        "graphql transport error, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
            }
        }

        Err(HarvestError::RetriesExhausted {
            attempts: self.max_attempts,
            last_error,
        }
        .into())
    }

    async fn send_once(&self, body: &Value) -> reqwest::Result<Value> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .header("Accept", "application/vnd.github+json")
            .json(body);

        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        request.send().await?.error_for_status()?.json().await
    }
}
