//! Remote search capability.
//!
//! The crawler and planner only see the [`SearchBackend`] trait: one call
//! returns one page of raw repository nodes plus pagination and rate-limit
//! telemetry. [`GithubSearch`] implements it over the GitHub GraphQL
//! `search(type: REPOSITORY)` connection.
//!
//! A 2xx response carrying a GraphQL `errors` list is a *rejection*
//! ([`SearchOutcome::Rejected`]), not a transport failure; it is up to the
//! caller whether to retry it.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::client::GraphQlClient;
use crate::error::HarvestError;
use crate::models::Repository;

const SEARCH_QUERY: &str = r#"
query ($q: String!, $cursor: String, $first: Int!) {
  rateLimit {
    limit
    cost
    remaining
    resetAt
  }
  search(query: $q, type: REPOSITORY, first: $first, after: $cursor) {
    repositoryCount
    pageInfo { hasNextPage endCursor }
    edges {
      node {
        ... on Repository {
          id
          databaseId
          name
          owner { login }
          url
          stargazerCount
          forkCount
          primaryLanguage { name }
          description
          createdAt
        }
      }
    }
  }
}
"#;

/// Remaining request budget as reported alongside a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSnapshot {
    pub remaining: i64,
    pub reset_at: DateTime<Utc>,
}

/// A repository node exactly as the search API returned it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRepoNode {
    pub id: Option<String>,
    pub database_id: Option<i64>,
    pub name: Option<String>,
    pub owner: Option<RawOwner>,
    pub url: Option<String>,
    pub stargazer_count: Option<u64>,
    pub fork_count: Option<u64>,
    pub primary_language: Option<RawLanguage>,
    pub description: Option<String>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawOwner {
    pub login: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLanguage {
    pub name: Option<String>,
}

/// One page of search results.
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub repository_count: u64,
    pub has_next_page: bool,
    pub end_cursor: Option<String>,
    pub nodes: Vec<RawRepoNode>,
    pub rate_limit: Option<RateLimitSnapshot>,
}

#[derive(Debug, Clone)]
pub enum SearchOutcome {
    Page(SearchPage),
    /// Query-level errors from an otherwise successful response.
    Rejected(Vec<String>),
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Fetch up to `first` results of `query`, starting after `cursor`.
    async fn search(&self, query: &str, cursor: Option<&str>, first: u32)
        -> Result<SearchOutcome>;
}

/// [`SearchBackend`] over the GitHub GraphQL API.
pub struct GithubSearch {
    client: GraphQlClient,
}

impl GithubSearch {
    pub fn new(client: GraphQlClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SearchBackend for GithubSearch {
    async fn search(
        &self,
        query: &str,
        cursor: Option<&str>,
        first: u32,
    ) -> Result<SearchOutcome> {
        let variables = serde_json::json!({
            "q": query,
            "cursor": cursor,
            "first": first,
        });
        let body = self.client.post(SEARCH_QUERY, variables).await?;
        decode_search_response(&body)
    }
}

#[derive(Deserialize)]
struct Envelope {
    data: Option<SearchData>,
    #[serde(default)]
    errors: Option<Vec<GraphQlError>>,
}

#[derive(Deserialize)]
struct GraphQlError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchData {
    rate_limit: Option<RawRateLimit>,
    search: Option<RawSearch>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRateLimit {
    remaining: Option<i64>,
    reset_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSearch {
    #[serde(default)]
    repository_count: u64,
    page_info: Option<RawPageInfo>,
    #[serde(default)]
    edges: Vec<RawEdge>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPageInfo {
    #[serde(default)]
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Deserialize)]
struct RawEdge {
    node: Option<RawRepoNode>,
}

/// Turn a GraphQL response body into a [`SearchOutcome`].
pub fn decode_search_response(body: &Value) -> Result<SearchOutcome> {
    let envelope: Envelope = serde_json::from_value(body.clone())
        .map_err(|e| HarvestError::MalformedResponse(e.to_string()))?;

    if let Some(errors) = envelope.errors.filter(|e| !e.is_empty()) {
        return Ok(SearchOutcome::Rejected(
            errors.into_iter().map(|e| e.message).collect(),
        ));
    }

    let data = envelope
        .data
        .ok_or_else(|| HarvestError::MalformedResponse("missing `data`".to_string()))?;
    let search = data
        .search
        .ok_or_else(|| HarvestError::MalformedResponse("missing `data.search`".to_string()))?;

    let rate_limit = data.rate_limit.and_then(|rl| match (rl.remaining, rl.reset_at) {
        (Some(remaining), Some(reset_at)) => Some(RateLimitSnapshot {
            remaining,
            reset_at,
        }),
        _ => None,
    });

    let (has_next_page, end_cursor) = search
        .page_info
        .map(|p| (p.has_next_page, p.end_cursor))
        .unwrap_or((false, None));

    Ok(SearchOutcome::Page(SearchPage {
        repository_count: search.repository_count,
        has_next_page,
        end_cursor,
        nodes: search
            .edges
            .into_iter()
            .map(|e| e.node.unwrap_or_default())
            .collect(),
        rate_limit,
    }))
}

/// Convert a raw node into the canonical [`Repository`] shape.
///
/// Returns `None` for nodes with neither `databaseId` nor `id`.
pub fn parse_repo_node(node: &RawRepoNode) -> Option<Repository> {
    let entity_id = node
        .database_id
        .map(|id| id.to_string())
        .or_else(|| node.id.clone())?;

    let name = node.name.clone().unwrap_or_default();
    let owner_login = node
        .owner
        .as_ref()
        .and_then(|o| o.login.clone())
        .unwrap_or_default();

    Some(Repository {
        full_name: format!("{}/{}", owner_login, name),
        entity_id,
        name,
        owner_login,
        url: node.url.clone().unwrap_or_default(),
        star_count: node.stargazer_count.unwrap_or(0),
        fork_count: node.fork_count.unwrap_or(0),
        primary_language: node.primary_language.as_ref().and_then(|l| l.name.clone()),
        description: node.description.clone(),
        created_at: node
            .created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc)),
    })
}
