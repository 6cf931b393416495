//! Web search client backed by the Tavily search API

use crate::config::SearchConfig;
use crate::context::SearchSnippet;
use crate::credentials::CredentialStore;
use crate::error::{CoroError, Result};
use crate::providers::base::SearchClient;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Credential key for the search API
pub const SEARCH_CREDENTIAL: &str = "tavily";

/// Tavily search client
///
/// A missing API key is not an error: the search is skipped with a warning
/// and an empty result list is returned.
pub struct TavilySearchClient {
    client: Client,
    endpoint: String,
    max_results: usize,
    credentials: Arc<dyn CredentialStore>,
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    include_images: bool,
    include_answer: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

impl From<SearchHit> for SearchSnippet {
    fn from(hit: SearchHit) -> Self {
        Self {
            title: hit
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| "Untitled".to_string()),
            snippet: hit.content.unwrap_or_default(),
            url: hit.url.unwrap_or_default(),
        }
    }
}

impl TavilySearchClient {
    /// Create a search client
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails
    pub fn new(config: &SearchConfig, credentials: Arc<dyn CredentialStore>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("coro/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CoroError::Search(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            max_results: config.max_results,
            credentials,
        })
    }
}

#[async_trait]
impl SearchClient for TavilySearchClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchSnippet>> {
        let api_key = match self.credentials.get(SEARCH_CREDENTIAL)? {
            Some(key) => key,
            None => {
                tracing::warn!("Search requested but no tavily credential is configured");
                return Ok(Vec::new());
            }
        };

        let body = SearchRequest {
            api_key: &api_key,
            query,
            max_results: self.max_results,
            include_images: false,
            include_answer: false,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| CoroError::Search(format!("Search request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(
                CoroError::Search(format!("Search returned {}: {}", status, error_text)).into(),
            );
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| CoroError::Search(format!("Failed to parse search response: {}", e)))?;

        Ok(parsed
            .results
            .into_iter()
            .take(self.max_results)
            .map(SearchSnippet::from)
            .collect())
    }
}
