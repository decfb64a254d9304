//! `web_search` capability backed by the Brave Search API.

use std::time::Duration;

use async_trait::async_trait;
use kbchat_shared::{KbChatError, Result};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::{Arguments, Capability, CapabilityProvider, build_client, required_str};

/// Capability name served by this provider.
pub const WEB_SEARCH: &str = "web_search";

/// Results included in the formatted summary.
const MAX_RESULTS: usize = 5;

/// Characters of each result snippet kept in the summary.
const SNIPPET_CHARS: usize = 220;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    web: Option<WebResults>,
}

#[derive(Debug, Deserialize)]
struct WebResults {
    #[serde(default)]
    results: Vec<WebResult>,
}

#[derive(Debug, Deserialize)]
struct WebResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: Option<String>,
}

/// Live web search through Brave.
pub struct BraveSearch {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl BraveSearch {
    /// `api_key` may be absent; calls then fail with a configuration error
    /// instead of reaching the network.
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            client: build_client(REQUEST_TIMEOUT)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    #[instrument(skip_all, fields(query = %query))]
    async fn search(&self, query: &str) -> Result<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(KbChatError::config(
                "Brave Search API key not configured; set BRAVE_API_KEY to enable live search",
            ));
        };

        let url = format!("{}/web/search", self.base_url);
        debug!(%url, "querying Brave Search");

        let response = self
            .client
            .get(&url)
            .query(&[("q", query)])
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .send()
            .await
            .map_err(|e| KbChatError::upstream(WEB_SEARCH, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KbChatError::upstream(WEB_SEARCH, format!("HTTP {status}")));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| KbChatError::upstream(WEB_SEARCH, format!("invalid response body: {e}")))?;

        let results = body.web.map(|w| w.results).unwrap_or_default();
        info!(hits = results.len(), "Brave Search returned");
        Ok(format_results(query, &results))
    }
}

fn format_results(query: &str, results: &[WebResult]) -> String {
    if results.is_empty() {
        return format!("No results found for: {query}");
    }

    let mut out = format!("Web search results for: {query}\n\n");
    for (i, result) in results.iter().take(MAX_RESULTS).enumerate() {
        let title = if result.title.is_empty() { "Untitled" } else { &result.title };
        out.push_str(&format!("[{}] **{title}** — {}\n", i + 1, result.url));

        let snippet = result.description.as_deref().unwrap_or("No description");
        let mut cut: String = snippet.chars().take(SNIPPET_CHARS).collect();
        if snippet.chars().count() > SNIPPET_CHARS {
            cut.push_str("...");
        }
        out.push_str(&format!("    {cut}\n\n"));
    }
    out.trim_end().to_string()
}

#[async_trait]
impl CapabilityProvider for BraveSearch {
    fn name(&self) -> &str {
        "brave"
    }

    fn capabilities(&self) -> Vec<Capability> {
        vec![Capability::new(
            WEB_SEARCH,
            "Search the web for current information",
        )]
    }

    async fn execute(&self, capability: &str, args: &Arguments) -> Result<String> {
        if capability != WEB_SEARCH {
            return Err(KbChatError::unknown_capability(capability));
        }
        let query = required_str(args, "query")?;
        self.search(query).await
    }
}
