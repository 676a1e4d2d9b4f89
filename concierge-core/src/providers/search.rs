//! Web search providers.
//!
//! Google Custom Search is the primary; the DuckDuckGo instant-answer API
//! needs no credentials and serves as fallback. Both return ordered
//! `(url, title, snippet)` hits.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

use super::{Provider, SearchHit, SearchRequest, map_send_error, retry_after_secs, status_error};
use crate::config::SearchConfig;
use crate::error::{ConfigError, ProviderError};

const GOOGLE_CSE_URL: &str = "https://www.googleapis.com/customsearch/v1";
const DUCKDUCKGO_URL: &str = "https://api.duckduckgo.com/";

/// Google Custom Search caps `num` at 10.
const GOOGLE_MAX_RESULTS: usize = 10;

fn build_client(config: &SearchConfig) -> Result<Client, ConfigError> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(10))
        .user_agent(config.user_agent.clone())
        .build()
        .map_err(|e| ConfigError::Invalid {
            message: format!("Failed to build HTTP client: {}", e),
        })
}

async fn fetch_json(client: &Client, provider: &str, url: &str) -> Result<Value, ProviderError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| map_send_error(provider, e))?;
    let status = response.status();
    let retry_after = retry_after_secs(response.headers());
    let body_text = response
        .text()
        .await
        .map_err(|e| map_send_error(provider, e))?;
    if !status.is_success() {
        return Err(status_error(provider, status, retry_after, &body_text));
    }
    serde_json::from_str(&body_text).map_err(|e| ProviderError::SchemaParse {
        provider: provider.to_string(),
        message: format!("Invalid JSON in search response: {}", e),
    })
}

// ---------------------------------------------------------------------------
// Google Custom Search
// ---------------------------------------------------------------------------

pub struct GoogleCustomSearch {
    client: Client,
    api_key: String,
    engine_id: String,
}

impl GoogleCustomSearch {
    pub fn new(config: &SearchConfig, api_key: String, engine_id: String) -> Result<Self, ConfigError> {
        Ok(Self {
            client: build_client(config)?,
            api_key,
            engine_id,
        })
    }

    fn request_url(&self, request: &SearchRequest) -> String {
        format!(
            "{}?key={}&cx={}&q={}&num={}",
            GOOGLE_CSE_URL,
            self.api_key,
            self.engine_id,
            urlencoding::encode(&request.query),
            request.max_results.clamp(1, GOOGLE_MAX_RESULTS)
        )
    }
}

/// Parse the `items` array of a Custom Search response.
pub(crate) fn parse_google_items(body: &Value, max_results: usize) -> Vec<SearchHit> {
    body["items"]
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let url = item["link"].as_str()?;
                    Some(SearchHit::new(
                        url,
                        item["title"].as_str().unwrap_or(url),
                        item["snippet"].as_str().unwrap_or_default(),
                    ))
                })
                .take(max_results)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Provider<SearchRequest, Vec<SearchHit>> for GoogleCustomSearch {
    fn name(&self) -> &str {
        "google_cse"
    }

    async fn call(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ProviderError> {
        let body = fetch_json(&self.client, self.name(), &self.request_url(request)).await?;
        Ok(parse_google_items(&body, request.max_results))
    }
}

// ---------------------------------------------------------------------------
// DuckDuckGo
// ---------------------------------------------------------------------------

pub struct DuckDuckGoSearch {
    client: Client,
}

impl DuckDuckGoSearch {
    pub fn new(config: &SearchConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            client: build_client(config)?,
        })
    }
}

fn topic_hit(topic: &Value) -> Option<SearchHit> {
    let text = topic["Text"].as_str()?;
    let url = topic["FirstURL"].as_str().filter(|u| !u.is_empty())?;
    let title = text.split(" - ").next().unwrap_or(text);
    Some(SearchHit::new(url, title, text))
}

/// Collect hits from an instant-answer response: the abstract first, then
/// `Results`, then `RelatedTopics` (flattening topic groups).
pub(crate) fn parse_duckduckgo(body: &Value, max_results: usize) -> Vec<SearchHit> {
    let mut hits = Vec::new();

    if let (Some(text), Some(url)) = (body["AbstractText"].as_str(), body["AbstractURL"].as_str()) {
        if !text.is_empty() && !url.is_empty() {
            let title = body["Heading"]
                .as_str()
                .or_else(|| body["AbstractSource"].as_str())
                .unwrap_or(url);
            hits.push(SearchHit::new(url, title, text));
        }
    }

    if let Some(results) = body["Results"].as_array() {
        hits.extend(results.iter().filter_map(topic_hit));
    }

    if let Some(topics) = body["RelatedTopics"].as_array() {
        for topic in topics {
            match topic["Topics"].as_array() {
                Some(group) => hits.extend(group.iter().filter_map(topic_hit)),
                None => hits.extend(topic_hit(topic)),
            }
        }
    }

    let mut seen = std::collections::HashSet::new();
    hits.retain(|h| seen.insert(h.url.clone()));
    hits.truncate(max_results);
    hits
}

#[async_trait]
impl Provider<SearchRequest, Vec<SearchHit>> for DuckDuckGoSearch {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    async fn call(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ProviderError> {
        let url = format!(
            "{}?q={}&format=json&no_html=1&skip_disambig=1",
            DUCKDUCKGO_URL,
            urlencoding::encode(&request.query)
        );
        let body = fetch_json(&self.client, self.name(), &url).await?;
        Ok(parse_duckduckgo(&body, request.max_results))
    }
}
