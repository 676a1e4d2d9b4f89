//! Outbound provider contracts and implementations.
//!
//! Every external service (web search, page scraping, document extraction,
//! text generation) implements [`Provider`] for its request/response pair.
//! Primary and fallback providers of one kind share the same contract, so the
//! resilience adapter can substitute them transparently.
//!
//! Use [`build_providers`] to assemble the configured chains.

pub mod documents;
pub mod gemini;
pub mod mock;
pub mod scraper;
pub mod search;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ConciergeConfig;
use crate::error::{ConfigError, ProviderError};
use crate::resilience::CacheKey;
use crate::types::SourceSection;

pub use documents::{RawTextExtractor, StructuredExtractor};
pub use gemini::GeminiGenerator;
pub use scraper::{HttpScraper, extract_text_from_html};
pub use search::{DuckDuckGoSearch, GoogleCustomSearch};

/// An external service reachable through the resilience adapter.
#[async_trait]
pub trait Provider<Req, Out>: Send + Sync
where
    Req: Send + Sync,
    Out: Send,
{
    /// Short identifier used in logs and error chains.
    fn name(&self) -> &str;

    async fn call(&self, request: &Req) -> Result<Out, ProviderError>;
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub max_results: usize,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, max_results: usize) -> Self {
        Self {
            query: query.into(),
            max_results,
        }
    }
}

impl CacheKey for SearchRequest {
    fn cache_material(&self) -> Option<String> {
        Some(format!("{}:{}", self.query.trim().to_lowercase(), self.max_results))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

impl SearchHit {
    pub fn new(url: impl Into<String>, title: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            snippet: snippet.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scrape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeRequest {
    pub url: String,
}

impl CacheKey for ScrapeRequest {
    fn cache_material(&self) -> Option<String> {
        Some(self.url.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedPage {
    pub url: String,
    pub title: Option<String>,
    pub text: String,
}

// ---------------------------------------------------------------------------
// Document extraction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractRequest {
    pub path: PathBuf,
}

impl CacheKey for ExtractRequest {
    fn cache_material(&self) -> Option<String> {
        Some(self.path.display().to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub text: String,
    pub sections: Vec<SourceSection>,
    /// Pages for paged formats, sections otherwise.
    pub unit_count: usize,
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

/// Why a generation call is made. Carried on every request so providers,
/// caches, and test doubles can tell calls apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPurpose {
    Intent,
    Summarize,
    FactCheck,
    Narrative,
    InsightRanking,
    GlossaryExtraction,
    QualityEvaluation,
    Revision,
}

/// Shape the caller expects the response text to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Json,
    NumberedList,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub purpose: GenerationPurpose,
    pub prompt: String,
    pub format: ResponseFormat,
}

impl GenerationRequest {
    pub fn new(purpose: GenerationPurpose, format: ResponseFormat, prompt: impl Into<String>) -> Self {
        Self {
            purpose,
            prompt: prompt.into(),
            format,
        }
    }
}

impl CacheKey for GenerationRequest {
    /// Quality evaluations must see the brief as it is now, never a stale score.
    fn cache_material(&self) -> Option<String> {
        match self.purpose {
            GenerationPurpose::QualityEvaluation => None,
            purpose => Some(format!("{purpose:?}:{:?}:{}", self.format, self.prompt)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub text: String,
    pub model: String,
}

pub type SearchProvider = dyn Provider<SearchRequest, Vec<SearchHit>>;
pub type ScrapeProvider = dyn Provider<ScrapeRequest, ScrapedPage>;
pub type ExtractProvider = dyn Provider<ExtractRequest, ExtractedDocument>;
pub type GenerationProvider = dyn Provider<GenerationRequest, GenerationResponse>;

/// Ordered provider chains, primary first, for each operation class.
#[derive(Clone, Default)]
pub struct ProviderSet {
    pub search: Vec<Arc<SearchProvider>>,
    pub scrape: Vec<Arc<ScrapeProvider>>,
    pub extract: Vec<Arc<ExtractProvider>>,
    pub generate: Vec<Arc<GenerationProvider>>,
}

impl ProviderSet {
    /// Generation and search are always required; extraction only when the
    /// query references documents.
    pub fn validate(&self, needs_documents: bool) -> Result<(), ConfigError> {
        if self.generate.is_empty() {
            return Err(ConfigError::Invalid {
                message: "no generation provider configured".into(),
            });
        }
        if self.search.is_empty() {
            return Err(ConfigError::Invalid {
                message: "no search provider configured".into(),
            });
        }
        if needs_documents && self.extract.is_empty() {
            return Err(ConfigError::Invalid {
                message: "documents supplied but no document extractor configured".into(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers shared by the network providers
// ---------------------------------------------------------------------------

pub(crate) fn map_send_error(provider: &str, e: reqwest::Error) -> ProviderError {
    ProviderError::Transient {
        provider: provider.to_string(),
        message: if e.is_timeout() {
            "request timed out".to_string()
        } else {
            format!("request failed: {}", e)
        },
    }
}

pub(crate) fn retry_after_secs(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Map a non-success HTTP status from a data-fetch service.
pub(crate) fn status_error(
    provider: &str,
    status: reqwest::StatusCode,
    retry_after: Option<u64>,
    body_text: &str,
) -> ProviderError {
    let quota_body = body_text.contains("rateLimitExceeded") || body_text.contains("dailyLimitExceeded");
    match status.as_u16() {
        429 => ProviderError::QuotaExceeded {
            provider: provider.to_string(),
            retry_after_secs: retry_after,
        },
        403 if quota_body => ProviderError::QuotaExceeded {
            provider: provider.to_string(),
            retry_after_secs: retry_after,
        },
        408 | 500..=599 => ProviderError::Transient {
            provider: provider.to_string(),
            message: format!("HTTP {}", status),
        },
        _ => ProviderError::NonRetryable {
            provider: provider.to_string(),
            message: format!("HTTP {}", status),
        },
    }
}

/// Read an API key from the environment.
pub fn resolve_api_key(env_var: &str) -> Result<String, ConfigError> {
    match std::env::var(env_var) {
        Ok(key) if !key.trim().is_empty() => Ok(key),
        _ => Err(ConfigError::MissingCredential {
            var: env_var.to_string(),
        }),
    }
}

/// Assemble real provider chains from configuration.
///
/// Fails with [`ConfigError::MissingCredential`] when the generation key is
/// absent. Google search is only placed in the chain when its credentials are
/// present; DuckDuckGo needs none.
pub fn build_providers(config: &ConciergeConfig) -> Result<ProviderSet, ConfigError> {
    let api_key = resolve_api_key(&config.generation.api_key_env)?;

    let mut generate: Vec<Arc<GenerationProvider>> = Vec::new();
    generate.push(Arc::new(GeminiGenerator::new(
        &config.generation,
        &config.generation.model,
        api_key.clone(),
    )?));
    for model in &config.generation.fallback_models {
        generate.push(Arc::new(GeminiGenerator::new(
            &config.generation,
            model,
            api_key.clone(),
        )?));
    }

    let mut search: Vec<Arc<SearchProvider>> = Vec::new();
    match (
        resolve_api_key(&config.search.google_api_key_env),
        resolve_api_key(&config.search.google_engine_id_env),
    ) {
        (Ok(key), Ok(engine)) => {
            search.push(Arc::new(GoogleCustomSearch::new(&config.search, key, engine)?));
        }
        _ => {
            tracing::info!("Google Custom Search credentials not set, using fallback search only");
        }
    }
    if config.search.duckduckgo_fallback {
        search.push(Arc::new(DuckDuckGoSearch::new(&config.search)?));
    }

    let scrape: Vec<Arc<ScrapeProvider>> = vec![Arc::new(HttpScraper::new(&config.search)?)];
    let extract: Vec<Arc<ExtractProvider>> = vec![
        Arc::new(StructuredExtractor::new(config.documents.min_section_chars)),
        Arc::new(RawTextExtractor::new()),
    ];

    Ok(ProviderSet {
        search,
        scrape,
        extract,
        generate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_evaluations_bypass_cache() {
        let eval = GenerationRequest::new(
            GenerationPurpose::QualityEvaluation,
            ResponseFormat::Json,
            "score this",
        );
        assert!(eval.cache_material().is_none());
        let summary = GenerationRequest::new(GenerationPurpose::Summarize, ResponseFormat::Json, "x");
        assert!(summary.cache_material().is_some());
    }

    #[test]
    fn test_search_key_normalizes_query() {
        let a = SearchRequest::new("Rust Async ", 5);
        let b = SearchRequest::new("rust async", 5);
        let c = SearchRequest::new("rust async", 6);
        assert_eq!(a.cache_material(), b.cache_material());
        assert_ne!(b.cache_material(), c.cache_material());
    }

    #[test]
    fn test_provider_set_validation() {
        let empty = ProviderSet::default();
        assert!(matches!(empty.validate(false), Err(ConfigError::Invalid { .. })));

        let set = ProviderSet {
            search: vec![Arc::new(mock::MockSearch::with_hits(Vec::new()))],
            generate: vec![Arc::new(mock::MockGenerator::new())],
            ..Default::default()
        };
        assert!(set.validate(false).is_ok());
        assert!(set.validate(true).is_err());
    }

    #[test]
    fn test_status_error_classification() {
        use reqwest::StatusCode;
        assert!(matches!(
            status_error("g", StatusCode::FORBIDDEN, None, r#"{"reason":"dailyLimitExceeded"}"#),
            ProviderError::QuotaExceeded { .. }
        ));
        assert!(matches!(
            status_error("g", StatusCode::FORBIDDEN, None, "forbidden"),
            ProviderError::NonRetryable { .. }
        ));
        assert!(status_error("g", StatusCode::BAD_GATEWAY, None, "").is_retryable());
    }

    #[test]
    fn test_missing_credential() {
        let err = resolve_api_key("CONCIERGE_TEST_DEFINITELY_UNSET_KEY").unwrap_err();
        assert!(matches!(err, ConfigError::MissingCredential { var } if var == "CONCIERGE_TEST_DEFINITELY_UNSET_KEY"));
    }
}
