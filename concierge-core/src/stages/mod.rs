//! Pipeline stages.
//!
//! Each stage is a function of `(context, session, typed input)` returning a
//! [`StageOutput`]: the typed result plus the [`SessionDelta`] the
//! orchestrator applies to the session. Stages reach the outside world only
//! through the [`StageContext`], which routes every call through the
//! resilience adapter and bounds it by the stage deadline.

pub mod gathering;
pub mod intent;
pub mod summarization;
pub mod synthesis;
pub mod verification;

pub use gathering::gather_sources;
pub use intent::extract_intent;
pub use summarization::summarize_sources;
pub use synthesis::synthesize;
pub use verification::{Verification, verify_claims};

use std::future::Future;
use std::path::Path;
use tokio::time::Instant;

use crate::config::ConciergeConfig;
use crate::error::ProviderError;
use crate::memory::SessionDelta;
use crate::providers::{
    ExtractRequest, ExtractedDocument, GenerationPurpose, GenerationRequest, ProviderSet,
    ResponseFormat, ScrapeRequest, ScrapedPage, SearchHit, SearchRequest,
};
use crate::resilience::{OperationClass, ResilienceAdapter, deadline_after};
use crate::types::ResearchQuery;

/// Characters of source text placed in a single prompt.
pub(crate) const PROMPT_CONTENT_CHARS: usize = 1500;

/// Why an outbound call made by a stage produced no value.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("stage deadline reached")]
    Deadline,
}

impl CallError {
    pub fn is_deadline(&self) -> bool {
        matches!(self, CallError::Deadline)
    }
}

/// Result of one stage: its output and the session changes it implies.
#[derive(Debug)]
pub struct StageOutput<T> {
    pub output: T,
    pub delta: SessionDelta,
}

impl<T> StageOutput<T> {
    pub fn new(output: T, delta: SessionDelta) -> Self {
        Self { output, delta }
    }
}

/// Everything a stage may use besides its session and input.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub adapter: &'a ResilienceAdapter,
    pub providers: &'a ProviderSet,
    pub config: &'a ConciergeConfig,
    pub query: &'a ResearchQuery,
    pub deadline: Instant,
}

impl<'a> StageContext<'a> {
    pub fn new(
        adapter: &'a ResilienceAdapter,
        providers: &'a ProviderSet,
        config: &'a ConciergeConfig,
        query: &'a ResearchQuery,
        deadline: Instant,
    ) -> Self {
        Self {
            adapter,
            providers,
            config,
            query,
            deadline,
        }
    }

    /// Same context with a different deadline.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self { deadline, ..*self }
    }

    /// The earlier of the current deadline and `now + limit`.
    pub fn narrowed(&self, limit: std::time::Duration) -> Self {
        self.with_deadline(self.deadline.min(deadline_after(Instant::now(), limit)))
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, CallError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match tokio::time::timeout_at(self.deadline, call).await {
            Ok(result) => result.map_err(CallError::from),
            Err(_) => Err(CallError::Deadline),
        }
    }

    pub async fn generate(
        &self,
        purpose: GenerationPurpose,
        format: ResponseFormat,
        prompt: impl Into<String>,
    ) -> Result<String, CallError> {
        let request = GenerationRequest::new(purpose, format, prompt);
        let response = self
            .bounded(self.adapter.invoke(
                OperationClass::Generation,
                &request,
                &self.providers.generate,
            ))
            .await?;
        Ok(response.text)
    }

    pub async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, CallError> {
        let request = SearchRequest::new(query, max_results);
        self.bounded(
            self.adapter
                .invoke(OperationClass::Search, &request, &self.providers.search),
        )
        .await
    }

    pub async fn scrape(&self, url: &str) -> Result<ScrapedPage, CallError> {
        let request = ScrapeRequest {
            url: url.to_string(),
        };
        self.bounded(
            self.adapter
                .invoke(OperationClass::Scrape, &request, &self.providers.scrape),
        )
        .await
    }

    pub async fn extract(&self, path: &Path) -> Result<ExtractedDocument, CallError> {
        let request = ExtractRequest {
            path: path.to_path_buf(),
        };
        self.bounded(self.adapter.invoke(
            OperationClass::DocumentExtract,
            &request,
            &self.providers.extract,
        ))
        .await
    }
}
