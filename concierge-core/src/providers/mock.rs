//! Deterministic providers for tests and offline runs.
//!
//! [`MockGenerator`] answers per [`GenerationPurpose`]: queued responses are
//! served first, then a per-purpose default. Defaults may contain `{n}`,
//! replaced by the 1-based call count for that purpose so repeated calls
//! produce distinct text. Calls for a purpose can be slowed from a given
//! call onward to exercise deadlines.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use super::{
    ExtractRequest, ExtractedDocument, GenerationPurpose, GenerationRequest, GenerationResponse,
    Provider, ScrapeRequest, ScrapedPage, SearchHit, SearchRequest,
};
use crate::error::ProviderError;

type Scripted = Result<String, ProviderError>;

pub struct MockGenerator {
    name: String,
    queues: Mutex<HashMap<GenerationPurpose, VecDeque<Scripted>>>,
    defaults: Mutex<HashMap<GenerationPurpose, String>>,
    counts: Mutex<HashMap<GenerationPurpose, usize>>,
    prompts: Mutex<Vec<GenerationRequest>>,
    /// First slowed call (1-based) and its delay, per purpose.
    delays: Mutex<HashMap<GenerationPurpose, (usize, Duration)>>,
}

impl Default for MockGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGenerator {
    pub fn new() -> Self {
        let defaults = HashMap::from([
            (
                GenerationPurpose::Intent,
                r#"{"topic": "research topic", "scope": "standard", "style": "casual", "keywords": ["research", "topic"]}"#.to_string(),
            ),
            (
                GenerationPurpose::Summarize,
                r#"{"claim": "Finding {n} reports a measurable effect on the topic", "evidence": "Observation {n} from the source material", "reliability_score": 80}"#.to_string(),
            ),
            (
                GenerationPurpose::FactCheck,
                r#"{"verdict": "true", "confidence": 0.8, "explanation": "Consistent with the grouped evidence"}"#.to_string(),
            ),
            (
                GenerationPurpose::Narrative,
                "The gathered sources agree on the main findings and note open questions.".to_string(),
            ),
            (
                GenerationPurpose::InsightRanking,
                "1. The primary effect is consistently reported\n2. Costs remain the main barrier\n3. Further trials are under way".to_string(),
            ),
            (
                GenerationPurpose::GlossaryExtraction,
                r#"{"glossary": {"Electrolyte": "Medium that carries ions between electrodes"}, "follow_up_questions": ["What are the latest developments?", "Which trials report next?"]}"#.to_string(),
            ),
            (
                GenerationPurpose::QualityEvaluation,
                r#"{"clarity": 95, "correctness": 95, "completeness": 95, "feedback": "Clear and complete"}"#.to_string(),
            ),
            (
                GenerationPurpose::Revision,
                "A clearer summary of the findings, revision {n}.".to_string(),
            ),
        ]);
        Self {
            name: "mock_generator".to_string(),
            queues: Mutex::new(HashMap::new()),
            defaults: Mutex::new(defaults),
            counts: Mutex::new(HashMap::new()),
            prompts: Mutex::new(Vec::new()),
            delays: Mutex::new(HashMap::new()),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Queue a response for the next call with `purpose`.
    pub fn queue(&self, purpose: GenerationPurpose, text: impl Into<String>) -> &Self {
        self.queue_result(purpose, Ok(text.into()))
    }

    /// Queue a failure for the next call with `purpose`.
    pub fn queue_error(&self, purpose: GenerationPurpose, error: ProviderError) -> &Self {
        self.queue_result(purpose, Err(error))
    }

    fn queue_result(&self, purpose: GenerationPurpose, result: Scripted) -> &Self {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(purpose)
            .or_default()
            .push_back(result);
        self
    }

    /// Replace the fallback answer for `purpose`.
    pub fn set_default(&self, purpose: GenerationPurpose, text: impl Into<String>) -> &Self {
        self.defaults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(purpose, text.into());
        self
    }

    /// Delay every call with `purpose` from the `from_call`-th (1-based) on.
    pub fn delay_from(&self, purpose: GenerationPurpose, from_call: usize, delay: Duration) -> &Self {
        self.delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(purpose, (from_call, delay));
        self
    }

    pub fn calls(&self, purpose: GenerationPurpose) -> usize {
        self.counts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&purpose)
            .copied()
            .unwrap_or(0)
    }

    /// Every request received, in order.
    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Provider<GenerationRequest, GenerationResponse> for MockGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: &GenerationRequest) -> Result<GenerationResponse, ProviderError> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        let n = {
            let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
            let count = counts.entry(request.purpose).or_insert(0);
            *count += 1;
            *count
        };
        let delay = self
            .delays
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&request.purpose)
            .and_then(|(from, delay)| (n >= *from).then_some(*delay));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let queued = self
            .queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&request.purpose)
            .and_then(|q| q.pop_front());
        let text = match queued {
            Some(result) => result?,
            None => self
                .defaults
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .get(&request.purpose)
                .map(|d| d.replace("{n}", &n.to_string()))
                .ok_or_else(|| ProviderError::NonRetryable {
                    provider: self.name.clone(),
                    message: format!("no scripted response for {:?}", request.purpose),
                })?,
        };

        Ok(GenerationResponse {
            text,
            model: "mock-model".to_string(),
        })
    }
}

/// Search provider returning a fixed hit list.
pub struct MockSearch {
    name: String,
    hits: Vec<SearchHit>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockSearch {
    pub fn with_hits(hits: Vec<SearchHit>) -> Self {
        Self {
            name: "mock_search".to_string(),
            hits,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// `count` hits at `https://source{i}.example/article`.
    pub fn numbered(count: usize) -> Self {
        Self::with_hits(
            (1..=count)
                .map(|i| {
                    SearchHit::new(
                        format!("https://source{i}.example/article"),
                        format!("Source {i}"),
                        format!("Snippet from source {i} describing its findings in brief."),
                    )
                })
                .collect(),
        )
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Sleep (on the tokio clock) before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider<SearchRequest, Vec<SearchHit>> for MockSearch {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, request: &SearchRequest) -> Result<Vec<SearchHit>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.hits.iter().take(request.max_results).cloned().collect())
    }
}

/// Scraper returning generated article text for every URL, unless the URL is
/// marked unreachable.
pub struct MockScraper {
    unreachable: Vec<String>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl Default for MockScraper {
    fn default() -> Self {
        Self::new()
    }
}

impl MockScraper {
    pub fn new() -> Self {
        Self {
            unreachable: Vec::new(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn unreachable(mut self, url: &str) -> Self {
        self.unreachable.push(url.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider<ScrapeRequest, ScrapedPage> for MockScraper {
    fn name(&self) -> &str {
        "mock_scraper"
    }

    async fn call(&self, request: &ScrapeRequest) -> Result<ScrapedPage, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable.iter().any(|u| u == &request.url) {
            return Err(ProviderError::NonRetryable {
                provider: self.name().to_string(),
                message: format!("HTTP 404 for {}", request.url),
            });
        }
        Ok(ScrapedPage {
            url: request.url.clone(),
            title: Some(format!("Article at {}", request.url)),
            text: format!(
                "The article at {} reports that adoption grew 42% in 2023.\n\
                 Researchers observed consistent results across three independent trials.",
                request.url
            ),
        })
    }
}

/// Extractor serving documents from an in-memory map.
#[derive(Default)]
pub struct MockExtractor {
    documents: HashMap<PathBuf, ExtractedDocument>,
    calls: AtomicUsize,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, path: impl Into<PathBuf>, document: ExtractedDocument) -> Self {
        self.documents.insert(path.into(), document);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Provider<ExtractRequest, ExtractedDocument> for MockExtractor {
    fn name(&self) -> &str {
        "mock_extractor"
    }

    async fn call(&self, request: &ExtractRequest) -> Result<ExtractedDocument, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.documents
            .get(&request.path)
            .cloned()
            .ok_or_else(|| ProviderError::NonRetryable {
                provider: self.name().to_string(),
                message: format!("unknown document {}", request.path.display()),
            })
    }
}

/// Provider of any kind that always fails with the same error.
pub struct FailingProvider {
    name: String,
    error: ProviderError,
    calls: AtomicUsize,
}

impl FailingProvider {
    pub fn new(name: &str, error: ProviderError) -> Self {
        Self {
            name: name.to_string(),
            error,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<Req, Out> Provider<Req, Out> for FailingProvider
where
    Req: Send + Sync + 'static,
    Out: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, _request: &Req) -> Result<Out, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(self.error.clone())
    }
}
