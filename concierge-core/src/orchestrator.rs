//! Pipeline orchestrator.
//!
//! Runs Intent → Gathering → Summarization → Verification → Synthesis →
//! Quality Loop against one session. Each stage runs under its own deadline
//! and degrades on its own when that passes. The pipeline deadline wraps the
//! whole sequence and cancels whatever is still in flight. Only input
//! exhaustion, configuration problems, the pipeline timeout and session
//! store failures end a run early. The session is closed whichever way the
//! run ends.

use std::sync::Arc;
use std::time::Instant as WallClock;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{ConciergeConfig, validate_query};
use crate::error::{ConfigError, FatalError};
use crate::memory::{MemoryStore, SessionDelta};
use crate::providers::ProviderSet;
use crate::quality::QualityLoop;
use crate::resilience::{ResilienceAdapter, deadline_after};
use crate::stages::{
    StageContext, extract_intent, gather_sources, summarize_sources, synthesize, verify_claims,
};
use crate::types::{PipelineOutcome, ResearchQuery, Stage};

pub struct Orchestrator {
    config: ConciergeConfig,
    providers: ProviderSet,
    adapter: ResilienceAdapter,
    memory: Arc<MemoryStore>,
}

impl Orchestrator {
    /// Validate the configuration and build the shared adapter and store.
    pub fn new(config: ConciergeConfig, providers: ProviderSet) -> Result<Self, FatalError> {
        config.validate()?;
        let adapter = ResilienceAdapter::new(config.resilience.policies());
        let memory = Arc::new(MemoryStore::new(&config.memory));
        Ok(Self {
            config,
            providers,
            adapter,
            memory,
        })
    }

    /// Share an existing session store.
    pub fn with_memory(mut self, memory: Arc<MemoryStore>) -> Self {
        self.memory = memory;
        self
    }

    pub fn config(&self) -> &ConciergeConfig {
        &self.config
    }

    pub fn adapter(&self) -> &ResilienceAdapter {
        &self.adapter
    }

    pub fn memory(&self) -> &Arc<MemoryStore> {
        &self.memory
    }

    fn validate(&self, query: &ResearchQuery) -> Result<(), ConfigError> {
        if query.question.trim().is_empty() {
            return Err(ConfigError::Invalid {
                message: "research question is empty".into(),
            });
        }
        validate_query(&query.config)?;
        self.providers.validate(!query.documents.is_empty())
    }

    /// Run the full pipeline in a fresh session.
    pub async fn run(&self, query: ResearchQuery) -> Result<PipelineOutcome, FatalError> {
        self.validate(&query)?;
        let evicted = self.memory.evict_stale();
        if !evicted.is_empty() {
            info!(count = evicted.len(), "Evicted stale sessions");
        }
        let session_id = self.memory.create();
        self.run_in_session(session_id, query).await
    }

    /// Run the pipeline in an existing session. Work already recorded on the
    /// session (intent, sources, summaries, fact checks) is reused.
    pub async fn run_in_session(
        &self,
        session_id: Uuid,
        query: ResearchQuery,
    ) -> Result<PipelineOutcome, FatalError> {
        self.validate(&query)?;
        let guard = self.memory.begin_run(session_id)?;
        self.memory.resume(session_id)?;

        let timeout = self.config.pipeline.pipeline_timeout();
        let started = WallClock::now();
        info!(
            session_id = %session_id,
            question = %query.question,
            documents = query.documents.len(),
            "Pipeline started"
        );

        let deadline = deadline_after(Instant::now(), timeout);
        let result = match tokio::time::timeout_at(deadline, self.pipeline(session_id, &query, deadline)).await
        {
            Ok(result) => result,
            Err(_) => Err(FatalError::PipelineTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        };

        if let Err(e) = self.memory.close(session_id) {
            warn!(session_id = %session_id, error = %e, "Failed to close session");
        }
        drop(guard);

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => info!(
                session_id = %session_id,
                elapsed_ms,
                overall = outcome.score.overall,
                iterations = outcome.iterations,
                warnings = outcome.warnings.len(),
                "Pipeline finished"
            ),
            Err(e) => error!(
                session_id = %session_id,
                elapsed_ms,
                code = e.code(),
                error = %e,
                "Pipeline failed"
            ),
        }
        result
    }

    fn commit(&self, session_id: Uuid, stage: Stage, delta: SessionDelta) -> Result<(), FatalError> {
        let warnings = delta.warnings.len();
        self.memory.update(session_id, delta)?;
        if warnings > 0 {
            warn!(session_id = %session_id, stage = %stage, warnings, "Stage degraded");
        }
        Ok(())
    }

    async fn pipeline(
        &self,
        session_id: Uuid,
        query: &ResearchQuery,
        deadline: Instant,
    ) -> Result<PipelineOutcome, FatalError> {
        let base = StageContext::new(&self.adapter, &self.providers, &self.config, query, deadline);
        // Stage deadlines are not clamped to the pipeline deadline: when that
        // passes first, the enclosing timeout cancels the stage outright.
        let stage_ctx = |stage: Stage| {
            base.with_deadline(deadline_after(Instant::now(), self.config.pipeline.stage_timeout(stage)))
        };

        let session = self.memory.get(session_id)?;
        let intent = extract_intent(&stage_ctx(Stage::Intent), &session, &query.question).await;
        self.commit(session_id, Stage::Intent, intent.delta)?;
        let intent = intent.output;

        let session = self.memory.get(session_id)?;
        let gathered = gather_sources(&stage_ctx(Stage::Gathering), &session, &intent).await;
        self.commit(session_id, Stage::Gathering, gathered.delta)?;
        let usable = gathered.output.iter().filter(|s| s.is_usable()).count();
        info!(
            session_id = %session_id,
            gathered = gathered.output.len(),
            usable,
            "Sources gathered"
        );
        if usable == 0 {
            return Err(FatalError::InputExhaustion {
                question: query.question.clone(),
            });
        }

        let session = self.memory.get(session_id)?;
        let summarized =
            summarize_sources(&stage_ctx(Stage::Summarization), &session, &session.sources).await;
        let mut delta = summarized.delta;
        if summarized.output.is_empty() {
            delta.warn(Stage::Summarization, "no source could be summarized");
        }
        self.commit(session_id, Stage::Summarization, delta)?;

        let session = self.memory.get(session_id)?;
        let verified =
            verify_claims(&stage_ctx(Stage::Verification), &session, &session.summaries).await;
        self.commit(session_id, Stage::Verification, verified.delta)?;
        let contradictions = verified.output.contradictions;

        let session = self.memory.get(session_id)?;
        let synthesized =
            synthesize(&stage_ctx(Stage::Synthesis), &session, &intent, &contradictions).await;
        self.commit(session_id, Stage::Synthesis, synthesized.delta)?;

        let session = self.memory.get(session_id)?;
        let quality = QualityLoop::from_query(&query.config)
            .run(&stage_ctx(Stage::Quality), &session, synthesized.output)
            .await;
        self.commit(session_id, Stage::Quality, quality.delta)?;
        let outcome = quality.output;

        let session = self.memory.get(session_id)?;
        Ok(PipelineOutcome {
            session_id,
            brief: outcome.brief,
            score: outcome.score,
            warnings: session.warnings,
            iterations: outcome.iterations,
            terminal: outcome.terminal,
        })
    }
}
