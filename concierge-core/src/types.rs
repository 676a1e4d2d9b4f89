//! Core type definitions for the research pipeline.
//!
//! Defines the records that flow between stages: the query, the extracted
//! intent, gathered sources and their summaries, fact-check verdicts, brief
//! versions, and their quality scores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Numeric knobs supplied with a query.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub max_sources: usize,
    /// Overall score (0-100) at which a brief is accepted.
    pub quality_target: u8,
    pub max_iterations: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_sources: 10,
            quality_target: 90,
            max_iterations: 3,
        }
    }
}

/// A research request. Immutable once a run starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchQuery {
    pub question: String,
    #[serde(default)]
    pub documents: Vec<PathBuf>,
    #[serde(default)]
    pub config: QueryConfig,
}

impl ResearchQuery {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            documents: Vec::new(),
            config: QueryConfig::default(),
        }
    }

    pub fn with_document(mut self, path: impl Into<PathBuf>) -> Self {
        self.documents.push(path.into());
        self
    }

    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Quick,
    #[default]
    Standard,
    Deep,
}

impl Scope {
    /// Number of search queries the web branch issues for this scope.
    pub fn search_fanout(&self) -> usize {
        match self {
            Scope::Quick => 1,
            Scope::Standard => 3,
            Scope::Deep => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    Academic,
    #[default]
    Casual,
    Technical,
    Executive,
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Style::Academic => write!(f, "academic"),
            Style::Casual => write!(f, "casual"),
            Style::Technical => write!(f, "technical"),
            Style::Executive => write!(f, "executive"),
        }
    }
}

/// What the user is actually asking for. Produced once, read-only downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub topic: String,
    pub scope: Scope,
    pub style: Style,
    pub keywords: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceOrigin {
    Web,
    Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Complete,
    /// Only part of the content could be fetched (e.g. search snippet only).
    Partial,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSection {
    pub heading: Option<String>,
    pub text: String,
}

/// One gathered item. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: Uuid,
    pub origin: SourceOrigin,
    /// URL for web sources, file path for documents.
    pub uri: String,
    pub title: Option<String>,
    pub content: String,
    #[serde(default)]
    pub sections: Vec<SourceSection>,
    /// Page count for paged documents, section count otherwise.
    pub unit_count: Option<usize>,
    pub status: ExtractionStatus,
    pub gathered_at: DateTime<Utc>,
}

impl SourceRecord {
    pub fn new(origin: SourceOrigin, uri: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            origin,
            uri: uri.into(),
            title: None,
            content: content.into(),
            sections: Vec::new(),
            unit_count: None,
            status: ExtractionStatus::Complete,
            gathered_at: Utc::now(),
        }
    }

    pub fn is_usable(&self) -> bool {
        self.status != ExtractionStatus::Failed && !self.content.trim().is_empty()
    }
}

/// A claim derived from a source. Many summaries may point at one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSummary {
    pub id: Uuid,
    pub source_id: Uuid,
    pub origin: SourceOrigin,
    pub uri: String,
    pub title: Option<String>,
    /// Section heading when the summary covers a single document section.
    pub section: Option<String>,
    pub claim: String,
    pub evidence: String,
    /// 0-100.
    pub reliability: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    True,
    False,
    Unverified,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::True => write!(f, "true"),
            Verdict::False => write!(f, "false"),
            Verdict::Unverified => write!(f, "unverified"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactCheckResult {
    pub id: Uuid,
    /// The summary whose claim was checked.
    pub summary_id: Uuid,
    pub claim: String,
    pub verdict: Verdict,
    /// 0.0-1.0.
    pub confidence: f64,
    /// Summaries whose claims conflict with this one.
    #[serde(default)]
    pub contradicts: Vec<Uuid>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRow {
    pub summary_id: Uuid,
    pub source_uri: String,
    pub claim: String,
    pub evidence: String,
    pub reliability: u8,
    pub verdict: Option<Verdict>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub value: String,
    pub context: String,
    pub source_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingItem {
    pub uri: String,
    pub title: Option<String>,
    pub reliability: u8,
}

/// The synthesized research output. Each quality-loop iteration produces a
/// new version; earlier versions are never modified.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Brief {
    pub version: u32,
    pub topic: String,
    pub executive_summary: String,
    /// Ranked, most important first.
    pub insights: Vec<String>,
    pub evidence: Vec<EvidenceRow>,
    pub data_points: Vec<DataPoint>,
    pub glossary: BTreeMap<String, String>,
    pub contradictions: Vec<String>,
    pub suggested_reading: Vec<ReadingItem>,
    pub follow_up_questions: Vec<String>,
}

impl Brief {
    /// Copy of this brief numbered as the next version.
    pub fn next_version(&self) -> Brief {
        let mut next = self.clone();
        next.version = self.version + 1;
        next
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityDimension {
    Clarity,
    Correctness,
    Completeness,
}

impl fmt::Display for QualityDimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityDimension::Clarity => write!(f, "clarity"),
            QualityDimension::Correctness => write!(f, "correctness"),
            QualityDimension::Completeness => write!(f, "completeness"),
        }
    }
}

/// Evaluation of one brief version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub clarity: u8,
    pub correctness: u8,
    pub completeness: u8,
    /// Mean of the three dimensions.
    pub overall: f64,
    pub feedback: String,
    pub revision_needed: bool,
    /// Set when no evaluation could be obtained and the scores are assumed.
    #[serde(default)]
    pub degraded: bool,
}

impl QualityScore {
    pub fn new(
        clarity: u8,
        correctness: u8,
        completeness: u8,
        feedback: impl Into<String>,
        target: u8,
    ) -> Self {
        let clarity = clarity.min(100);
        let correctness = correctness.min(100);
        let completeness = completeness.min(100);
        let overall = (f64::from(clarity) + f64::from(correctness) + f64::from(completeness)) / 3.0;
        Self {
            clarity,
            correctness,
            completeness,
            overall,
            feedback: feedback.into(),
            revision_needed: overall < f64::from(target),
            degraded: false,
        }
    }

    /// Score assumed in place of a failed evaluation: `value` on every
    /// dimension, marked degraded.
    pub fn assumed(value: u8, feedback: impl Into<String>, target: u8) -> Self {
        Self {
            degraded: true,
            ..Self::new(value, value, value, feedback, target)
        }
    }

    pub fn dimension(&self, dimension: QualityDimension) -> u8 {
        match dimension {
            QualityDimension::Clarity => self.clarity,
            QualityDimension::Correctness => self.correctness,
            QualityDimension::Completeness => self.completeness,
        }
    }

    /// Lowest-scoring dimension. Ties resolve clarity, then correctness,
    /// then completeness.
    pub fn lowest_dimension(&self) -> QualityDimension {
        [
            QualityDimension::Clarity,
            QualityDimension::Correctness,
            QualityDimension::Completeness,
        ]
        .into_iter()
        .min_by_key(|d| self.dimension(*d))
        .unwrap_or(QualityDimension::Clarity)
    }
}

/// Pipeline stages, used to attribute warnings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Orchestrator,
    Intent,
    Gathering,
    Summarization,
    Verification,
    Synthesis,
    Quality,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Orchestrator => "orchestrator",
            Stage::Intent => "intent",
            Stage::Gathering => "gathering",
            Stage::Summarization => "summarization",
            Stage::Verification => "verification",
            Stage::Synthesis => "synthesis",
            Stage::Quality => "quality",
        };
        f.write_str(name)
    }
}

/// A non-fatal degradation recorded during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub stage: Stage,
    pub message: String,
}

impl Warning {
    pub fn new(stage: Stage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.stage, self.message)
    }
}

/// One evaluated brief version in a session's iteration history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// Equal to the brief's version; strictly increasing within a session.
    pub index: u32,
    pub brief: Brief,
    pub score: QualityScore,
    /// Dimension targeted by the revision that produced this version.
    pub revised_for: Option<QualityDimension>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopTerminal {
    Accepted,
    BudgetExhausted,
}

/// Result of a successful pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineOutcome {
    pub session_id: Uuid,
    pub brief: Brief,
    pub score: QualityScore,
    pub warnings: Vec<Warning>,
    /// Number of brief versions evaluated.
    pub iterations: u32,
    pub terminal: LoopTerminal,
}
