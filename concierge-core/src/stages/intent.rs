//! Intent extraction.
//!
//! One generation call turns the question into an [`Intent`]. This stage
//! never fails: unusable model output falls back to a deterministic keyword
//! heuristic over the question itself.

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{StageContext, StageOutput};
use crate::memory::{Session, SessionDelta};
use crate::parse::{ParseOutcome, first_words, keywords, labeled_fields, parse_structured, truncate_chars};
use crate::providers::{GenerationPurpose, ResponseFormat};
use crate::types::{Intent, Scope, Stage, Style};

const MAX_KEYWORDS: usize = 10;
const FALLBACK_KEYWORDS: usize = 5;
const MAX_TOPIC_CHARS: usize = 200;

const DEEP_MARKERS: &[&str] = &["deep", "comprehensive", "detailed", "thorough", "in-depth"];
const QUICK_MARKERS: &[&str] = &["quick", "brief", "overview", "summary"];

#[derive(Debug, Deserialize)]
struct IntentResponse {
    #[serde(default)]
    topic: String,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    style: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    constraints: Vec<String>,
}

impl IntentResponse {
    /// Fill gaps in the model's answer from the question.
    fn into_intent(self, question: &str) -> Intent {
        let topic = match self.topic.trim() {
            "" => truncate_chars(question.trim(), MAX_TOPIC_CHARS),
            t => t.to_string(),
        };
        let mut seen = std::collections::HashSet::new();
        let mut kws: Vec<String> = self
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty() && seen.insert(k.clone()))
            .take(MAX_KEYWORDS)
            .collect();
        if kws.is_empty() {
            kws = fallback_keywords(question);
        }
        Intent {
            topic,
            scope: self
                .scope
                .as_deref()
                .and_then(parse_scope)
                .unwrap_or_else(|| infer_scope(question)),
            style: self
                .style
                .as_deref()
                .and_then(parse_style)
                .unwrap_or_else(|| infer_style(question)),
            keywords: kws,
            constraints: self
                .constraints
                .into_iter()
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect(),
        }
    }
}

fn parse_scope(value: &str) -> Option<Scope> {
    match value.trim().to_lowercase().as_str() {
        "quick" | "brief" => Some(Scope::Quick),
        "standard" | "normal" | "moderate" => Some(Scope::Standard),
        "deep" | "comprehensive" | "thorough" => Some(Scope::Deep),
        _ => None,
    }
}

fn parse_style(value: &str) -> Option<Style> {
    match value.trim().to_lowercase().as_str() {
        "academic" | "scholarly" => Some(Style::Academic),
        "casual" | "conversational" | "general" => Some(Style::Casual),
        "technical" => Some(Style::Technical),
        "executive" | "business" => Some(Style::Executive),
        _ => None,
    }
}

fn has_any(words: &[String], markers: &[&str]) -> bool {
    words.iter().any(|w| markers.contains(&w.as_str()))
}

fn lowered_words(question: &str) -> Vec<String> {
    question
        .split(|c: char| !c.is_alphanumeric() && c != '-')
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn infer_scope(question: &str) -> Scope {
    let words = lowered_words(question);
    if has_any(&words, DEEP_MARKERS) {
        Scope::Deep
    } else if has_any(&words, QUICK_MARKERS) {
        Scope::Quick
    } else {
        Scope::Standard
    }
}

fn infer_style(question: &str) -> Style {
    let words = lowered_words(question);
    if has_any(&words, &["academic", "research", "scientific", "scholarly"]) {
        Style::Academic
    } else if has_any(&words, &["technical", "engineering", "implementation"]) {
        Style::Technical
    } else if has_any(&words, &["executive", "business", "management", "strategy"]) {
        Style::Executive
    } else {
        Style::Casual
    }
}

fn fallback_keywords(question: &str) -> Vec<String> {
    let kws = keywords(question, FALLBACK_KEYWORDS);
    if kws.is_empty() {
        first_words(question, FALLBACK_KEYWORDS)
    } else {
        kws
    }
}

/// Deterministic intent built from the question alone.
pub fn heuristic_intent(question: &str) -> Intent {
    Intent {
        topic: truncate_chars(question.trim(), MAX_TOPIC_CHARS),
        scope: infer_scope(question),
        style: infer_style(question),
        keywords: fallback_keywords(question),
        constraints: Vec::new(),
    }
}

/// Recover an intent from `topic: ...` style lines.
fn labeled_intent(text: &str) -> Option<IntentResponse> {
    let fields = labeled_fields(text);
    let topic = fields.get("topic")?.clone();
    Some(IntentResponse {
        topic,
        scope: fields.get("scope").cloned(),
        style: fields.get("style").cloned(),
        keywords: fields
            .get("keywords")
            .map(|k| {
                k.trim_matches(|c| c == '[' || c == ']')
                    .split(',')
                    .map(|s| s.trim().trim_matches('"').to_string())
                    .collect()
            })
            .unwrap_or_default(),
        constraints: Vec::new(),
    })
}

fn prompt(question: &str) -> String {
    format!(
        "Analyze this research request and describe what the user wants.\n\n\
         REQUEST: {question}\n\n\
         Respond with JSON using keys: topic (string), scope (quick|standard|deep), \
         style (academic|casual|technical|executive), keywords (list of up to 10 search terms), \
         constraints (list of explicit limits such as dates or regions)."
    )
}

/// Turn the question into an [`Intent`]. Reuses an intent already recorded
/// on the session.
pub async fn extract_intent(
    ctx: &StageContext<'_>,
    session: &Session,
    question: &str,
) -> StageOutput<Intent> {
    if let Some(intent) = &session.intent {
        debug!(session_id = %session.id, "Reusing recorded intent");
        return StageOutput::new(intent.clone(), SessionDelta::default());
    }

    let mut delta = SessionDelta::default().with_preference("question", question);
    let intent = match ctx
        .generate(GenerationPurpose::Intent, ResponseFormat::Json, prompt(question))
        .await
    {
        Ok(text) => match parse_structured(&text, labeled_intent) {
            ParseOutcome::Parsed(response) => response.into_intent(question),
            ParseOutcome::HeuristicParsed(response) => {
                debug!("Intent recovered from labeled fields");
                response.into_intent(question)
            }
            ParseOutcome::Failed(reason) => {
                warn!(reason = %reason, "Unparseable intent, using keyword fallback");
                delta.warn(
                    Stage::Intent,
                    format!("intent response unparseable ({reason}); used keyword fallback"),
                );
                heuristic_intent(question)
            }
        },
        Err(e) => {
            warn!(error = %e, "Intent generation failed, using keyword fallback");
            delta.warn(
                Stage::Intent,
                format!("intent extraction failed ({e}); used keyword fallback"),
            );
            heuristic_intent(question)
        }
    };

    info!(
        topic = %intent.topic,
        scope = ?intent.scope,
        style = %intent.style,
        keywords = intent.keywords.len(),
        "Intent extracted"
    );
    delta.preferences.insert("style".into(), intent.style.to_string());
    delta.intent = Some(intent.clone());
    StageOutput::new(intent, delta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::stages::test_support::Harness;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_heuristic_intent() {
        let intent = heuristic_intent("Give me a comprehensive academic review of perovskite solar cells");
        assert_eq!(intent.scope, Scope::Deep);
        assert_eq!(intent.style, Style::Academic);
        assert_eq!(
            intent.keywords,
            vec!["give", "comprehensive", "academic", "review", "perovskite"]
        );
    }

    #[test]
    fn test_infer_scope_quick_and_default() {
        assert_eq!(infer_scope("Quick overview of RISC-V"), Scope::Quick);
        assert_eq!(infer_scope("RISC-V adoption"), Scope::Standard);
        assert_eq!(infer_style("business case for RISC-V"), Style::Executive);
    }

    #[tokio::test]
    async fn test_parsed_intent() {
        let h = Harness::new("unused");
        h.generator.queue(
            GenerationPurpose::Intent,
            r#"{"topic": "Sodium-ion batteries", "scope": "deep", "style": "technical", "keywords": ["Sodium-ion", "cathode", "sodium-ion"]}"#,
        );
        let out = extract_intent(&h.ctx(), &Session::new(), "sodium-ion batteries").await;
        assert_eq!(out.output.topic, "Sodium-ion batteries");
        assert_eq!(out.output.scope, Scope::Deep);
        assert_eq!(out.output.style, Style::Technical);
        assert_eq!(out.output.keywords, vec!["sodium-ion", "cathode"]);
        assert_eq!(out.delta.intent.as_ref(), Some(&out.output));
        assert_eq!(out.delta.preferences["question"], "sodium-ion batteries");
        assert!(out.delta.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_labeled_response_is_heuristic_parsed() {
        let h = Harness::new("unused");
        h.generator.queue(
            GenerationPurpose::Intent,
            "Topic: Grid storage\nScope: quick\nKeywords: storage, grid",
        );
        let out = extract_intent(&h.ctx(), &Session::new(), "grid storage").await;
        assert_eq!(out.output.topic, "Grid storage");
        assert_eq!(out.output.scope, Scope::Quick);
        assert_eq!(out.output.keywords, vec!["storage", "grid"]);
        assert!(out.delta.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_garbage_falls_back_with_warning() {
        let h = Harness::new("unused");
        h.generator.queue(GenerationPurpose::Intent, "I cannot help with that.");
        let out = extract_intent(&h.ctx(), &Session::new(), "thorough survey of fusion startups").await;
        assert_eq!(out.output.scope, Scope::Deep);
        assert_eq!(out.output.topic, "thorough survey of fusion startups");
        assert_eq!(out.delta.warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_generation_failure_never_fatal() {
        let h = Harness::new("unused");
        for _ in 0..3 {
            h.generator.queue_error(
                GenerationPurpose::Intent,
                ProviderError::NonRetryable {
                    provider: "mock_generator".into(),
                    message: "HTTP 400".into(),
                },
            );
        }
        let out = extract_intent(&h.ctx(), &Session::new(), "heat pumps in cold climates").await;
        assert_eq!(out.output.keywords, vec!["heat", "pumps", "cold", "climates"]);
        assert_eq!(out.delta.warnings[0].stage, Stage::Intent);
    }

    #[tokio::test]
    async fn test_reuses_recorded_intent() {
        let h = Harness::new("unused");
        let mut session = Session::new();
        session.intent = Some(heuristic_intent("recorded question"));
        let out = extract_intent(&h.ctx(), &session, "ignored").await;
        assert_eq!(out.output.topic, "recorded question");
        assert!(out.delta.is_empty());
        assert_eq!(h.generator.calls(GenerationPurpose::Intent), 0);
    }
}
