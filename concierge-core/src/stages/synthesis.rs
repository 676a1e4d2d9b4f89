//! Brief synthesis.
//!
//! Three generation calls produce the parts that need judgment: the
//! executive summary, the ranked insights, and the glossary with follow-up
//! questions. Data points, the evidence table and suggested reading are
//! derived deterministically from the session.

use regex::Regex;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::LazyLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{StageContext, StageOutput};
use crate::memory::{Session, SessionDelta};
use crate::parse::{ParseOutcome, labeled_fields, numbered_items, parse_structured, truncate_chars};
use crate::providers::{GenerationPurpose, ResponseFormat};
use crate::types::{
    Brief, DataPoint, EvidenceRow, Intent, ReadingItem, SourceSummary, Stage, Verdict,
};

pub const MAX_INSIGHTS: usize = 10;
pub const MAX_DATA_POINTS: usize = 10;
const MAX_GLOSSARY_TERMS: usize = 8;
const MAX_FOLLOW_UPS: usize = 7;
const MAX_READING: usize = 10;
const MAX_PROMPT_CLAIMS: usize = 15;
const DATA_CONTEXT_CHARS: usize = 50;
/// Reliability at or above which a claim counts as an insight on its own.
pub const RELIABLE_CLAIM: u8 = 70;

static DATA_POINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\$\s?\d[\d,]*(?:\.\d+)?(?:\s?(?:million|billion|trillion|[mbk]\b))?|\d+(?:\.\d+)?\s?%|\b(?:19|20)\d{2}\b|\b\d{1,3}(?:,\d{3})+(?:\.\d+)?\b|\b\d+\.\d+\b",
    )
    .expect("valid data point regex")
});

#[derive(Debug, Default, Deserialize)]
struct GlossaryResponse {
    #[serde(default)]
    glossary: BTreeMap<String, String>,
    #[serde(default, alias = "follow_ups", alias = "questions")]
    follow_up_questions: Vec<String>,
}

/// `Term: definition` lines become glossary entries; lines ending in `?`
/// become follow-up questions.
fn heuristic_glossary(text: &str) -> Option<GlossaryResponse> {
    let follow_up_questions: Vec<String> = text
        .lines()
        .map(|l| l.trim().trim_start_matches(|c: char| c == '-' || c == '*' || c.is_ascii_digit() || c == '.' || c == ')').trim())
        .filter(|l| l.ends_with('?'))
        .map(str::to_string)
        .collect();
    let glossary: BTreeMap<String, String> = labeled_fields(text)
        .into_iter()
        .filter(|(_, v)| !v.ends_with('?'))
        .collect();
    (!glossary.is_empty() || !follow_up_questions.is_empty()).then_some(GlossaryResponse {
        glossary,
        follow_up_questions,
    })
}

fn floor_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// Numeric facts in `text` (percentages, currency, years, large or decimal
/// numbers) with up to 50 characters of context on each side.
pub fn extract_data_points(text: &str, source_uri: Option<&str>) -> Vec<DataPoint> {
    DATA_POINT_RE
        .find_iter(text)
        .map(|m| {
            let start = floor_boundary(text, m.start().saturating_sub(DATA_CONTEXT_CHARS));
            let end = ceil_boundary(text, (m.end() + DATA_CONTEXT_CHARS).min(text.len()));
            DataPoint {
                value: m.as_str().trim().to_string(),
                context: text[start..end].split_whitespace().collect::<Vec<_>>().join(" "),
                source_uri: source_uri.map(str::to_string),
            }
        })
        .collect()
}

/// Most recent verdict per summary.
fn verdicts(session: &Session) -> HashMap<Uuid, Verdict> {
    session
        .fact_checks
        .iter()
        .map(|f| (f.summary_id, f.verdict))
        .collect()
}

/// Reliable claims not refuted by verification, most reliable first.
pub fn reliable_claims(summaries: &[SourceSummary], verdicts: &HashMap<Uuid, Verdict>) -> Vec<String> {
    let mut reliable: Vec<&SourceSummary> = summaries
        .iter()
        .filter(|s| s.reliability >= RELIABLE_CLAIM && verdicts.get(&s.id) != Some(&Verdict::False))
        .collect();
    reliable.sort_by(|a, b| b.reliability.cmp(&a.reliability));
    let mut seen = HashSet::new();
    reliable
        .into_iter()
        .map(|s| s.claim.trim().to_string())
        .filter(|c| seen.insert(c.to_lowercase()))
        .take(MAX_INSIGHTS)
        .collect()
}

fn claim_lines(summaries: &[SourceSummary], verdicts: &HashMap<Uuid, Verdict>) -> String {
    let mut ranked: Vec<&SourceSummary> = summaries.iter().collect();
    ranked.sort_by(|a, b| b.reliability.cmp(&a.reliability));
    ranked
        .iter()
        .take(MAX_PROMPT_CLAIMS)
        .map(|s| {
            let verdict = verdicts
                .get(&s.id)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "unchecked".to_string());
            format!("- {} (reliability {}, {verdict}; {})", s.claim, s.reliability, s.uri)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn narrative_prompt(intent: &Intent, claims: &str, contradictions: &[String]) -> String {
    let mut prompt = format!(
        "Write a concise executive summary (one or two paragraphs) on {} for a {} audience, \
         based on these findings:\n{claims}\n",
        intent.topic, intent.style
    );
    if !contradictions.is_empty() {
        prompt.push_str(&format!(
            "\nMention that sources disagree on:\n{}\n",
            contradictions.join("\n")
        ));
    }
    prompt
}

fn insight_prompt(intent: &Intent, claims: &str) -> String {
    format!(
        "Rank the most important insights about {} from these findings. \
         Respond with a numbered list of at most {MAX_INSIGHTS} insights, most important first.\n{claims}",
        intent.topic
    )
}

fn glossary_prompt(intent: &Intent, claims: &str) -> String {
    format!(
        "From these findings on {}, extract key technical terms with short definitions and \
         suggest follow-up research questions.\n{claims}\n\n\
         Respond with JSON using keys: glossary (object of term to definition, at most \
         {MAX_GLOSSARY_TERMS}), follow_up_questions (list, at most {MAX_FOLLOW_UPS}).",
        intent.topic
    )
}

/// Build the first brief version from the session's summaries and fact
/// checks.
pub async fn synthesize(
    ctx: &StageContext<'_>,
    session: &Session,
    intent: &Intent,
    contradictions: &[String],
) -> StageOutput<Brief> {
    let mut delta = SessionDelta::default();
    let summaries = &session.summaries;
    let verdicts = verdicts(session);
    let claims = claim_lines(summaries, &verdicts);
    let source_count = summaries
        .iter()
        .map(|s| s.source_id)
        .collect::<HashSet<_>>()
        .len();

    let (narrative, ranking, glossary) = tokio::join!(
        ctx.generate(
            GenerationPurpose::Narrative,
            ResponseFormat::Text,
            narrative_prompt(intent, &claims, contradictions),
        ),
        ctx.generate(
            GenerationPurpose::InsightRanking,
            ResponseFormat::NumberedList,
            insight_prompt(intent, &claims),
        ),
        ctx.generate(
            GenerationPurpose::GlossaryExtraction,
            ResponseFormat::Json,
            glossary_prompt(intent, &claims),
        ),
    );

    let executive_summary = match narrative {
        Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
        other => {
            let reason = match other {
                Err(e) => e.to_string(),
                Ok(_) => "empty response".to_string(),
            };
            warn!(reason = %reason, "Narrative generation failed, using template");
            delta.warn(Stage::Synthesis, format!("executive summary fell back to template: {reason}"));
            format!(
                "Research on {} compiled from {source_count} sources.",
                intent.topic
            )
        }
    };

    let ranked = match ranking {
        Ok(text) => numbered_items(&text),
        Err(e) => {
            warn!(error = %e, "Insight ranking failed");
            delta.warn(Stage::Synthesis, format!("insight ranking failed: {e}"));
            Vec::new()
        }
    };
    let insights: Vec<String> = if ranked.is_empty() {
        debug!("Using reliable claims as insights");
        reliable_claims(summaries, &verdicts)
    } else {
        ranked.into_iter().take(MAX_INSIGHTS).collect()
    };

    let extras = match glossary {
        Ok(text) => match parse_structured(&text, heuristic_glossary) {
            ParseOutcome::Parsed(g) | ParseOutcome::HeuristicParsed(g) => g,
            ParseOutcome::Failed(reason) => {
                delta.warn(Stage::Synthesis, format!("glossary response unparseable: {reason}"));
                GlossaryResponse::default()
            }
        },
        Err(e) => {
            delta.warn(Stage::Synthesis, format!("glossary extraction failed: {e}"));
            GlossaryResponse::default()
        }
    };
    let glossary: BTreeMap<String, String> = extras
        .glossary
        .into_iter()
        .filter(|(term, definition)| !term.trim().is_empty() && !definition.trim().is_empty())
        .take(MAX_GLOSSARY_TERMS)
        .collect();
    let mut follow_up_questions: Vec<String> = extras
        .follow_up_questions
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .take(MAX_FOLLOW_UPS)
        .collect();
    if follow_up_questions.is_empty() {
        follow_up_questions.push(format!("What are the latest developments in {}?", intent.topic));
    }

    let mut seen_values = HashSet::new();
    let data_points: Vec<DataPoint> = summaries
        .iter()
        .flat_map(|s| {
            let text = format!("{} {}", s.claim, s.evidence);
            extract_data_points(&text, Some(&s.uri))
        })
        .chain(
            session
                .sources
                .iter()
                .filter(|s| s.is_usable())
                .flat_map(|s| extract_data_points(&s.content, Some(&s.uri))),
        )
        .filter(|d| seen_values.insert(d.value.clone()))
        .take(MAX_DATA_POINTS)
        .collect();

    let evidence: Vec<EvidenceRow> = summaries
        .iter()
        .map(|s| EvidenceRow {
            summary_id: s.id,
            source_uri: s.uri.clone(),
            claim: s.claim.clone(),
            evidence: truncate_chars(&s.evidence, 300),
            reliability: s.reliability,
            verdict: verdicts.get(&s.id).copied(),
        })
        .collect();

    let mut best: HashMap<&str, &SourceSummary> = HashMap::new();
    for s in summaries {
        best.entry(s.uri.as_str())
            .and_modify(|b| {
                if s.reliability > b.reliability {
                    *b = s;
                }
            })
            .or_insert(s);
    }
    let mut suggested_reading: Vec<ReadingItem> = best
        .into_values()
        .map(|s| ReadingItem {
            uri: s.uri.clone(),
            title: s.title.clone(),
            reliability: s.reliability,
        })
        .collect();
    suggested_reading.sort_by(|a, b| b.reliability.cmp(&a.reliability).then_with(|| a.uri.cmp(&b.uri)));
    suggested_reading.truncate(MAX_READING);

    let brief = Brief {
        version: 1,
        topic: intent.topic.clone(),
        executive_summary,
        insights,
        evidence,
        data_points,
        glossary,
        contradictions: contradictions.to_vec(),
        suggested_reading,
        follow_up_questions,
    };
    info!(
        insights = brief.insights.len(),
        data_points = brief.data_points.len(),
        glossary = brief.glossary.len(),
        "Brief synthesized"
    );
    StageOutput::new(brief, delta)
}
