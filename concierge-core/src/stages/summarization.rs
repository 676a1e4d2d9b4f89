//! Source summarization.
//!
//! One generation call per unit of source text: a web page, a key document
//! section, or a whole document. A unit whose call fails is dropped with a
//! warning. Sources already summarized on the session are skipped, so an
//! interrupted run resumes where it stopped.

use futures::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CallError, PROMPT_CONTENT_CHARS, StageContext, StageOutput};
use crate::memory::{Session, SessionDelta};
use crate::parse::{ParseOutcome, first_number, labeled_fields, parse_structured, truncate_chars};
use crate::providers::{GenerationPurpose, ResponseFormat};
use crate::types::{SourceOrigin, SourceRecord, SourceSummary, Stage};

const FALLBACK_CLAIM_CHARS: usize = 200;
const FALLBACK_EVIDENCE_CHARS: usize = 300;
const FALLBACK_RELIABILITY: u8 = 50;

/// Text from one source that gets its own summary.
#[derive(Debug, Clone)]
struct Unit<'a> {
    source: &'a SourceRecord,
    section: Option<String>,
    text: String,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(default)]
    claim: String,
    #[serde(default)]
    evidence: String,
    #[serde(default, alias = "reliability")]
    reliability_score: Option<Value>,
}

/// Clamp a model-reported reliability into `0..=100`.
pub fn clamp_reliability(raw: f64) -> u8 {
    if raw.is_nan() {
        return FALLBACK_RELIABILITY;
    }
    raw.clamp(0.0, 100.0).round() as u8
}

fn reliability_of(value: Option<&Value>) -> u8 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => first_number(s),
        _ => None,
    };
    raw.map(clamp_reliability).unwrap_or(FALLBACK_RELIABILITY)
}

fn units_for<'a>(
    source: &'a SourceRecord,
    max_sections: usize,
    excerpt_chars: usize,
) -> Vec<Unit<'a>> {
    let mut units = Vec::new();
    if source.origin == SourceOrigin::Document {
        for (index, section) in source.sections.iter().take(max_sections).enumerate() {
            units.push(Unit {
                source,
                section: Some(
                    section
                        .heading
                        .clone()
                        .unwrap_or_else(|| format!("Section {}", index + 1)),
                ),
                text: truncate_chars(&section.text, excerpt_chars),
            });
        }
    }
    units.push(Unit {
        source,
        section: None,
        text: truncate_chars(&source.content, PROMPT_CONTENT_CHARS),
    });
    units
}

fn prompt(unit: &Unit<'_>) -> String {
    let origin = match unit.source.origin {
        SourceOrigin::Web => "web page",
        SourceOrigin::Document => "document",
    };
    let location = match &unit.section {
        Some(section) => format!("{} (section: {})", unit.source.uri, section),
        None => unit.source.uri.clone(),
    };
    format!(
        "Analyze this {origin} and extract its main claim, the supporting evidence, and a \
         reliability score from 0 to 100 based on the clarity of the evidence, the specificity \
         of the claims, and the presence of data or citations.\n\n\
         SOURCE: {location}\n\nCONTENT:\n{}\n\n\
         Respond with JSON using keys: claim, evidence, reliability_score.",
        unit.text
    )
}

fn to_summary(unit: &Unit<'_>, claim: String, evidence: String, reliability: u8) -> SourceSummary {
    SourceSummary {
        id: Uuid::new_v4(),
        source_id: unit.source.id,
        origin: unit.source.origin,
        uri: unit.source.uri.clone(),
        title: unit.source.title.clone(),
        section: unit.section.clone(),
        claim,
        evidence,
        reliability,
    }
}

/// Parse one response. Labeled `claim:` lines are tried after JSON; any other
/// non-empty answer falls back to the source text itself at neutral
/// reliability.
fn parse_summary(unit: &Unit<'_>, text: &str) -> ParseOutcome<SourceSummary> {
    let outcome = parse_structured(text, |raw| {
        let fields = labeled_fields(raw);
        if let Some(claim) = fields.get("claim") {
            let reliability = fields
                .get("reliability_score")
                .or_else(|| fields.get("reliability"))
                .map(|r| Value::String(r.clone()));
            return Some(SummaryResponse {
                claim: claim.clone(),
                evidence: fields.get("evidence").cloned().unwrap_or_default(),
                reliability_score: reliability,
            });
        }
        (!raw.trim().is_empty() && !unit.text.trim().is_empty()).then(|| SummaryResponse {
            claim: truncate_chars(unit.text.trim(), FALLBACK_CLAIM_CHARS),
            evidence: truncate_chars(unit.text.trim(), FALLBACK_EVIDENCE_CHARS),
            reliability_score: Some(Value::from(FALLBACK_RELIABILITY)),
        })
    });

    let build = |response: SummaryResponse| -> Option<SourceSummary> {
        let claim = response.claim.trim().to_string();
        if claim.is_empty() {
            return None;
        }
        let evidence = match response.evidence.trim() {
            "" => truncate_chars(unit.text.trim(), FALLBACK_EVIDENCE_CHARS),
            e => e.to_string(),
        };
        Some(to_summary(
            unit,
            claim,
            evidence,
            reliability_of(response.reliability_score.as_ref()),
        ))
    };

    match outcome {
        ParseOutcome::Parsed(r) => match build(r) {
            Some(s) => ParseOutcome::Parsed(s),
            None => ParseOutcome::Failed("response carried no claim".into()),
        },
        ParseOutcome::HeuristicParsed(r) => match build(r) {
            Some(s) => ParseOutcome::HeuristicParsed(s),
            None => ParseOutcome::Failed("response carried no claim".into()),
        },
        ParseOutcome::Failed(reason) => ParseOutcome::Failed(reason),
    }
}

/// Summarize every usable source not yet summarized on the session.
///
/// The output holds the session's earlier summaries followed by the new ones.
pub async fn summarize_sources(
    ctx: &StageContext<'_>,
    session: &Session,
    sources: &[SourceRecord],
) -> StageOutput<Vec<SourceSummary>> {
    let mut delta = SessionDelta::default();
    let done: HashSet<Uuid> = session.summaries.iter().map(|s| s.source_id).collect();
    let docs = &ctx.config.documents;

    let units: Vec<Unit<'_>> = sources
        .iter()
        .filter(|s| s.is_usable() && !done.contains(&s.id))
        .flat_map(|s| units_for(s, docs.max_sections_per_document, docs.section_excerpt_chars))
        .collect();
    let total = units.len();

    let limit = ctx.config.pipeline.max_concurrent_calls;
    let mut results = futures::stream::iter(units)
        .map(|unit| async move {
            let response = ctx
                .generate(GenerationPurpose::Summarize, ResponseFormat::Json, prompt(&unit))
                .await;
            (unit, response)
        })
        .buffered(limit);

    let mut attempted = 0;
    let mut timed_out = false;
    while let Some((unit, response)) = results.next().await {
        attempted += 1;
        let label = match &unit.section {
            Some(section) => format!("{} [{}]", unit.source.uri, section),
            None => unit.source.uri.clone(),
        };
        match response {
            Ok(text) => match parse_summary(&unit, &text) {
                ParseOutcome::Parsed(summary) => delta.summaries.push(summary),
                ParseOutcome::HeuristicParsed(summary) => {
                    debug!(source = %label, "Summary recovered heuristically");
                    delta.summaries.push(summary);
                }
                ParseOutcome::Failed(reason) => {
                    warn!(source = %label, reason = %reason, "Dropping unparseable summary");
                    delta.warn(
                        Stage::Summarization,
                        format!("summary of {label} dropped: {reason}"),
                    );
                }
            },
            Err(CallError::Deadline) => {
                timed_out = true;
                attempted -= 1;
                break;
            }
            Err(CallError::Provider(e)) => {
                warn!(source = %label, error = %e, "Dropping failed summary");
                delta.warn(Stage::Summarization, format!("summary of {label} dropped: {e}"));
            }
        }
    }

    if timed_out {
        delta.warn(
            Stage::Summarization,
            format!("summarization stopped at its deadline after {attempted} of {total} unit(s)"),
        );
    }
    info!(
        summaries = delta.summaries.len(),
        units = total,
        "Summarization finished"
    );

    let mut all = session.summaries.clone();
    all.extend(delta.summaries.iter().cloned());
    StageOutput::new(all, delta)
}
