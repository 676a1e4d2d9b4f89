//! Claim verification.
//!
//! Summaries are grouped by keyword overlap of their claims. Each candidate
//! claim is checked against the evidence of its group with one generation
//! call. Two claims in the same group conflict when their verdicts disagree,
//! when only one of them is negated, or when they cite different percentages.

use futures::StreamExt;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::LazyLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{CallError, StageContext, StageOutput};
use crate::memory::{Session, SessionDelta};
use crate::parse::{ParseOutcome, first_number, jaccard, keyword_set, labeled_fields, parse_structured, truncate_chars};
use crate::providers::{GenerationPurpose, ResponseFormat};
use crate::types::{FactCheckResult, SourceSummary, Stage, Verdict};

const MAX_GROUP_EVIDENCE: usize = 5;
const EVIDENCE_CHARS: usize = 300;
const DEFAULT_CONFIDENCE: f64 = 0.5;

const NEGATIONS: &[&str] = &["not", "no", "never", "none", "cannot", "neither", "nor", "without"];

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("valid percent regex"));

/// Output of the verification stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Verification {
    /// Every fact check on the session, earlier ones first.
    pub fact_checks: Vec<FactCheckResult>,
    /// Human-readable notes, one per conflicting pair of claims.
    pub contradictions: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FactCheckResponse {
    #[serde(default)]
    verdict: String,
    #[serde(default)]
    confidence: Option<Value>,
    #[serde(default, alias = "reasoning", alias = "notes")]
    explanation: String,
}

fn parse_verdict(value: &str) -> Option<Verdict> {
    match value.trim().trim_matches('.').to_lowercase().as_str() {
        "true" | "supported" | "verified" | "correct" | "confirmed" => Some(Verdict::True),
        "false" | "refuted" | "incorrect" | "contradicted" | "disputed" => Some(Verdict::False),
        "unverified" | "unknown" | "uncertain" | "insufficient" | "unclear" => {
            Some(Verdict::Unverified)
        }
        _ => None,
    }
}

/// Confidence in `0.0..=1.0`. Values above 1 are read as percentages.
pub fn normalize_confidence(raw: f64) -> f64 {
    if raw.is_nan() {
        return DEFAULT_CONFIDENCE;
    }
    let scaled = if raw > 1.0 { raw / 100.0 } else { raw };
    scaled.clamp(0.0, 1.0)
}

fn confidence_of(value: Option<&Value>) -> f64 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => first_number(s),
        _ => None,
    };
    raw.map(normalize_confidence).unwrap_or(DEFAULT_CONFIDENCE)
}

/// `verdict:` line if present, otherwise the first verdict word in the text.
fn heuristic_fact_check(text: &str) -> Option<FactCheckResponse> {
    let fields = labeled_fields(text);
    if let Some(verdict) = fields.get("verdict") {
        return Some(FactCheckResponse {
            verdict: verdict.clone(),
            confidence: fields.get("confidence").map(|c| Value::String(c.clone())),
            explanation: fields.get("explanation").cloned().unwrap_or_default(),
        });
    }
    let verdict = text
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| parse_verdict(w).is_some())?;
    Some(FactCheckResponse {
        verdict: verdict.to_string(),
        confidence: None,
        explanation: truncate_chars(text.trim(), EVIDENCE_CHARS),
    })
}

/// Greedy grouping by claim keyword overlap. A summary joins the first group
/// whose founding claim it overlaps by at least `threshold`.
pub fn group_by_similarity(summaries: &[SourceSummary], threshold: f64) -> Vec<Vec<usize>> {
    let sets: Vec<HashSet<String>> = summaries.iter().map(|s| keyword_set(&s.claim)).collect();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (index, set) in sets.iter().enumerate() {
        let home = groups
            .iter()
            .position(|g| jaccard(&sets[g[0]], set) >= threshold);
        match home {
            Some(g) => groups[g].push(index),
            None => groups.push(vec![index]),
        }
    }
    groups
}

fn is_negated(claim: &str) -> bool {
    claim
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .map(str::to_lowercase)
        .any(|w| NEGATIONS.contains(&w.as_str()) || w.ends_with("n't"))
}

fn percentages(claim: &str) -> BTreeSet<String> {
    PERCENT_RE
        .captures_iter(claim)
        .map(|c| c[1].to_string())
        .collect()
}

/// Why two claims of one group conflict, if they do.
fn conflict(
    a: &SourceSummary,
    b: &SourceSummary,
    verdicts: &HashMap<Uuid, Verdict>,
) -> Option<&'static str> {
    match (verdicts.get(&a.id), verdicts.get(&b.id)) {
        (Some(Verdict::True), Some(Verdict::False)) | (Some(Verdict::False), Some(Verdict::True)) => {
            return Some("opposing verdicts");
        }
        _ => {}
    }
    if is_negated(&a.claim) != is_negated(&b.claim) {
        return Some("one claim negates the other");
    }
    let (pa, pb) = (percentages(&a.claim), percentages(&b.claim));
    if !pa.is_empty() && !pb.is_empty() && pa.is_disjoint(&pb) {
        return Some("figures disagree");
    }
    None
}

fn prompt(candidate: &SourceSummary, evidence: &[&SourceSummary]) -> String {
    let listed: Vec<String> = evidence
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "{}. [{}] {}",
                i + 1,
                s.uri,
                truncate_chars(&s.evidence, EVIDENCE_CHARS)
            )
        })
        .collect();
    format!(
        "Fact-check this claim against the evidence gathered from related sources.\n\n\
         CLAIM: {}\n\nEVIDENCE:\n{}\n\n\
         Respond with JSON using keys: verdict (true|false|unverified), \
         confidence (0.0 to 1.0), explanation.",
        candidate.claim,
        listed.join("\n")
    )
}

fn unverified(candidate: &SourceSummary, notes: impl Into<String>) -> FactCheckResult {
    FactCheckResult {
        id: Uuid::new_v4(),
        summary_id: candidate.id,
        claim: candidate.claim.clone(),
        verdict: Verdict::Unverified,
        confidence: 0.0,
        contradicts: Vec::new(),
        notes: notes.into(),
    }
}

/// Check claims that have no fact check yet and detect conflicting claims.
pub async fn verify_claims(
    ctx: &StageContext<'_>,
    session: &Session,
    summaries: &[SourceSummary],
) -> StageOutput<Verification> {
    let mut delta = SessionDelta::default();
    let pipeline = &ctx.config.pipeline;
    let groups = group_by_similarity(summaries, pipeline.similarity_threshold);
    let group_of: HashMap<usize, usize> = groups
        .iter()
        .enumerate()
        .flat_map(|(g, members)| members.iter().map(move |m| (*m, g)))
        .collect();

    let checked: HashSet<Uuid> = session.fact_checks.iter().map(|f| f.summary_id).collect();
    let candidates: Vec<usize> = summaries
        .iter()
        .enumerate()
        .filter(|(_, s)| s.claim.chars().count() > pipeline.min_claim_chars && !checked.contains(&s.id))
        .map(|(i, _)| i)
        .take(pipeline.max_claims_to_verify)
        .collect();
    let total = candidates.len();
    debug!(groups = groups.len(), candidates = total, "Verifying claims");

    let mut checks = futures::stream::iter(candidates)
        .map(|index| {
            let candidate = &summaries[index];
            let evidence: Vec<&SourceSummary> = groups[group_of[&index]]
                .iter()
                .take(MAX_GROUP_EVIDENCE)
                .map(|m| &summaries[*m])
                .collect();
            let request = prompt(candidate, &evidence);
            async move {
                let response = ctx
                    .generate(GenerationPurpose::FactCheck, ResponseFormat::Json, request)
                    .await;
                (candidate, response)
            }
        })
        .buffered(pipeline.max_concurrent_calls);

    let mut fresh: Vec<FactCheckResult> = Vec::new();
    let mut timed_out = false;
    while let Some((candidate, response)) = checks.next().await {
        let result = match response {
            Ok(text) => match parse_structured(&text, heuristic_fact_check) {
                outcome @ (ParseOutcome::Parsed(_) | ParseOutcome::HeuristicParsed(_)) => {
                    let heuristic = outcome.is_heuristic();
                    let response = outcome.value();
                    match response.and_then(|r| parse_verdict(&r.verdict).map(|v| (v, r))) {
                        Some((verdict, r)) => {
                            if heuristic {
                                debug!(summary_id = %candidate.id, "Verdict recovered heuristically");
                            }
                            FactCheckResult {
                                id: Uuid::new_v4(),
                                summary_id: candidate.id,
                                claim: candidate.claim.clone(),
                                verdict,
                                confidence: confidence_of(r.confidence.as_ref()),
                                contradicts: Vec::new(),
                                notes: r.explanation.trim().to_string(),
                            }
                        }
                        None => {
                            delta.warn(
                                Stage::Verification,
                                format!("fact check of '{}' gave no verdict", candidate.claim),
                            );
                            unverified(candidate, "no verdict in response")
                        }
                    }
                }
                ParseOutcome::Failed(reason) => {
                    warn!(summary_id = %candidate.id, reason = %reason, "Unparseable fact check");
                    delta.warn(
                        Stage::Verification,
                        format!("fact check of '{}' unparseable: {reason}", candidate.claim),
                    );
                    unverified(candidate, "verification response unparseable")
                }
            },
            Err(CallError::Deadline) => {
                timed_out = true;
                break;
            }
            Err(CallError::Provider(e)) => {
                warn!(summary_id = %candidate.id, error = %e, "Fact check failed");
                delta.warn(
                    Stage::Verification,
                    format!("fact check of '{}' failed: {e}", candidate.claim),
                );
                unverified(candidate, "verification unavailable")
            }
        };
        fresh.push(result);
    }

    if timed_out {
        delta.warn(
            Stage::Verification,
            format!(
                "verification stopped at its deadline after {} of {total} claim(s)",
                fresh.len()
            ),
        );
    }

    let verdicts: HashMap<Uuid, Verdict> = session
        .fact_checks
        .iter()
        .chain(fresh.iter())
        .map(|f| (f.summary_id, f.verdict))
        .collect();

    let mut contradictions = Vec::new();
    let mut conflicting: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for members in &groups {
        for (i, &a) in members.iter().enumerate() {
            for &b in &members[i + 1..] {
                let (sa, sb) = (&summaries[a], &summaries[b]);
                if sa.source_id == sb.source_id {
                    continue;
                }
                if let Some(reason) = conflict(sa, sb, &verdicts) {
                    conflicting.entry(sa.id).or_default().push(sb.id);
                    conflicting.entry(sb.id).or_default().push(sa.id);
                    contradictions.push(format!(
                        "\"{}\" ({}) conflicts with \"{}\" ({}): {reason}",
                        sa.claim, sa.uri, sb.claim, sb.uri
                    ));
                }
            }
        }
    }
    for check in &mut fresh {
        if let Some(others) = conflicting.get(&check.summary_id) {
            check.contradicts = others.clone();
        }
    }

    info!(
        checked = fresh.len(),
        contradictions = contradictions.len(),
        "Verification finished"
    );

    let mut fact_checks = session.fact_checks.clone();
    fact_checks.extend(fresh.iter().cloned());
    delta.fact_checks = fresh;
    StageOutput::new(
        Verification {
            fact_checks,
            contradictions,
        },
        delta,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::stages::test_support::Harness;
    use crate::types::SourceOrigin;
    use pretty_assertions::assert_eq;

    fn summary(uri: &str, claim: &str) -> SourceSummary {
        SourceSummary {
            id: Uuid::new_v4(),
            source_id: Uuid::new_v4(),
            origin: SourceOrigin::Web,
            uri: uri.into(),
            title: None,
            section: None,
            claim: claim.into(),
            evidence: format!("Evidence for: {claim}"),
            reliability: 75,
        }
    }

    #[test]
    fn test_grouping_by_overlap() {
        let summaries = vec![
            summary("a", "Battery costs fell sharply during 2023"),
            summary("b", "Battery costs fell modestly during 2023"),
            summary("c", "Wind turbines grow taller every year"),
        ];
        assert_eq!(group_by_similarity(&summaries, 0.3), vec![vec![0, 1], vec![2]]);
        assert_eq!(group_by_similarity(&summaries, 0.95).len(), 3);
    }

    #[test]
    fn test_normalize_confidence() {
        assert_eq!(normalize_confidence(0.7), 0.7);
        assert_eq!(normalize_confidence(85.0), 0.85);
        assert_eq!(normalize_confidence(-1.0), 0.0);
        assert_eq!(normalize_confidence(900.0), 1.0);
    }

    #[test]
    fn test_conflict_heuristics() {
        let none = HashMap::new();
        let a = summary("a", "Battery costs fell 20% during 2023");
        let b = summary("b", "Battery costs did not fall during 2023");
        let c = summary("c", "Battery costs fell 35% during 2023");
        assert_eq!(conflict(&a, &b, &none), Some("one claim negates the other"));
        assert_eq!(conflict(&a, &c, &none), Some("figures disagree"));
        assert_eq!(conflict(&a, &a.clone(), &none), None);
    }

    #[test]
    fn test_heuristic_verdict_words() {
        let parsed = heuristic_fact_check("After review, the claim appears refuted by source 2.").unwrap();
        assert_eq!(parse_verdict(&parsed.verdict), Some(Verdict::False));
        assert!(heuristic_fact_check("I am not able to say").is_none());
    }

    #[tokio::test]
    async fn test_verifies_long_claims_only() {
        let h = Harness::new("unused");
        let summaries = vec![
            summary("https://a.example", "Solid electrolytes improve cell safety considerably"),
            summary("https://b.example", "Too short"),
        ];
        let out = verify_claims(&h.ctx(), &Session::new(), &summaries).await;
        assert_eq!(out.delta.fact_checks.len(), 1);
        let check = &out.output.fact_checks[0];
        assert_eq!(check.summary_id, summaries[0].id);
        assert_eq!(check.verdict, Verdict::True);
        assert_eq!(check.confidence, 0.8);
        assert!(out.output.contradictions.is_empty());
    }

    #[tokio::test]
    async fn test_opposing_verdicts_are_contradictions() {
        let mut h = Harness::new("unused");
        h.config.pipeline.max_concurrent_calls = 1;
        h.generator
            .queue(GenerationPurpose::FactCheck, r#"{"verdict": "true", "confidence": 0.9}"#)
            .queue(GenerationPurpose::FactCheck, r#"{"verdict": "false", "confidence": 0.7}"#);
        let summaries = vec![
            summary("https://a.example", "Grid batteries reduce peak electricity prices"),
            summary("https://b.example", "Grid batteries raise peak electricity prices"),
        ];
        let out = verify_claims(&h.ctx(), &Session::new(), &summaries).await;

        assert_eq!(out.output.contradictions.len(), 1);
        assert!(out.output.contradictions[0].contains("opposing verdicts"));
        let checks = &out.delta.fact_checks;
        assert_eq!(checks[0].contradicts, vec![summaries[1].id]);
        assert_eq!(checks[1].contradicts, vec![summaries[0].id]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_keeps_finished_checks() {
        let mut h = Harness::new("unused");
        h.config.pipeline.max_concurrent_calls = 1;
        h.generator
            .delay_from(GenerationPurpose::FactCheck, 2, std::time::Duration::from_secs(30));
        let summaries = vec![
            summary("https://a.example", "Offshore wind capacity doubled in northern Europe"),
            summary("https://b.example", "Heat pump sales slowed across southern markets"),
            summary("https://c.example", "Hydrogen buses remain costly for small cities"),
        ];
        let ctx = h
            .ctx()
            .with_deadline(tokio::time::Instant::now() + std::time::Duration::from_secs(5));

        let out = verify_claims(&ctx, &Session::new(), &summaries).await;

        assert_eq!(out.delta.fact_checks.len(), 1);
        assert_eq!(out.delta.fact_checks[0].summary_id, summaries[0].id);
        assert_eq!(out.delta.fact_checks[0].verdict, Verdict::True);
        assert_eq!(out.output.fact_checks.len(), 1);
        assert_eq!(out.delta.warnings.len(), 1);
        assert_eq!(
            out.delta.warnings[0].message,
            "verification stopped at its deadline after 1 of 3 claim(s)"
        );
    }

    #[tokio::test]
    async fn test_failed_check_is_unverified() {
        let h = Harness::new("unused");
        h.generator.queue_error(
            GenerationPurpose::FactCheck,
            ProviderError::NonRetryable {
                provider: "mock_generator".into(),
                message: "blocked".into(),
            },
        );
        let summaries = vec![summary("https://a.example", "Heat pumps work well below freezing")];
        let out = verify_claims(&h.ctx(), &Session::new(), &summaries).await;
        let check = &out.delta.fact_checks[0];
        assert_eq!(check.verdict, Verdict::Unverified);
        assert_eq!(check.confidence, 0.0);
        assert_eq!(out.delta.warnings.len(), 1);
        assert_eq!(out.delta.warnings[0].stage, Stage::Verification);
    }

    #[tokio::test]
    async fn test_claim_budget_respected() {
        let mut h = Harness::new("unused");
        h.config.pipeline.max_claims_to_verify = 2;
        let summaries: Vec<SourceSummary> = (0..5)
            .map(|i| summary(&format!("https://{i}.example"), &format!("Distinct claim number {i} about topic {i}")))
            .collect();
        let out = verify_claims(&h.ctx(), &Session::new(), &summaries).await;
        assert_eq!(out.delta.fact_checks.len(), 2);
        assert_eq!(h.generator.calls(GenerationPurpose::FactCheck), 2);
    }
}
