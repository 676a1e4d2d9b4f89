//! Quality loop.
//!
//! A state machine over brief versions:
//!
//! ```text
//! Evaluate ──overall >= target──────────────▶ Accepted
//!    │
//!    ├──evaluated < max──▶ Revise(lowest) ──▶ Evaluate
//!    │
//!    └──evaluated == max──────────────────────▶ BudgetExhausted
//! ```
//!
//! Every evaluated version is recorded on the session. The loop returns the
//! highest-scoring version it produced; on equal scores the earliest wins.
//! Versions whose score was assumed after a failed evaluation only win when
//! no version was actually scored.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::memory::{Session, SessionDelta};
use crate::parse::{ParseOutcome, first_number, labeled_fields, parse_structured, truncate_chars};
use crate::providers::{GenerationPurpose, ResponseFormat};
use crate::stages::synthesis::{MAX_DATA_POINTS, MAX_INSIGHTS, reliable_claims};
use crate::stages::{CallError, StageContext, StageOutput};
use crate::types::{
    Brief, DataPoint, IterationRecord, LoopTerminal, QualityDimension, QualityScore, QueryConfig,
    Stage, Verdict,
};

/// Per-dimension score assumed when an evaluation cannot be obtained.
pub const FALLBACK_DIMENSION_SCORE: u8 = 75;
/// Completeness revisions add data points only below this count.
const MIN_DATA_POINTS: usize = 5;
const EVIDENCE_POINT_CHARS: usize = 200;
const UNVERIFIED_MARK: &str = " (unverified)";

/// Where the loop goes after evaluating a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Accept,
    Revise(QualityDimension),
    Exhaust,
}

/// The transition table. `evaluated` counts versions scored so far in this
/// run, including the one just scored.
pub fn next_transition(score: &QualityScore, target: u8, evaluated: u32, max_iterations: u32) -> Transition {
    if score.overall >= f64::from(target) {
        Transition::Accept
    } else if evaluated < max_iterations {
        Transition::Revise(score.lowest_dimension())
    } else {
        Transition::Exhaust
    }
}

/// Index of the best-scoring version; the earliest on ties. Degraded scores
/// are ignored while any real score exists.
pub fn best_index(scores: &[QualityScore]) -> Option<usize> {
    let any_real = scores.iter().any(|s| !s.degraded);
    let mut best: Option<usize> = None;
    for (i, score) in scores.iter().enumerate() {
        if any_real && score.degraded {
            continue;
        }
        match best {
            Some(b) if scores[b].overall >= score.overall => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Result of one loop run.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub brief: Brief,
    pub score: QualityScore,
    /// Versions evaluated in this run.
    pub iterations: u32,
    pub terminal: LoopTerminal,
    /// The stage deadline cut the loop short.
    pub stopped_early: bool,
}

#[derive(Debug, Deserialize)]
struct EvaluationResponse {
    #[serde(alias = "clarity_score")]
    clarity: Value,
    #[serde(alias = "correctness_score", alias = "accuracy")]
    correctness: Value,
    #[serde(alias = "completeness_score")]
    completeness: Value,
    #[serde(default, alias = "comments", alias = "suggestions")]
    feedback: Value,
}

fn dimension_value(value: &Value) -> Option<u8> {
    let raw = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => first_number(s),
        _ => None,
    }?;
    (!raw.is_nan()).then(|| raw.clamp(0.0, 100.0).round() as u8)
}

fn feedback_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join("; "),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn labeled_evaluation(text: &str) -> Option<EvaluationResponse> {
    let fields = labeled_fields(text);
    let pick = |names: &[&str]| {
        names
            .iter()
            .find_map(|n| fields.get(*n))
            .map(|v| Value::String(v.clone()))
    };
    Some(EvaluationResponse {
        clarity: pick(&["clarity", "clarity_score"])?,
        correctness: pick(&["correctness", "correctness_score", "accuracy"])?,
        completeness: pick(&["completeness", "completeness_score"])?,
        feedback: pick(&["feedback", "comments"]).unwrap_or(Value::Null),
    })
}

fn render_brief(brief: &Brief) -> String {
    let insights: Vec<String> = brief
        .insights
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{}. {s}", i + 1))
        .collect();
    format!(
        "TOPIC: {}\n\nEXECUTIVE SUMMARY:\n{}\n\nKEY INSIGHTS:\n{}\n\n\
         Evidence rows: {}, data points: {}, glossary terms: {}, follow-up questions: {}, \
         noted contradictions: {}",
        brief.topic,
        brief.executive_summary,
        insights.join("\n"),
        brief.evidence.len(),
        brief.data_points.len(),
        brief.glossary.len(),
        brief.follow_up_questions.len(),
        brief.contradictions.len()
    )
}

fn evaluation_prompt(brief: &Brief) -> String {
    format!(
        "Evaluate this research brief. Score clarity, correctness and completeness from 0 to \
         100 and give short feedback on the weakest aspect.\n\n{}\n\n\
         Respond with JSON using keys: clarity, correctness, completeness, feedback.",
        render_brief(brief)
    )
}

/// The bounded evaluate/revise cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityLoop {
    target: u8,
    max_iterations: u32,
}

impl QualityLoop {
    pub fn new(target: u8, max_iterations: u32) -> Self {
        Self {
            target: target.min(100),
            max_iterations: max_iterations.max(1),
        }
    }

    pub fn from_query(config: &QueryConfig) -> Self {
        Self::new(config.quality_target, config.max_iterations)
    }

    pub fn target(&self) -> u8 {
        self.target
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Score one version. `None` means the stage deadline passed.
    async fn evaluate(
        &self,
        ctx: &StageContext<'_>,
        brief: &Brief,
        delta: &mut SessionDelta,
    ) -> Option<QualityScore> {
        let fallback = |delta: &mut SessionDelta, reason: String| {
            warn!(version = brief.version, reason = %reason, "Evaluation unavailable, assuming fallback score");
            delta.warn(
                Stage::Quality,
                format!(
                    "evaluation of version {} unavailable ({reason}); assumed {FALLBACK_DIMENSION_SCORE} on every dimension",
                    brief.version
                ),
            );
            QualityScore::assumed(FALLBACK_DIMENSION_SCORE, "", self.target)
        };

        let text = match ctx
            .generate(
                GenerationPurpose::QualityEvaluation,
                ResponseFormat::Json,
                evaluation_prompt(brief),
            )
            .await
        {
            Ok(text) => text,
            Err(CallError::Deadline) => return None,
            Err(CallError::Provider(e)) => return Some(fallback(delta, e.to_string())),
        };

        let response = match parse_structured(&text, labeled_evaluation) {
            ParseOutcome::Parsed(r) | ParseOutcome::HeuristicParsed(r) => r,
            ParseOutcome::Failed(reason) => return Some(fallback(delta, reason)),
        };
        match (
            dimension_value(&response.clarity),
            dimension_value(&response.correctness),
            dimension_value(&response.completeness),
        ) {
            (Some(clarity), Some(correctness), Some(completeness)) => Some(QualityScore::new(
                clarity,
                correctness,
                completeness,
                feedback_text(&response.feedback),
                self.target,
            )),
            _ => Some(fallback(delta, "non-numeric dimension score".into())),
        }
    }

    /// Produce the next version, targeting `dimension`.
    async fn revise(
        &self,
        ctx: &StageContext<'_>,
        session: &Session,
        brief: &Brief,
        dimension: QualityDimension,
        feedback: &str,
        delta: &mut SessionDelta,
    ) -> Result<Brief, CallError> {
        let mut next = brief.next_version();
        match dimension {
            QualityDimension::Clarity => {
                let prompt = format!(
                    "Rewrite this executive summary so it is clearer and better structured, \
                     keeping every fact.\n\nFEEDBACK: {}\n\nSUMMARY:\n{}",
                    if feedback.is_empty() { "improve clarity" } else { feedback },
                    brief.executive_summary
                );
                match ctx
                    .generate(GenerationPurpose::Revision, ResponseFormat::Text, prompt)
                    .await
                {
                    Ok(text) if !text.trim().is_empty() => {
                        next.executive_summary = text.trim().to_string();
                    }
                    Ok(_) => delta.warn(
                        Stage::Quality,
                        format!("clarity revision of version {} returned nothing", brief.version),
                    ),
                    Err(CallError::Deadline) => return Err(CallError::Deadline),
                    Err(CallError::Provider(e)) => delta.warn(
                        Stage::Quality,
                        format!("clarity revision of version {} failed: {e}", brief.version),
                    ),
                }
            }
            QualityDimension::Completeness => expand(&mut next, session),
            QualityDimension::Correctness => tighten(&mut next, session),
        }
        debug!(version = next.version, dimension = %dimension, "Brief revised");
        Ok(next)
    }

    /// Evaluate and revise until acceptance or the iteration budget is spent.
    pub async fn run(
        &self,
        ctx: &StageContext<'_>,
        session: &Session,
        initial: Brief,
    ) -> StageOutput<LoopOutcome> {
        let mut delta = SessionDelta::default();
        let mut brief = initial;
        brief.version = session.next_iteration_index();

        let mut versions: Vec<Brief> = Vec::new();
        let mut scores: Vec<QualityScore> = Vec::new();
        let mut revised_for: Option<QualityDimension> = None;
        let mut terminal = LoopTerminal::BudgetExhausted;
        let mut stopped_early = false;

        loop {
            let score = match self.evaluate(ctx, &brief, &mut delta).await {
                Some(score) => score,
                None if scores.is_empty() => {
                    delta.warn(
                        Stage::Quality,
                        "quality evaluation reached its deadline; version kept unscored",
                    );
                    QualityScore::assumed(FALLBACK_DIMENSION_SCORE, "", self.target)
                }
                None => {
                    stopped_early = true;
                    break;
                }
            };
            info!(
                version = brief.version,
                overall = score.overall,
                clarity = score.clarity,
                correctness = score.correctness,
                completeness = score.completeness,
                "Brief evaluated"
            );
            delta.iterations.push(IterationRecord {
                index: brief.version,
                brief: brief.clone(),
                score: score.clone(),
                revised_for,
                recorded_at: chrono::Utc::now(),
            });
            versions.push(brief.clone());
            scores.push(score.clone());

            let evaluated = scores.len() as u32;
            match next_transition(&score, self.target, evaluated, self.max_iterations) {
                Transition::Accept => {
                    terminal = LoopTerminal::Accepted;
                    break;
                }
                Transition::Exhaust => break,
                Transition::Revise(dimension) => {
                    match self
                        .revise(ctx, session, &brief, dimension, &score.feedback, &mut delta)
                        .await
                    {
                        Ok(next) => {
                            brief = next;
                            revised_for = Some(dimension);
                        }
                        Err(_) => {
                            stopped_early = true;
                            break;
                        }
                    }
                }
            }
        }

        let best = best_index(&scores).unwrap_or(0);
        let (brief, score) = match (versions.get(best), scores.get(best)) {
            (Some(b), Some(s)) => (b.clone(), s.clone()),
            _ => (brief, QualityScore::new(0, 0, 0, "", self.target)),
        };

        if stopped_early {
            delta.warn(
                Stage::Quality,
                format!(
                    "quality loop stopped at its deadline after {} version(s); returning version {} scoring {:.1}",
                    scores.len(),
                    brief.version,
                    score.overall
                ),
            );
        } else if terminal == LoopTerminal::BudgetExhausted {
            warn!(best_version = brief.version, overall = score.overall, "Quality budget exhausted");
            delta.warn(
                Stage::Quality,
                format!(
                    "Budget-Exhausted: target {} not reached after {} iteration(s); returning version {} scoring {:.1}",
                    self.target,
                    scores.len(),
                    brief.version,
                    score.overall
                ),
            );
        }

        StageOutput::new(
            LoopOutcome {
                brief,
                score,
                iterations: scores.len() as u32,
                terminal,
                stopped_early,
            },
            delta,
        )
    }
}

fn verdicts(session: &Session) -> HashMap<Uuid, Verdict> {
    session
        .fact_checks
        .iter()
        .map(|f| (f.summary_id, f.verdict))
        .collect()
}

/// Completeness revision: add reliable claims as insights and, when data is
/// thin, evidence excerpts as data points.
fn expand(brief: &mut Brief, session: &Session) {
    let verdicts = verdicts(session);
    let mut present: HashSet<String> = brief.insights.iter().map(|i| i.to_lowercase()).collect();
    for claim in reliable_claims(&session.summaries, &verdicts) {
        if brief.insights.len() >= MAX_INSIGHTS {
            break;
        }
        if present.insert(claim.to_lowercase()) {
            brief.insights.push(claim);
        }
    }

    if brief.data_points.len() < MIN_DATA_POINTS {
        let mut ranked: Vec<_> = session
            .summaries
            .iter()
            .filter(|s| verdicts.get(&s.id) != Some(&Verdict::False))
            .collect();
        ranked.sort_by(|a, b| b.reliability.cmp(&a.reliability));
        let mut seen: HashSet<String> = brief.data_points.iter().map(|d| d.value.clone()).collect();
        for summary in ranked {
            if brief.data_points.len() >= MAX_DATA_POINTS {
                break;
            }
            let value = truncate_chars(summary.evidence.trim(), EVIDENCE_POINT_CHARS);
            if !value.is_empty() && seen.insert(value.clone()) {
                brief.data_points.push(DataPoint {
                    value,
                    context: summary.claim.clone(),
                    source_uri: Some(summary.uri.clone()),
                });
            }
        }
    }
}

/// Correctness revision: drop insights refuted by verification and mark
/// the unverified ones.
fn tighten(brief: &mut Brief, session: &Session) {
    let verdicts = verdicts(session);
    let claims_with = |verdict: Verdict| -> Vec<String> {
        session
            .summaries
            .iter()
            .filter(|s| verdicts.get(&s.id) == Some(&verdict))
            .map(|s| s.claim.trim().to_lowercase())
            .collect()
    };
    let refuted = claims_with(Verdict::False);
    let unverified = claims_with(Verdict::Unverified);
    let matches = |insight: &str, claims: &[String]| {
        let lowered = insight.trim_end_matches(UNVERIFIED_MARK).trim().to_lowercase();
        claims
            .iter()
            .any(|c| !c.is_empty() && (lowered == *c || lowered.contains(c.as_str())))
    };

    brief.insights.retain(|i| !matches(i, &refuted));
    for insight in &mut brief.insights {
        if !insight.ends_with(UNVERIFIED_MARK) && matches(insight, &unverified) {
            insight.push_str(UNVERIFIED_MARK);
        }
    }
    brief
        .evidence
        .retain(|row| row.verdict != Some(Verdict::False));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::stages::test_support::Harness;
    use crate::types::{FactCheckResult, SourceOrigin, SourceRecord, SourceSummary};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn score(overall: u8) -> QualityScore {
        QualityScore::new(overall, overall, overall, "", 90)
    }

    fn scripted(h: &Harness, scores: &[(u8, u8, u8)]) {
        for (c, k, m) in scores {
            h.generator.queue(
                GenerationPurpose::QualityEvaluation,
                format!(r#"{{"clarity": {c}, "correctness": {k}, "completeness": {m}, "feedback": "tighten"}}"#),
            );
        }
    }

    fn brief() -> Brief {
        Brief {
            version: 1,
            topic: "grid storage".into(),
            executive_summary: "Storage is growing.".into(),
            insights: vec!["Storage is growing".into()],
            ..Default::default()
        }
    }

    fn session_with_claims() -> Session {
        let mut session = Session::new();
        let claims = [
            ("Lithium prices fell sharply", 90, Verdict::True),
            ("Sodium cells are already cheaper", 85, Verdict::False),
            ("Flow batteries last decades", 75, Verdict::Unverified),
        ];
        for (claim, reliability, verdict) in claims {
            let source = SourceRecord::new(SourceOrigin::Web, format!("https://{reliability}.example"), "text");
            let summary = SourceSummary {
                id: Uuid::new_v4(),
                source_id: source.id,
                origin: SourceOrigin::Web,
                uri: source.uri.clone(),
                title: None,
                section: None,
                claim: claim.into(),
                evidence: format!("Evidence that {claim}"),
                reliability,
            };
            session.fact_checks.push(FactCheckResult {
                id: Uuid::new_v4(),
                summary_id: summary.id,
                claim: claim.into(),
                verdict,
                confidence: 0.7,
                contradicts: Vec::new(),
                notes: String::new(),
            });
            session.summaries.push(summary);
            session.sources.push(source);
        }
        session
    }

    #[test]
    fn test_transition_table() {
        assert_eq!(next_transition(&score(90), 90, 1, 3), Transition::Accept);
        assert_eq!(
            next_transition(&QualityScore::new(60, 80, 70, "", 90), 90, 1, 3),
            Transition::Revise(QualityDimension::Clarity)
        );
        assert_eq!(next_transition(&score(89), 90, 3, 3), Transition::Exhaust);
        assert_eq!(next_transition(&score(100), 90, 3, 3), Transition::Accept);
    }

    #[test]
    fn test_best_index_prefers_earliest_tie() {
        assert_eq!(best_index(&[score(72), score(81), score(88)]), Some(2));
        assert_eq!(best_index(&[score(80), score(70), score(80)]), Some(0));
        assert_eq!(best_index(&[]), None);
    }

    #[tokio::test]
    async fn test_budget_exhausted_returns_best() {
        let h = Harness::new("unused");
        scripted(&h, &[(72, 72, 72), (81, 81, 81), (88, 88, 88)]);
        let out = QualityLoop::new(90, 3).run(&h.ctx(), &Session::new(), brief()).await;

        assert_eq!(out.output.terminal, LoopTerminal::BudgetExhausted);
        assert_eq!(out.output.iterations, 3);
        assert_eq!(out.output.score.overall, 88.0);
        assert_eq!(out.output.brief.version, 3);
        let indices: Vec<u32> = out.delta.iterations.iter().map(|r| r.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(
            out.delta
                .warnings
                .iter()
                .any(|w| w.message.starts_with("Budget-Exhausted"))
        );
    }

    #[tokio::test]
    async fn test_regression_keeps_earlier_version() {
        let h = Harness::new("unused");
        scripted(&h, &[(85, 85, 85), (70, 70, 70), (85, 85, 85)]);
        let out = QualityLoop::new(90, 3).run(&h.ctx(), &Session::new(), brief()).await;
        assert_eq!(out.output.brief.version, 1);
        assert_eq!(out.output.score.overall, 85.0);
    }

    #[tokio::test]
    async fn test_accepts_first_good_version() {
        let h = Harness::new("unused");
        let out = QualityLoop::new(90, 3).run(&h.ctx(), &Session::new(), brief()).await;
        assert_eq!(out.output.terminal, LoopTerminal::Accepted);
        assert_eq!(out.output.iterations, 1);
        assert_eq!(out.delta.iterations[0].revised_for, None);
        assert!(out.delta.warnings.is_empty());
        assert_eq!(h.generator.calls(GenerationPurpose::Revision), 0);
    }

    #[tokio::test]
    async fn test_clarity_revision_rewrites_summary() {
        let h = Harness::new("unused");
        scripted(&h, &[(60, 90, 90), (95, 95, 95)]);
        let out = QualityLoop::new(90, 3).run(&h.ctx(), &Session::new(), brief()).await;
        assert_eq!(out.output.terminal, LoopTerminal::Accepted);
        assert_eq!(out.output.brief.version, 2);
        assert_eq!(
            out.output.brief.executive_summary,
            "A clearer summary of the findings, revision 1."
        );
        assert_eq!(out.delta.iterations[1].revised_for, Some(QualityDimension::Clarity));
    }

    #[tokio::test]
    async fn test_failed_evaluation_assumes_fallback_score() {
        let h = Harness::new("unused");
        h.generator.queue_error(
            GenerationPurpose::QualityEvaluation,
            ProviderError::NonRetryable {
                provider: "mock_generator".into(),
                message: "blocked".into(),
            },
        );
        let out = QualityLoop::new(90, 1).run(&h.ctx(), &Session::new(), brief()).await;
        assert_eq!(out.output.score.overall, 75.0);
        assert_eq!(out.output.terminal, LoopTerminal::BudgetExhausted);
        assert_eq!(out.delta.warnings.len(), 2);
    }

    #[test]
    fn test_best_index_skips_assumed_scores() {
        let assumed = QualityScore::assumed(FALLBACK_DIMENSION_SCORE, "", 90);
        assert_eq!(best_index(&[assumed.clone(), score(70)]), Some(1));
        assert_eq!(best_index(&[assumed.clone(), assumed.clone()]), Some(0));
    }

    #[tokio::test]
    async fn test_real_score_beats_assumed_fallback() {
        let h = Harness::new("unused");
        h.generator.queue_error(
            GenerationPurpose::QualityEvaluation,
            ProviderError::NonRetryable {
                provider: "mock_generator".into(),
                message: "blocked".into(),
            },
        );
        scripted(&h, &[(70, 70, 70)]);
        let out = QualityLoop::new(90, 2).run(&h.ctx(), &Session::new(), brief()).await;

        assert_eq!(out.output.iterations, 2);
        assert!(out.delta.iterations[0].score.degraded);
        assert_eq!(out.output.brief.version, 2);
        assert_eq!(out.output.score.overall, 70.0);
        assert!(!out.output.score.degraded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_returns_best_version_so_far() {
        let h = Harness::new("unused");
        scripted(&h, &[(60, 90, 90)]);
        h.generator
            .delay_from(GenerationPurpose::QualityEvaluation, 2, Duration::from_secs(30));
        let ctx = h
            .ctx()
            .with_deadline(tokio::time::Instant::now() + Duration::from_secs(5));

        let out = QualityLoop::new(90, 3).run(&ctx, &Session::new(), brief()).await;

        assert!(out.output.stopped_early);
        assert_eq!(out.output.iterations, 1);
        assert_eq!(out.output.brief.version, 1);
        assert_eq!(out.output.score.overall, 80.0);
        assert_eq!(out.output.terminal, LoopTerminal::BudgetExhausted);
        assert_eq!(h.generator.calls(GenerationPurpose::QualityEvaluation), 2);
        assert!(
            out.delta
                .warnings
                .iter()
                .any(|w| w.message.starts_with("quality loop stopped at its deadline"))
        );
    }

    #[test]
    fn test_labeled_evaluation() {
        let parsed = labeled_evaluation("Clarity score: 70/100\nCorrectness: 80\nCompleteness: 65\nFeedback: add data").unwrap();
        assert_eq!(dimension_value(&parsed.clarity), Some(70));
        assert_eq!(dimension_value(&parsed.completeness), Some(65));
        assert_eq!(feedback_text(&parsed.feedback), "add data");
        assert!(labeled_evaluation("Clarity: 70").is_none());
    }

    #[test]
    fn test_completeness_revision_adds_claims_and_points() {
        let session = session_with_claims();
        let mut b = brief();
        expand(&mut b, &session);
        assert_eq!(
            b.insights,
            vec!["Storage is growing", "Lithium prices fell sharply", "Flow batteries last decades"]
        );
        assert_eq!(b.data_points.len(), 2);
        assert_eq!(b.data_points[0].value, "Evidence that Lithium prices fell sharply");
    }

    #[test]
    fn test_correctness_revision_drops_refuted() {
        let session = session_with_claims();
        let mut b = brief();
        b.insights = vec![
            "Lithium prices fell sharply".into(),
            "Sodium cells are already cheaper".into(),
            "Flow batteries last decades".into(),
        ];
        tighten(&mut b, &session);
        assert_eq!(
            b.insights,
            vec!["Lithium prices fell sharply", "Flow batteries last decades (unverified)"]
        );
        tighten(&mut b, &session);
        assert_eq!(b.insights[1], "Flow batteries last decades (unverified)");
    }

    #[test]
    fn test_quality_loop_bounds() {
        let l = QualityLoop::new(120, 0);
        assert_eq!(l.target(), 100);
        assert_eq!(l.max_iterations(), 1);
    }
}
