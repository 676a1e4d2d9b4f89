//! Property-based tests for core components using proptest.

use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

use concierge_core::config::ConciergeConfig;
use concierge_core::memory::{Session, SessionDelta};
use concierge_core::parse::{jaccard, keyword_set, truncate_chars};
use concierge_core::providers::mock::{MockExtractor, MockGenerator, MockScraper, MockSearch};
use concierge_core::providers::{GenerationPurpose, ProviderSet};
use concierge_core::quality::QualityLoop;
use concierge_core::resilience::{OperationClass, PolicySet, RateLimitPolicy, ResilienceAdapter, SlidingWindowLimiter};
use concierge_core::stages::StageContext;
use concierge_core::types::{
    Brief, FactCheckResult, IterationRecord, QualityScore, ResearchQuery, SourceOrigin,
    SourceRecord, SourceSummary, Stage, Verdict,
};
use uuid::Uuid;

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

// --- Rate limiter properties ---

proptest! {
    #[test]
    fn rate_limiter_never_exceeds_window(
        max_calls in 1usize..5,
        window_ms in 10u64..1000,
        extra in 1usize..8,
    ) {
        let rt = paused_runtime();
        let grants = rt.block_on(async {
            let limiter = SlidingWindowLimiter::new(OperationClass::Search);
            let policy = RateLimitPolicy {
                max_calls,
                window: Duration::from_millis(window_ms),
                permit_timeout: Duration::from_secs(3600),
            };
            let mut grants = Vec::new();
            for _ in 0..max_calls + extra {
                limiter.acquire(&policy).await.unwrap();
                grants.push(tokio::time::Instant::now());
            }
            grants
        });
        for i in 0..grants.len().saturating_sub(max_calls) {
            let span = grants[i + max_calls] - grants[i];
            prop_assert!(span >= Duration::from_millis(window_ms));
        }
    }
}

// --- Quality loop properties ---

fn evaluation(score: u8) -> String {
    format!(r#"{{"clarity": {score}, "correctness": {score}, "completeness": {score}}}"#)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn quality_loop_returns_best_and_stays_bounded(
        scores in prop::collection::vec(0u8..=100, 1..6),
        target in 50u8..=100,
        max_iterations in 1u32..6,
    ) {
        let rt = paused_runtime();
        let out = rt.block_on(async {
            let generator = Arc::new(MockGenerator::new());
            for s in &scores {
                generator.queue(GenerationPurpose::QualityEvaluation, evaluation(*s));
            }
            let providers = ProviderSet {
                search: vec![Arc::new(MockSearch::numbered(1))],
                scrape: vec![Arc::new(MockScraper::new())],
                extract: vec![Arc::new(MockExtractor::new())],
                generate: vec![generator],
            };
            let adapter = ResilienceAdapter::new(PolicySet::default());
            let config = ConciergeConfig::default();
            let query = ResearchQuery::new("property");
            let ctx = StageContext::new(
                &adapter,
                &providers,
                &config,
                &query,
                tokio::time::Instant::now() + Duration::from_secs(600),
            );
            let brief = Brief {
                version: 1,
                topic: "property".into(),
                executive_summary: "Initial".into(),
                ..Default::default()
            };
            QualityLoop::new(target, max_iterations)
                .run(&ctx, &Session::new(), brief)
                .await
        });

        let records = &out.delta.iterations;
        prop_assert!(out.output.iterations <= max_iterations);
        prop_assert_eq!(records.len() as u32, out.output.iterations);
        prop_assert!(records.windows(2).all(|w| w[0].index < w[1].index));

        let best = records
            .iter()
            .map(|r| r.score.overall)
            .fold(f64::MIN, f64::max);
        prop_assert_eq!(out.output.score.overall, best);
        let earliest = records.iter().find(|r| r.score.overall == best).unwrap();
        prop_assert_eq!(out.output.brief.version, earliest.index);
    }
}

// --- Session snapshot properties ---

fn populated_session(
    preferences: Vec<(String, String)>,
    source_count: usize,
    confidences: Vec<u8>,
    iteration_scores: Vec<u8>,
) -> Session {
    let mut session = Session::new();
    let mut delta = SessionDelta::default();
    for (k, v) in preferences {
        delta.preferences.insert(k, v);
    }
    for i in 0..source_count {
        let source = SourceRecord::new(SourceOrigin::Web, format!("https://s{i}.example"), format!("content {i}"));
        let summary = SourceSummary {
            id: Uuid::new_v4(),
            source_id: source.id,
            origin: SourceOrigin::Web,
            uri: source.uri.clone(),
            title: Some(format!("Source {i}")),
            section: None,
            claim: format!("Claim {i}"),
            evidence: format!("Evidence {i}"),
            reliability: (i * 7 % 101) as u8,
        };
        if let Some(c) = confidences.get(i) {
            delta.fact_checks.push(FactCheckResult {
                id: Uuid::new_v4(),
                summary_id: summary.id,
                claim: summary.claim.clone(),
                verdict: if c % 2 == 0 { Verdict::True } else { Verdict::Unverified },
                confidence: f64::from(*c) / 4.0,
                contradicts: Vec::new(),
                notes: String::new(),
            });
        }
        delta.summaries.push(summary);
        delta.sources.push(source);
    }
    for (i, s) in iteration_scores.iter().enumerate() {
        delta.iterations.push(IterationRecord {
            index: i as u32 + 1,
            brief: Brief {
                version: i as u32 + 1,
                topic: "topic".into(),
                ..Default::default()
            },
            score: QualityScore::new(*s, *s, *s, "feedback", 90),
            revised_for: None,
            recorded_at: chrono::Utc::now(),
        });
    }
    delta.warn(Stage::Gathering, "one branch timed out");
    session.apply(delta).unwrap();
    session
}

proptest! {
    #[test]
    fn snapshot_round_trips(
        preferences in prop::collection::vec(("[a-z]{1,8}", "[a-zA-Z0-9 ]{0,16}"), 0..5),
        source_count in 0usize..6,
        confidences in prop::collection::vec(0u8..=4, 0..6),
        iteration_scores in prop::collection::vec(0u8..=100, 0..4),
    ) {
        let session = populated_session(preferences, source_count, confidences, iteration_scores);
        let json = serde_json::to_string(&session.snapshot()).unwrap();
        let restored = Session::from_snapshot(serde_json::from_str(&json).unwrap()).unwrap();
        prop_assert_eq!(restored, session);
    }
}

// --- Text helper properties ---

proptest! {
    #[test]
    fn truncate_never_exceeds_limit(text in "\\PC{0,200}", max in 0usize..100) {
        let truncated = truncate_chars(&text, max);
        prop_assert!(truncated.chars().count() <= max);
        prop_assert!(text.starts_with(&truncated));
    }

    #[test]
    fn jaccard_is_symmetric_and_bounded(a in "[a-z ]{0,60}", b in "[a-z ]{0,60}") {
        let (sa, sb) = (keyword_set(&a), keyword_set(&b));
        let ab = jaccard(&sa, &sb);
        prop_assert_eq!(ab, jaccard(&sb, &sa));
        prop_assert!((0.0..=1.0).contains(&ab));
    }
}
