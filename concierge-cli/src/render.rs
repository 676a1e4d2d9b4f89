//! Markdown rendering of a finished pipeline run.

use concierge_core::types::{LoopTerminal, PipelineOutcome};
use std::fmt::Write;

/// Render the outcome as a markdown document.
pub fn outcome_markdown(outcome: &PipelineOutcome) -> String {
    let brief = &outcome.brief;
    let mut out = String::new();

    let _ = writeln!(out, "# {}\n", brief.topic);
    let _ = writeln!(out, "{}\n", brief.executive_summary);

    if !brief.insights.is_empty() {
        out.push_str("## Key Insights\n\n");
        for (i, insight) in brief.insights.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, insight);
        }
        out.push('\n');
    }

    if !brief.evidence.is_empty() {
        out.push_str("## Evidence\n\n| Claim | Source | Reliability | Verdict |\n|---|---|---|---|\n");
        for row in &brief.evidence {
            let verdict = row
                .verdict
                .map(|v| v.to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "| {} | {} | {} | {} |",
                escape_cell(&row.claim),
                escape_cell(&row.source_uri),
                row.reliability,
                verdict
            );
        }
        out.push('\n');
    }

    if !brief.data_points.is_empty() {
        out.push_str("## Data Points\n\n");
        for point in &brief.data_points {
            match &point.source_uri {
                Some(uri) => {
                    let _ = writeln!(out, "- **{}**: {} ({})", point.value, point.context, uri);
                }
                None => {
                    let _ = writeln!(out, "- **{}**: {}", point.value, point.context);
                }
            }
        }
        out.push('\n');
    }

    if !brief.contradictions.is_empty() {
        out.push_str("## Contradictions\n\n");
        for c in &brief.contradictions {
            let _ = writeln!(out, "- {}", c);
        }
        out.push('\n');
    }

    if !brief.glossary.is_empty() {
        out.push_str("## Glossary\n\n");
        for (term, definition) in &brief.glossary {
            let _ = writeln!(out, "- **{}**: {}", term, definition);
        }
        out.push('\n');
    }

    if !brief.suggested_reading.is_empty() {
        out.push_str("## Suggested Reading\n\n");
        for item in &brief.suggested_reading {
            let title = item.title.as_deref().unwrap_or(&item.uri);
            let _ = writeln!(out, "- [{}]({}) (reliability {})", title, item.uri, item.reliability);
        }
        out.push('\n');
    }

    if !brief.follow_up_questions.is_empty() {
        out.push_str("## Follow-up Questions\n\n");
        for q in &brief.follow_up_questions {
            let _ = writeln!(out, "- {}", q);
        }
        out.push('\n');
    }

    let terminal = match outcome.terminal {
        LoopTerminal::Accepted => "accepted",
        LoopTerminal::BudgetExhausted => "budget exhausted",
    };
    let _ = writeln!(
        out,
        "---\nQuality {:.1} (clarity {}, correctness {}, completeness {}), version {}, {} after {} iteration(s).",
        outcome.score.overall,
        outcome.score.clarity,
        outcome.score.correctness,
        outcome.score.completeness,
        brief.version,
        terminal,
        outcome.iterations
    );
    if outcome.score.degraded {
        out.push_str("Scores were assumed; no evaluation could be obtained.\n");
    }

    if !outcome.warnings.is_empty() {
        out.push_str("\nWarnings:\n");
        for w in &outcome.warnings {
            let _ = writeln!(out, "- [{}] {}", w.stage, w.message);
        }
    }
    out
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use concierge_core::types::{Brief, EvidenceRow, QualityScore, Stage, Verdict, Warning};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn outcome() -> PipelineOutcome {
        PipelineOutcome {
            session_id: Uuid::new_v4(),
            brief: Brief {
                version: 2,
                topic: "Heat pumps".into(),
                executive_summary: "Heat pumps are spreading.".into(),
                insights: vec!["Sales doubled".into()],
                evidence: vec![EvidenceRow {
                    summary_id: Uuid::new_v4(),
                    source_uri: "https://a.example".into(),
                    claim: "Sales | doubled".into(),
                    evidence: "Report".into(),
                    reliability: 80,
                    verdict: Some(Verdict::True),
                }],
                ..Default::default()
            },
            score: QualityScore::new(90, 90, 90, "good", 90),
            warnings: vec![Warning::new(Stage::Gathering, "web branch timed out")],
            iterations: 2,
            terminal: LoopTerminal::Accepted,
        }
    }

    #[test]
    fn test_renders_sections() {
        let md = outcome_markdown(&outcome());
        assert!(md.starts_with("# Heat pumps\n"));
        assert!(md.contains("1. Sales doubled"));
        assert!(md.contains("| Sales \\| doubled | https://a.example | 80 | true |"));
        assert!(md.contains("version 2, accepted after 2 iteration(s)"));
        assert!(md.contains("- [gathering] web branch timed out"));
        assert!(!md.contains("## Glossary"));
    }

    #[test]
    fn test_escape_cell() {
        assert_eq!(escape_cell("a|b\nc"), "a\\|b c");
    }
}
