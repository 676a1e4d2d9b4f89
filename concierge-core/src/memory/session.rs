//! Session state and the deltas stages produce against it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

use crate::error::MemoryError;
use crate::types::{FactCheckResult, Intent, IterationRecord, SourceRecord, SourceSummary, Stage, Warning};

/// Snapshot format written by this version.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Closed,
}

/// Accumulated state for one research run.
///
/// Collections are append-only. `preferences` and `intent` are replaced
/// wholesale when a delta carries a value for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Scalar research context (question, style overrides, notes).
    #[serde(default)]
    pub preferences: BTreeMap<String, String>,
    #[serde(default)]
    pub intent: Option<Intent>,
    #[serde(default)]
    pub sources: Vec<SourceRecord>,
    #[serde(default)]
    pub summaries: Vec<SourceSummary>,
    #[serde(default)]
    pub fact_checks: Vec<FactCheckResult>,
    #[serde(default)]
    pub iterations: Vec<IterationRecord>,
    #[serde(default)]
    pub warnings: Vec<Warning>,
}

impl Session {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            preferences: BTreeMap::new(),
            intent: None,
            sources: Vec::new(),
            summaries: Vec::new(),
            fact_checks: Vec::new(),
            iterations: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.status == SessionStatus::Closed
    }

    pub fn source(&self, id: Uuid) -> Option<&SourceRecord> {
        self.sources.iter().find(|s| s.id == id)
    }

    pub fn summary(&self, id: Uuid) -> Option<&SourceSummary> {
        self.summaries.iter().find(|s| s.id == id)
    }

    /// Index the next iteration record must carry.
    pub fn next_iteration_index(&self) -> u32 {
        self.iterations.last().map(|i| i.index + 1).unwrap_or(1)
    }

    /// Apply a delta atomically: either every part is accepted or the session
    /// is left untouched.
    pub fn apply(&mut self, delta: SessionDelta) -> Result<(), MemoryError> {
        if self.is_closed() {
            return Err(MemoryError::SessionClosed { id: self.id });
        }
        self.check(&delta)?;

        let SessionDelta {
            preferences,
            intent,
            sources,
            summaries,
            fact_checks,
            iterations,
            warnings,
        } = delta;

        self.preferences.extend(preferences);
        if intent.is_some() {
            self.intent = intent;
        }
        self.sources.extend(sources);
        self.summaries.extend(summaries);
        self.fact_checks.extend(fact_checks);
        self.iterations.extend(iterations);
        self.warnings.extend(warnings);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Reject deltas whose references point outside the session or whose
    /// iteration indices do not strictly increase.
    fn check(&self, delta: &SessionDelta) -> Result<(), MemoryError> {
        let source_ids: HashSet<Uuid> = self
            .sources
            .iter()
            .chain(&delta.sources)
            .map(|s| s.id)
            .collect();
        for summary in &delta.summaries {
            if !source_ids.contains(&summary.source_id) {
                return Err(MemoryError::DanglingReference {
                    kind: "summary",
                    id: summary.id,
                });
            }
        }

        let summary_ids: HashSet<Uuid> = self
            .summaries
            .iter()
            .chain(&delta.summaries)
            .map(|s| s.id)
            .collect();
        for check in &delta.fact_checks {
            let known = summary_ids.contains(&check.summary_id)
                && check.contradicts.iter().all(|id| summary_ids.contains(id));
            if !known {
                return Err(MemoryError::DanglingReference {
                    kind: "fact check",
                    id: check.id,
                });
            }
        }

        let mut last = self.iterations.last().map(|i| i.index);
        for record in &delta.iterations {
            if let Some(last) = last {
                if record.index <= last {
                    return Err(MemoryError::NonMonotonicIteration {
                        last,
                        got: record.index,
                    });
                }
            }
            last = Some(record.index);
        }
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            taken_at: Utc::now(),
            session: self.clone(),
        }
    }

    /// Rebuild a session from a snapshot, re-checking every reference.
    pub fn from_snapshot(snapshot: SessionSnapshot) -> Result<Self, MemoryError> {
        if snapshot.format_version != SNAPSHOT_FORMAT_VERSION {
            return Err(MemoryError::SnapshotVersion {
                found: snapshot.format_version,
                expected: SNAPSHOT_FORMAT_VERSION,
            });
        }
        let session = snapshot.session;
        let empty = Session {
            sources: Vec::new(),
            summaries: Vec::new(),
            fact_checks: Vec::new(),
            iterations: Vec::new(),
            ..session.clone()
        };
        empty.check(&SessionDelta {
            sources: session.sources.clone(),
            summaries: session.summaries.clone(),
            fact_checks: session.fact_checks.clone(),
            iterations: session.iterations.clone(),
            ..SessionDelta::default()
        })?;
        Ok(session)
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            status: self.status,
            created_at: self.created_at,
            updated_at: self.updated_at,
            topic: self.intent.as_ref().map(|i| i.topic.clone()),
            sources: self.sources.len(),
            summaries: self.summaries.len(),
            fact_checks: self.fact_checks.len(),
            iterations: self.iterations.len(),
            warnings: self.warnings.len(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Changes a stage wants applied to its session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionDelta {
    pub preferences: BTreeMap<String, String>,
    pub intent: Option<Intent>,
    pub sources: Vec<SourceRecord>,
    pub summaries: Vec<SourceSummary>,
    pub fact_checks: Vec<FactCheckResult>,
    pub iterations: Vec<IterationRecord>,
    pub warnings: Vec<Warning>,
}

impl SessionDelta {
    pub fn is_empty(&self) -> bool {
        self.preferences.is_empty()
            && self.intent.is_none()
            && self.sources.is_empty()
            && self.summaries.is_empty()
            && self.fact_checks.is_empty()
            && self.iterations.is_empty()
            && self.warnings.is_empty()
    }

    pub fn with_preference(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.preferences.insert(key.into(), value.into());
        self
    }

    pub fn warn(&mut self, stage: Stage, message: impl Into<String>) {
        self.warnings.push(Warning::new(stage, message));
    }

    /// Fold `other` into this delta, keeping append order.
    pub fn merge(&mut self, other: SessionDelta) {
        self.preferences.extend(other.preferences);
        if other.intent.is_some() {
            self.intent = other.intent;
        }
        self.sources.extend(other.sources);
        self.summaries.extend(other.summaries);
        self.fact_checks.extend(other.fact_checks);
        self.iterations.extend(other.iterations);
        self.warnings.extend(other.warnings);
    }
}

/// Serializable, independently reloadable session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub format_version: u32,
    pub taken_at: DateTime<Utc>,
    pub session: Session,
}

/// Lightweight view used when listing sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub topic: Option<String>,
    pub sources: usize,
    pub summaries: usize,
    pub fact_checks: usize,
    pub iterations: usize,
    pub warnings: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Brief, QualityScore, SourceOrigin, Verdict};
    use pretty_assertions::assert_eq;

    fn summary_for(source: &SourceRecord) -> SourceSummary {
        SourceSummary {
            id: Uuid::new_v4(),
            source_id: source.id,
            origin: source.origin,
            uri: source.uri.clone(),
            title: None,
            section: None,
            claim: "Sodium cells cost less per kWh".into(),
            evidence: "Reported pack prices fell".into(),
            reliability: 70,
        }
    }

    fn check_for(summary: &SourceSummary) -> FactCheckResult {
        FactCheckResult {
            id: Uuid::new_v4(),
            summary_id: summary.id,
            claim: summary.claim.clone(),
            verdict: Verdict::True,
            confidence: 0.9,
            contradicts: Vec::new(),
            notes: String::new(),
        }
    }

    fn iteration(index: u32) -> IterationRecord {
        IterationRecord {
            index,
            brief: Brief {
                version: index,
                ..Brief::default()
            },
            score: QualityScore::new(80, 80, 80, "", 90),
            revised_for: None,
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_apply_appends_in_one_delta() {
        let mut session = Session::new();
        let source = SourceRecord::new(SourceOrigin::Web, "https://a.example", "text");
        let summary = summary_for(&source);
        let check = check_for(&summary);

        session
            .apply(SessionDelta {
                sources: vec![source],
                summaries: vec![summary],
                fact_checks: vec![check],
                ..SessionDelta::default()
            })
            .unwrap();
        assert_eq!(session.sources.len(), 1);
        assert_eq!(session.summaries.len(), 1);
        assert_eq!(session.fact_checks.len(), 1);
    }

    #[test]
    fn test_dangling_summary_rejected_without_partial_apply() {
        let mut session = Session::new();
        let orphan = summary_for(&SourceRecord::new(SourceOrigin::Web, "https://x", "x"));
        let good = SourceRecord::new(SourceOrigin::Web, "https://a.example", "text");

        let err = session
            .apply(SessionDelta {
                sources: vec![good],
                summaries: vec![orphan],
                ..SessionDelta::default()
            })
            .unwrap_err();
        assert!(matches!(err, MemoryError::DanglingReference { kind: "summary", .. }));
        assert!(session.sources.is_empty());
    }

    #[test]
    fn test_fact_check_contradiction_must_exist() {
        let mut session = Session::new();
        let source = SourceRecord::new(SourceOrigin::Web, "https://a.example", "text");
        let summary = summary_for(&source);
        let mut check = check_for(&summary);
        check.contradicts.push(Uuid::new_v4());

        let err = session
            .apply(SessionDelta {
                sources: vec![source],
                summaries: vec![summary],
                fact_checks: vec![check],
                ..SessionDelta::default()
            })
            .unwrap_err();
        assert!(matches!(err, MemoryError::DanglingReference { kind: "fact check", .. }));
    }

    #[test]
    fn test_iterations_must_increase() {
        let mut session = Session::new();
        session
            .apply(SessionDelta {
                iterations: vec![iteration(1), iteration(2)],
                ..SessionDelta::default()
            })
            .unwrap();
        assert_eq!(session.next_iteration_index(), 3);

        let err = session
            .apply(SessionDelta {
                iterations: vec![iteration(2)],
                ..SessionDelta::default()
            })
            .unwrap_err();
        assert!(matches!(err, MemoryError::NonMonotonicIteration { last: 2, got: 2 }));
    }

    #[test]
    fn test_closed_session_rejects_updates() {
        let mut session = Session::new();
        session.status = SessionStatus::Closed;
        let err = session
            .apply(SessionDelta::default().with_preference("style", "technical"))
            .unwrap_err();
        assert!(matches!(err, MemoryError::SessionClosed { .. }));
    }

    #[test]
    fn test_preferences_are_replaced() {
        let mut session = Session::new();
        session
            .apply(SessionDelta::default().with_preference("style", "casual"))
            .unwrap();
        session
            .apply(SessionDelta::default().with_preference("style", "academic"))
            .unwrap();
        assert_eq!(session.preferences["style"], "academic");
    }

    #[test]
    fn test_snapshot_round_trip_through_json() {
        let mut session = Session::new();
        let source = SourceRecord::new(SourceOrigin::Document, "/tmp/paper.pdf", "body");
        let summary = summary_for(&source);
        session
            .apply(SessionDelta {
                sources: vec![source],
                summaries: vec![summary.clone()],
                fact_checks: vec![check_for(&summary)],
                iterations: vec![iteration(1)],
                ..SessionDelta::default()
            })
            .unwrap();

        let json = serde_json::to_string(&session.snapshot()).unwrap();
        let restored = Session::from_snapshot(serde_json::from_str(&json).unwrap()).unwrap();
        assert_eq!(restored, session);
    }

    #[test]
    fn test_snapshot_version_checked() {
        let mut snapshot = Session::new().snapshot();
        snapshot.format_version = 99;
        let err = Session::from_snapshot(snapshot).unwrap_err();
        assert!(matches!(err, MemoryError::SnapshotVersion { found: 99, expected: 1 }));
    }

    #[test]
    fn test_delta_merge_keeps_order() {
        let mut first = SessionDelta::default();
        first.warn(Stage::Gathering, "web branch timed out");
        let mut second = SessionDelta::default();
        second.warn(Stage::Gathering, "document unreadable");
        first.merge(second);
        let messages: Vec<&str> = first.warnings.iter().map(|w| w.message.as_str()).collect();
        assert_eq!(messages, vec!["web branch timed out", "document unreadable"]);
        assert!(!first.is_empty());
    }
}
