//! Structural detectors: keyword activity and temporal sessions.

use std::collections::BTreeMap;

use chrono::Duration;

use devgraph_core::defaults::{HEURISTIC_CONFIDENCE_CAP, KEYWORD_CONFIDENCE_SATURATION};
use devgraph_core::temporal::{iso_week, split_sessions};
use devgraph_core::{DetectionMethod, EntitySummary, PatternType};

use super::{qualified_name, Candidate};

/// Confidence of a heuristic group: grows with size, capped below certainty.
pub fn heuristic_confidence(count: usize) -> f64 {
    (count as f64 / KEYWORD_CONFIDENCE_SATURATION).min(HEURISTIC_CONFIDENCE_CAP)
}

fn flagged(summary: &EntitySummary, pattern_type: PatternType) -> bool {
    match pattern_type {
        PatternType::Debugging => summary.signals.is_debugging,
        PatternType::Learning => summary.signals.is_learning,
        PatternType::Refactoring => summary.signals.is_refactoring,
        _ => false,
    }
}

/// Summaries flagged with one of `types`, grouped by (project, ISO week).
pub fn keyword_activity<'a>(
    summaries: &'a [EntitySummary],
    types: &[PatternType],
    min_frequency: usize,
) -> Vec<Candidate<'a>> {
    let mut out = Vec::new();
    for &pattern_type in types {
        let mut groups: BTreeMap<(Option<&str>, String), Vec<&EntitySummary>> = BTreeMap::new();
        for s in summaries.iter().filter(|s| flagged(s, pattern_type)) {
            groups
                .entry((s.project_name.as_deref(), iso_week(s.occurred_at)))
                .or_default()
                .push(s);
        }

        for ((project, week), members) in groups {
            if members.len() < min_frequency {
                continue;
            }
            let base = format!("{}-keyword-activity", pattern_type);
            out.push(Candidate {
                pattern_type,
                pattern_name: qualified_name(&base, project),
                project: project.map(str::to_string),
                period: week,
                confidence: heuristic_confidence(members.len()),
                method: DetectionMethod::KeywordHeuristic,
                avg_similarity: None,
                min_similarity: None,
                temporal_grouping: "iso_week",
                members,
            });
        }
    }
    out
}

/// Bursts of activity per project, split at gaps longer than `max_gap`.
pub fn temporal_sessions(
    summaries: &[EntitySummary],
    max_gap: Duration,
    min_frequency: usize,
) -> Vec<Candidate<'_>> {
    let mut projects: BTreeMap<Option<&str>, Vec<&EntitySummary>> = BTreeMap::new();
    for s in summaries {
        projects.entry(s.project_name.as_deref()).or_default().push(s);
    }

    let mut out = Vec::new();
    for (project, mut members) in projects {
        members.sort_by_key(|s| (s.occurred_at, s.entity_id));
        let times: Vec<_> = members.iter().map(|s| s.occurred_at).collect();

        for range in split_sessions(&times, max_gap) {
            if range.len() < min_frequency {
                continue;
            }
            let session: Vec<&EntitySummary> = members[range].to_vec();
            let start = session[0].occurred_at;
            let base = format!("temporal-session-{}", start.format("%Y%m%dT%H%M"));
            out.push(Candidate {
                pattern_type: PatternType::Temporal,
                pattern_name: qualified_name(&base, project),
                project: project.map(str::to_string),
                period: iso_week(start),
                confidence: heuristic_confidence(session.len()),
                method: DetectionMethod::TemporalSession,
                avg_similarity: None,
                min_similarity: None,
                temporal_grouping: "session",
                members: session,
            });
        }
    }
    out
}
