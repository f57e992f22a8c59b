//! Semantic clustering of summaries, bucketed by ISO week.

use std::collections::BTreeMap;

use devgraph_core::similarity::{cluster_by_similarity, ClusterConfig};
use devgraph_core::temporal::iso_week;
use devgraph_core::{DetectionMethod, EntitySummary, EntityType, PatternType};

use super::Candidate;

/// Signal-driven types in tie-break order.
const SIGNAL_TYPES: [PatternType; 5] = [
    PatternType::Debugging,
    PatternType::Learning,
    PatternType::Refactoring,
    PatternType::Architecture,
    PatternType::ProblemSolving,
];

fn has_signal(summary: &EntitySummary, pattern_type: PatternType) -> bool {
    let s = &summary.signals;
    match pattern_type {
        PatternType::Debugging => s.is_debugging,
        PatternType::Learning => s.is_learning,
        PatternType::Refactoring => s.is_refactoring,
        PatternType::Architecture => s.is_architecture,
        PatternType::ProblemSolving => s.is_problem_solving,
        _ => false,
    }
}

/// Type of a cluster: a signal held by a strict majority of members, else
/// `memory_code` for mixed clusters, else `semantic`.
pub fn classify(members: &[&EntitySummary]) -> PatternType {
    let majority = members.len() / 2 + 1;
    let best = SIGNAL_TYPES
        .iter()
        .map(|&t| (t, members.iter().filter(|s| has_signal(s, t)).count()))
        .filter(|(_, count)| *count >= majority)
        // max_by_key keeps the last maximum; reverse so earlier types win ties.
        .rev()
        .max_by_key(|(_, count)| *count);
    if let Some((t, _)) = best {
        return t;
    }

    let has_memory = members.iter().any(|s| s.entity_type == EntityType::Memory);
    let has_code = members.iter().any(|s| s.entity_type == EntityType::Code);
    if has_memory && has_code {
        PatternType::MemoryCode
    } else {
        PatternType::Semantic
    }
}

/// The project shared by every member, if any.
fn common_project(members: &[&EntitySummary]) -> Option<String> {
    let first = members.first()?.project_name.as_deref()?;
    members
        .iter()
        .all(|s| s.project_name.as_deref() == Some(first))
        .then(|| first.to_string())
}

/// Cluster name anchored on the smallest member entity id.
fn cluster_name(pattern_type: PatternType, members: &[&EntitySummary]) -> String {
    let anchor = members
        .iter()
        .map(|s| s.entity_id)
        .min()
        .map(|id| id.simple().to_string())
        .unwrap_or_default();
    format!("{}-cluster-{}", pattern_type, &anchor[..anchor.len().min(12)])
}

/// Threshold-connected clusters of at least `min_frequency` summaries per week.
pub fn detect(
    summaries: &[EntitySummary],
    threshold: f64,
    exact_pairwise_limit: usize,
    min_frequency: usize,
) -> Vec<Candidate<'_>> {
    let mut weeks: BTreeMap<String, Vec<&EntitySummary>> = BTreeMap::new();
    for s in summaries {
        weeks.entry(iso_week(s.occurred_at)).or_default().push(s);
    }

    let config = ClusterConfig::default()
        .with_threshold(threshold)
        .with_exact_pairwise_limit(exact_pairwise_limit);

    let mut out = Vec::new();
    for (week, bucket) in weeks {
        if bucket.len() < min_frequency {
            continue;
        }
        let vectors: Vec<&[f32]> = bucket.iter().map(|s| s.embedding.as_slice()).collect();
        for cluster in cluster_by_similarity(&vectors, &config) {
            if cluster.members.len() < min_frequency {
                continue;
            }
            let members: Vec<&EntitySummary> = cluster.members.iter().map(|&i| bucket[i]).collect();
            let pattern_type = classify(&members);
            out.push(Candidate {
                pattern_type,
                pattern_name: cluster_name(pattern_type, &members),
                project: common_project(&members),
                period: week.clone(),
                confidence: cluster.mean_similarity,
                method: DetectionMethod::SemanticCluster,
                avg_similarity: Some(cluster.mean_similarity),
                min_similarity: Some(cluster.min_similarity),
                temporal_grouping: "iso_week",
                members,
            });
        }
    }
    out
}
