//! Pattern detection over EntitySummary nodes.
//!
//! Detectors are pure functions from a slice of summaries to [`Candidate`]s.
//! The [`PatternEngine`] selects the summaries in scope, runs the detectors a
//! trigger asks for, and merges the results into the graph keyed on
//! `(pattern_name, scope_id, period)`, so re-running over unchanged data
//! rewrites the same nodes.

pub mod heuristics;
pub mod semantic;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use devgraph_core::{
    clamp_confidence, defaults, identity, DetectionMethod, DetectorKind, EntitySummary,
    GraphStore, Pattern, PatternDetectionTrigger, PatternMetadata, PatternType, Result,
    ScopeData, SummaryFilter, TimeWindow, UpsertOutcome, WorkspaceId,
};

/// Detection thresholds.
#[derive(Debug, Clone)]
pub struct PatternConfig {
    /// τ: minimum cosine similarity joining two summaries.
    pub similarity_threshold: f64,
    /// Minimum supporting summaries for any pattern.
    pub min_frequency: usize,
    pub window_days: i64,
    /// Upper bound on summaries read per run.
    pub max_summaries: usize,
    /// Largest gap inside one temporal session.
    pub session_gap: Duration,
    /// Buckets up to this size are clustered exhaustively.
    pub exact_pairwise_limit: usize,
    /// Entity ids kept in `metadata.sampleEntityIds`.
    pub sample_size: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: defaults::PATTERN_SIMILARITY_THRESHOLD,
            min_frequency: defaults::PATTERN_MIN_FREQUENCY,
            window_days: defaults::PATTERN_WINDOW_DAYS,
            max_summaries: defaults::PATTERN_MAX_SUMMARIES,
            session_gap: Duration::minutes(defaults::SESSION_GAP_MINUTES),
            exact_pairwise_limit: defaults::EXACT_PAIRWISE_LIMIT,
            sample_size: defaults::PATTERN_SAMPLE_SIZE,
        }
    }
}

impl PatternConfig {
    /// Read `PATTERN_SIMILARITY_THRESHOLD`, `PATTERN_MIN_FREQUENCY` and
    /// `PATTERN_WINDOW_DAYS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(t) = env_parse::<f64>("PATTERN_SIMILARITY_THRESHOLD") {
            config.similarity_threshold = t;
        }
        if let Some(n) = env_parse::<usize>("PATTERN_MIN_FREQUENCY") {
            config.min_frequency = n;
        }
        if let Some(d) = env_parse::<i64>("PATTERN_WINDOW_DAYS") {
            config.window_days = d;
        }
        config
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    /// Clusters need at least two members, so smaller values are raised to 2.
    pub fn with_min_frequency(mut self, min_frequency: usize) -> Self {
        self.min_frequency = min_frequency.max(2);
        self
    }

    pub fn with_window_days(mut self, days: i64) -> Self {
        self.window_days = days;
        self
    }

    pub fn with_session_gap(mut self, gap: Duration) -> Self {
        self.session_gap = gap;
        self
    }

    pub fn with_max_summaries(mut self, max: usize) -> Self {
        self.max_summaries = max;
        self
    }

    pub fn with_exact_pairwise_limit(mut self, limit: usize) -> Self {
        self.exact_pairwise_limit = limit;
        self
    }

    fn effective_min_frequency(&self) -> usize {
        self.min_frequency.max(2)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// A group of summaries one detector considers a pattern.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub pattern_type: PatternType,
    pub pattern_name: String,
    pub project: Option<String>,
    pub period: String,
    /// Raw score, clamped when the pattern is built.
    pub confidence: f64,
    pub method: DetectionMethod,
    pub avg_similarity: Option<f64>,
    pub min_similarity: Option<f64>,
    pub temporal_grouping: &'static str,
    pub members: Vec<&'a EntitySummary>,
}

/// A pattern ready to merge, with its provenance edge targets.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedPattern {
    pub pattern: Pattern,
    /// EntitySummary ids, ascending.
    pub found_in: Vec<Uuid>,
    /// Memory/CodeEntity ids, ascending.
    pub derived_from: Vec<Uuid>,
}

impl Candidate<'_> {
    pub fn into_detected(
        self,
        workspace: &WorkspaceId,
        batch_id: Uuid,
        now: DateTime<Utc>,
        sample_size: usize,
    ) -> DetectedPattern {
        let mut found_in: Vec<Uuid> = self.members.iter().map(|s| s.id).collect();
        found_in.sort_unstable();
        found_in.dedup();
        let mut derived_from: Vec<Uuid> = self.members.iter().map(|s| s.entity_id).collect();
        derived_from.sort_unstable();
        derived_from.dedup();

        let scope_id = workspace.to_string();
        let pattern = Pattern {
            id: identity::pattern_id(&self.pattern_name, &scope_id, &self.period),
            pattern_type: self.pattern_type,
            pattern_name: self.pattern_name,
            scope_id,
            scope_data: ScopeData {
                project: self.project,
                period: self.period,
            },
            confidence: clamp_confidence(self.confidence),
            frequency: i32::try_from(derived_from.len()).unwrap_or(i32::MAX),
            batch_id,
            first_detected: now,
            last_updated: now,
            metadata: PatternMetadata {
                detection_method: self.method,
                avg_similarity: self.avg_similarity,
                min_similarity: self.min_similarity,
                temporal_grouping: self.temporal_grouping.to_string(),
                sample_entity_ids: derived_from.iter().take(sample_size).copied().collect(),
            },
        };
        DetectedPattern {
            pattern,
            found_in,
            derived_from,
        }
    }
}

/// Stable lowercase slug of a project name for use inside pattern names.
pub(crate) fn slug(project: &str) -> String {
    let mut out = String::with_capacity(project.len());
    for c in project.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// Eight hex digits derived from the raw project name.
fn project_tag(project: &str) -> String {
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, project.as_bytes()).simple().to_string();
    digest[..8].to_string()
}

/// `base` qualified with the project, when there is one. Projects whose slug
/// differs from the raw name also carry [`project_tag`], so names such as
/// "My App" and "my_app" stay distinct.
pub(crate) fn qualified_name(base: &str, project: Option<&str>) -> String {
    let Some(project) = project.filter(|p| !p.is_empty()) else {
        return base.to_string();
    };
    let slug = slug(project);
    if slug == project {
        return format!("{}-{}", base, slug);
    }
    let tag = project_tag(project);
    if slug.is_empty() {
        format!("{}-{}", base, tag)
    } else {
        format!("{}-{}-{}", base, slug, tag)
    }
}

/// Totals of one detection run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetectionReport {
    pub summaries_considered: usize,
    pub patterns_written: usize,
    pub created: usize,
    pub updated: usize,
}

/// Runs detectors for a workspace and merges their output into the graph.
pub struct PatternEngine {
    graph: Arc<dyn GraphStore>,
    config: PatternConfig,
}

impl PatternEngine {
    pub fn new(graph: Arc<dyn GraphStore>, config: PatternConfig) -> Self {
        Self { graph, config }
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    /// Candidates for the summaries given, limited to the detectors `trigger` enables.
    pub fn candidates<'a>(
        &self,
        summaries: &'a [EntitySummary],
        trigger: &PatternDetectionTrigger,
    ) -> Vec<Candidate<'a>> {
        let min_frequency = self.config.effective_min_frequency();
        let mut out = Vec::new();
        if trigger.wants(DetectorKind::Semantic) {
            out.extend(semantic::detect(
                summaries,
                self.config.similarity_threshold,
                self.config.exact_pairwise_limit,
                min_frequency,
            ));
        }
        let keyword_kinds: Vec<PatternType> = [
            (DetectorKind::Debugging, PatternType::Debugging),
            (DetectorKind::Learning, PatternType::Learning),
            (DetectorKind::Refactoring, PatternType::Refactoring),
        ]
        .into_iter()
        .filter(|(kind, _)| trigger.wants(*kind))
        .map(|(_, t)| t)
        .collect();
        if !keyword_kinds.is_empty() {
            out.extend(heuristics::keyword_activity(
                summaries,
                &keyword_kinds,
                min_frequency,
            ));
        }
        if trigger.wants(DetectorKind::Temporal) {
            out.extend(heuristics::temporal_sessions(
                summaries,
                self.config.session_gap,
                min_frequency,
            ));
        }
        out
    }

    /// Detect and merge patterns for one workspace.
    ///
    /// The window is anchored at the newest summary rather than the clock.
    #[instrument(skip(self, trigger), fields(subsystem = "jobs", component = "pattern_detection", workspace_id = %workspace, batch_id = %trigger.batch_id))]
    pub async fn detect(
        &self,
        workspace: &WorkspaceId,
        trigger: &PatternDetectionTrigger,
    ) -> Result<DetectionReport> {
        let mut report = DetectionReport::default();
        let Some(anchor) = self.graph.latest_summary_at(workspace).await? else {
            debug!("No summaries, nothing to detect");
            return Ok(report);
        };

        let window = TimeWindow::trailing(anchor, self.config.window_days);
        let filter = SummaryFilter::in_window(window).with_limit(self.config.max_summaries);
        let summaries = self.graph.list_summaries(workspace, &filter).await?;
        report.summaries_considered = summaries.len();

        let now = Utc::now();
        let detected: Vec<DetectedPattern> = self
            .candidates(&summaries, trigger)
            .into_iter()
            .map(|c| c.into_detected(workspace, trigger.batch_id, now, self.config.sample_size))
            .collect();

        for d in &detected {
            let outcome = self
                .graph
                .upsert_pattern(&d.pattern, &d.found_in, &d.derived_from)
                .await?;
            match outcome {
                UpsertOutcome::Created => report.created += 1,
                UpsertOutcome::Updated => report.updated += 1,
            }
            debug!(
                pattern_name = %d.pattern.pattern_name,
                period = %d.pattern.scope_data.period,
                frequency = d.pattern.frequency,
                confidence = d.pattern.confidence,
                "Pattern merged"
            );
        }
        report.patterns_written = detected.len();

        info!(
            input_count = report.summaries_considered,
            pattern_count = report.patterns_written,
            created = report.created,
            updated = report.updated,
            "Pattern detection complete"
        );
        Ok(report)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use chrono::TimeZone;

    use devgraph_core::EdgeKind;
    use devgraph_db::InMemoryGraphStore;

    fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, minute, 0).unwrap()
    }

    fn trigger(kinds: Vec<DetectorKind>) -> PatternDetectionTrigger {
        PatternDetectionTrigger {
            batch_id: Uuid::from_u128(1),
            pattern_types: kinds,
            limit: 10,
            workspace_id: Some(ws()),
        }
    }

    #[test]
    fn test_slug_and_qualified_name() {
        assert_eq!(slug("My App!"), "my-app");
        assert_eq!(slug("--api--"), "api");
        assert_eq!(qualified_name("debugging-keyword-activity", Some("web-ui")), "debugging-keyword-activity-web-ui");
        assert_eq!(qualified_name("temporal", None), "temporal");
        assert_eq!(qualified_name("temporal", Some("")), "temporal");

        let tagged = qualified_name("temporal", Some("Web UI"));
        assert!(tagged.starts_with("temporal-web-ui-"));
        assert_eq!(tagged.len(), "temporal-web-ui-".len() + 8);
        assert_eq!(tagged, qualified_name("temporal", Some("Web UI")));
        assert_ne!(qualified_name("temporal", Some("!!")), "temporal");
    }

    #[test]
    fn test_colliding_slugs_stay_distinct() {
        let names: std::collections::BTreeSet<String> = ["My App", "my_app", "MY-APP", "my-app"]
            .iter()
            .map(|p| qualified_name("debugging-keyword-activity", Some(p)))
            .collect();
        assert_eq!(names.len(), 4);
        assert!(names.contains("debugging-keyword-activity-my-app"));
    }

    #[tokio::test]
    async fn test_same_week_projects_with_one_slug_get_two_patterns() {
        let graph = Arc::new(InMemoryGraphStore::new());
        for (offset, project) in [(0, "My App"), (10, "my_app")] {
            for i in 0..3u128 {
                let minute = (offset + i) as u32;
                let mut s = summary(offset + i, near_axis(0, 0.0, 8), at(2, 9, minute), Some(project));
                s.signals.is_debugging = true;
                graph.write_summary(&s).await.unwrap();
            }
        }
        let engine = PatternEngine::new(graph.clone(), PatternConfig::default());

        let report = engine
            .detect(&ws(), &trigger(vec![DetectorKind::Debugging]))
            .await
            .unwrap();
        assert_eq!((report.patterns_written, report.created), (2, 2));

        let patterns = graph.list_patterns(&ws().to_string()).await.unwrap();
        let mut projects: Vec<_> = patterns
            .iter()
            .map(|p| p.scope_data.project.clone().unwrap_or_default())
            .collect();
        projects.sort();
        assert_eq!(projects, vec!["My App".to_string(), "my_app".to_string()]);
        assert!(patterns.iter().all(|p| p.frequency == 3));
    }

    #[tokio::test]
    async fn test_summary_cap_keeps_newest() {
        let graph = Arc::new(InMemoryGraphStore::new());
        for i in 0..3u128 {
            graph
                .write_summary(&summary(i, near_axis(0, 0.0, 8), at(2, 9, i as u32), None))
                .await
                .unwrap();
        }
        for i in 0..3u128 {
            graph
                .write_summary(&summary(20 + i, near_axis(4, 0.0, 8), at(3, 9, i as u32), None))
                .await
                .unwrap();
        }
        let engine = PatternEngine::new(
            graph.clone(),
            PatternConfig::default().with_max_summaries(3),
        );

        let report = engine
            .detect(&ws(), &trigger(vec![DetectorKind::Semantic]))
            .await
            .unwrap();
        assert_eq!(report.summaries_considered, 3);
        assert_eq!(report.patterns_written, 1);

        let patterns = graph.list_patterns(&ws().to_string()).await.unwrap();
        let derived = graph
            .edges_from(patterns[0].id, Some(EdgeKind::DerivedFrom))
            .await
            .unwrap();
        let mut targets: Vec<Uuid> = derived.iter().map(|e| e.to_id).collect();
        targets.sort();
        assert_eq!(targets, (20..23).map(Uuid::from_u128).collect::<Vec<_>>());
    }

    #[test]
    fn test_min_frequency_is_at_least_two() {
        let config = PatternConfig::default().with_min_frequency(0);
        assert_eq!(config.min_frequency, 2);
    }

    #[test]
    fn test_candidate_into_detected_sorts_provenance() {
        let a = summary(3, vec![1.0, 0.0], at(2, 9, 0), None);
        let b = summary(1, vec![1.0, 0.0], at(2, 9, 5), None);
        let candidate = Candidate {
            pattern_type: PatternType::Semantic,
            pattern_name: "semantic-cluster-x".into(),
            project: None,
            period: "2026-W10".into(),
            confidence: 1.7,
            method: DetectionMethod::SemanticCluster,
            avg_similarity: Some(1.0),
            min_similarity: Some(1.0),
            temporal_grouping: "iso_week",
            members: vec![&a, &b],
        };
        let detected = candidate.into_detected(&ws(), Uuid::from_u128(5), at(3, 0, 0), 1);
        assert_eq!(detected.pattern.confidence, 1.0);
        assert_eq!(detected.pattern.frequency, 2);
        assert_eq!(detected.derived_from, vec![Uuid::from_u128(1), Uuid::from_u128(3)]);
        assert_eq!(detected.pattern.metadata.sample_entity_ids, vec![Uuid::from_u128(1)]);
        assert_eq!(
            detected.pattern.id,
            identity::pattern_id("semantic-cluster-x", &ws().to_string(), "2026-W10")
        );
    }

    #[tokio::test]
    async fn test_detect_without_summaries_is_empty() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let engine = PatternEngine::new(graph, PatternConfig::default());
        let report = engine.detect(&ws(), &trigger(vec![])).await.unwrap();
        assert_eq!(report, DetectionReport::default());
    }

    #[tokio::test]
    async fn test_detect_writes_patterns_and_provenance() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let summaries: Vec<EntitySummary> = (0..3)
            .map(|i| summary(10 + i, near_axis(0, 0.1 * i as f32, 8), at(2, 9, i as u32), Some("web")))
            .collect();
        for s in &summaries {
            graph.write_summary(s).await.unwrap();
        }
        let engine = PatternEngine::new(graph.clone(), PatternConfig::default());

        let report = engine
            .detect(&ws(), &trigger(vec![DetectorKind::Semantic]))
            .await
            .unwrap();
        assert_eq!(report.summaries_considered, 3);
        assert_eq!((report.patterns_written, report.created), (1, 1));

        let patterns = graph.list_patterns(&ws().to_string()).await.unwrap();
        assert_eq!(patterns.len(), 1);
        let p = &patterns[0];
        assert_eq!(p.frequency, 3);
        assert_eq!(p.scope_data.project.as_deref(), Some("web"));
        assert_eq!(graph.edges_from(p.id, Some(EdgeKind::FoundIn)).await.unwrap().len(), 3);
        assert_eq!(graph.edges_from(p.id, Some(EdgeKind::DerivedFrom)).await.unwrap().len(), 3);

        let again = engine
            .detect(&ws(), &trigger(vec![DetectorKind::Semantic]))
            .await
            .unwrap();
        assert_eq!((again.created, again.updated), (0, 1));
        assert_eq!(graph.list_patterns(&ws().to_string()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_window_excludes_old_summaries() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let old = Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap();
        for i in 0..3 {
            graph
                .write_summary(&summary(i, near_axis(0, 0.0, 4), old, None))
                .await
                .unwrap();
        }
        graph
            .write_summary(&summary(50, near_axis(2, 0.0, 4), at(2, 9, 0), None))
            .await
            .unwrap();
        let engine = PatternEngine::new(graph.clone(), PatternConfig::default().with_window_days(30));

        let report = engine.detect(&ws(), &trigger(vec![])).await.unwrap();
        assert_eq!(report.summaries_considered, 1);
        assert_eq!(report.patterns_written, 0);
    }
}
