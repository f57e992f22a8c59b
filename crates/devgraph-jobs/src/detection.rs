//! Pattern detection trigger handler.
//!
//! A trigger names one workspace or, without `workspace_id`, asks for every
//! workspace whose last detection run is older than the minimum interval.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::{info, instrument, warn};

use devgraph_core::{
    defaults, AuditRecord, DetectorKind, LogEvent, PatternDetectionTrigger, Result, WorkspaceId,
};

use crate::handler::{HandlerOutcome, MessageContext, MessageHandler, Stores};
use crate::patterns::{DetectionReport, PatternConfig, PatternEngine};
use crate::relationships::{RelationshipConfig, RelationshipDetector, RelationshipReport};

/// Outcome of detection for one workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceRun {
    pub workspace_id: WorkspaceId,
    pub patterns: DetectionReport,
    /// Present when the trigger enabled `memory_code`.
    pub relationships: Option<RelationshipReport>,
    pub duration_ms: u64,
}

impl WorkspaceRun {
    fn to_json(&self) -> JsonValue {
        json!({
            "workspace_id": self.workspace_id.to_string(),
            "patterns_written": self.patterns.patterns_written,
            "summaries_considered": self.patterns.summaries_considered,
            "links_created": self.relationships.as_ref().map(|r| r.links_created),
            "duration_ms": self.duration_ms,
        })
    }
}

/// Drains `pattern_detection`.
pub struct PatternDetectionHandler {
    stores: Stores,
    engine: PatternEngine,
    relationships: RelationshipDetector,
    queue: String,
    min_interval: Duration,
    workspace_filter: Option<WorkspaceId>,
}

impl PatternDetectionHandler {
    pub fn new(stores: Stores, patterns: PatternConfig, relationships: RelationshipConfig) -> Self {
        Self {
            engine: PatternEngine::new(stores.graph.clone(), patterns),
            relationships: RelationshipDetector::new(stores.graph.clone(), relationships),
            stores,
            queue: defaults::PATTERN_DETECTION_QUEUE.to_string(),
            min_interval: Duration::from_secs(defaults::DETECTION_MIN_INTERVAL_SECS),
            workspace_filter: None,
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    /// Interval after which a workspace is due again for an unscoped trigger.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Only ever run detection for `workspace`.
    pub fn with_workspace_filter(mut self, workspace: Option<WorkspaceId>) -> Self {
        self.workspace_filter = workspace;
        self
    }

    /// Workspaces a trigger applies to, after the worker's filter.
    async fn target_workspaces(&self, trigger: &PatternDetectionTrigger) -> Result<Vec<WorkspaceId>> {
        let targets = match trigger.workspace_id {
            Some(ws) => vec![ws],
            None => match self.workspace_filter {
                Some(ws) => vec![ws],
                None => {
                    self.stores
                        .graph
                        .workspaces_due(self.min_interval, trigger.limit)
                        .await?
                }
            },
        };
        Ok(targets
            .into_iter()
            .filter(|ws| self.workspace_filter.map_or(true, |f| f == *ws))
            .collect())
    }

    /// Run a trigger to completion.
    #[instrument(skip(self, trigger), fields(subsystem = "jobs", component = "pattern_detection", batch_id = %trigger.batch_id))]
    pub async fn run(&self, trigger: &PatternDetectionTrigger) -> Result<Vec<WorkspaceRun>> {
        let targets = self.target_workspaces(trigger).await?;
        if targets.is_empty() {
            info!("No workspaces to detect");
        }
        let mut runs = Vec::with_capacity(targets.len());
        for workspace in targets {
            runs.push(self.run_workspace(&workspace, trigger).await?);
        }
        Ok(runs)
    }

    async fn run_workspace(
        &self,
        workspace: &WorkspaceId,
        trigger: &PatternDetectionTrigger,
    ) -> Result<WorkspaceRun> {
        let started = Instant::now();
        let patterns = self.engine.detect(workspace, trigger).await?;
        let relationships = if trigger.wants(DetectorKind::MemoryCode) {
            Some(self.relationships.detect(workspace).await?)
        } else {
            None
        };
        self.stores
            .graph
            .record_detection_run(workspace, trigger.batch_id)
            .await?;
        let duration_ms = started.elapsed().as_millis() as u64;

        self.stores
            .record_audit(
                AuditRecord::info(
                    format!("detected {} patterns", patterns.patterns_written),
                    LogEvent::PatternResult {
                        workspace_id: workspace.to_string(),
                        patterns_written: patterns.patterns_written,
                        summaries_considered: patterns.summaries_considered,
                        duration_ms,
                    },
                )
                .with_batch(trigger.batch_id),
            )
            .await;
        if let Some(r) = &relationships {
            self.stores
                .record_audit(
                    AuditRecord::info(
                        format!("linked {} memory/code pairs", r.links_created),
                        LogEvent::RelationshipResult {
                            workspace_id: workspace.to_string(),
                            links_created: r.links_created,
                            candidates: r.candidates,
                        },
                    )
                    .with_batch(trigger.batch_id),
                )
                .await;
        }

        Ok(WorkspaceRun {
            workspace_id: *workspace,
            patterns,
            relationships,
            duration_ms,
        })
    }
}

#[async_trait]
impl MessageHandler for PatternDetectionHandler {
    fn queue(&self) -> &str {
        &self.queue
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", queue = %ctx.queue, message_id = ctx.message_id()))]
    async fn handle(&self, ctx: MessageContext) -> HandlerOutcome {
        let trigger = match PatternDetectionTrigger::parse(ctx.payload()) {
            Ok(t) => t,
            Err(e) => return HandlerOutcome::from_error(&e),
        };
        match self.run(&trigger).await {
            Ok(runs) => HandlerOutcome::Ack(Some(json!({
                "batch_id": trigger.batch_id,
                "workspaces": runs.iter().map(WorkspaceRun::to_json).collect::<Vec<_>>(),
            }))),
            Err(e) => {
                warn!(
                    batch_id = %trigger.batch_id,
                    error = %e,
                    error_class = ?e.class(),
                    "Pattern detection failed"
                );
                HandlerOutcome::from_error(&e)
            }
        }
    }
}
