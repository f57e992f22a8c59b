//! Contracts between the pipeline stages and their collaborators.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::audit::AuditRecord;
use crate::models::*;
use crate::{Result, WorkspaceId};

// =============================================================================
// QUEUE LAYER
// =============================================================================

/// Durable at-least-once message queues, addressed by name.
///
/// A dequeued message stays invisible to other consumers until its
/// visibility timeout lapses; only `ack` or `dead_letter` remove it.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Append a message and return its id.
    async fn enqueue(&self, queue: &str, payload: &JsonValue) -> Result<i64>;

    /// Lease up to `max_count` visible messages, incrementing their read count.
    async fn dequeue(
        &self,
        queue: &str,
        visibility_timeout: Duration,
        max_count: usize,
    ) -> Result<Vec<QueueMessage>>;

    /// Delete a processed message.
    async fn ack(&self, queue: &str, message_id: i64) -> Result<()>;

    /// Make a leased message visible again after `delay`.
    async fn nack(&self, queue: &str, message_id: i64, delay: Duration) -> Result<()>;

    /// Move a message to the queue's dead-letter counterpart.
    async fn dead_letter(&self, queue: &str, message_id: i64, reason: &str) -> Result<()>;

    /// Number of messages in a queue, visible or leased.
    async fn depth(&self, queue: &str) -> Result<i64>;
}

/// Name of the dead-letter queue paired with `queue`.
pub fn dead_letter_queue(queue: &str) -> String {
    format!("{}{}", queue, crate::defaults::DLQ_SUFFIX)
}

// =============================================================================
// GRAPH STORE
// =============================================================================

/// Filter for summary reads.
#[derive(Debug, Clone, Default)]
pub struct SummaryFilter {
    pub entity_type: Option<EntityType>,
    /// Restrict by the source entity's `occurred_at`.
    pub window: Option<TimeWindow>,
    /// Restrict to summaries of these source entities.
    pub entity_ids: Option<Vec<Uuid>>,
    /// Keep the newest `limit` summaries. Results are still oldest first.
    pub limit: Option<usize>,
}

impl SummaryFilter {
    pub fn of_type(entity_type: EntityType) -> Self {
        Self {
            entity_type: Some(entity_type),
            ..Default::default()
        }
    }

    pub fn in_window(window: TimeWindow) -> Self {
        Self {
            window: Some(window),
            ..Default::default()
        }
    }

    pub fn for_entities(entity_ids: Vec<Uuid>) -> Self {
        Self {
            entity_ids: Some(entity_ids),
            ..Default::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Knowledge-graph persistence. Every write is an idempotent merge keyed on
/// natural identifiers supplied in full by the caller.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Merge a Memory on its id, the UUIDv5 of `(workspace_id, chunk_id)`.
    /// Concurrent identical upserts all succeed.
    async fn upsert_memory(&self, node: &MemoryNode) -> Result<UpsertOutcome>;

    /// Merge a CodeEntity on its id, the UUIDv5 of
    /// `(workspace_id, project_name, file_path)`.
    async fn upsert_code_entity(&self, node: &CodeEntityNode) -> Result<UpsertOutcome>;

    async fn get_memory(&self, id: Uuid) -> Result<Option<MemoryNode>>;

    /// Memories strictly after `after` in `(created_at, id)` order.
    async fn memories_after(
        &self,
        workspace: &WorkspaceId,
        after: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Vec<MemoryNode>>;

    async fn code_entities_after(
        &self,
        workspace: &WorkspaceId,
        after: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Vec<CodeEntityNode>>;

    /// The oldest `limit` memories.
    async fn list_memories(&self, workspace: &WorkspaceId, limit: usize) -> Result<Vec<MemoryNode>> {
        self.memories_after(workspace, None, limit).await
    }

    async fn list_code_entities(
        &self,
        workspace: &WorkspaceId,
        limit: usize,
    ) -> Result<Vec<CodeEntityNode>> {
        self.code_entities_after(workspace, None, limit).await
    }

    /// Entities with no incoming SUMMARIZES edge, oldest first.
    async fn unsummarized_entities(
        &self,
        workspace: &WorkspaceId,
        limit: usize,
    ) -> Result<Vec<SourceEntity>>;

    /// Write a summary and its SUMMARIZES edge atomically.
    ///
    /// Re-writing the summary of the same entity updates it in place. A
    /// different summary id for an already-summarized entity is a
    /// `ConstraintViolation`.
    async fn write_summary(&self, summary: &EntitySummary) -> Result<UpsertOutcome>;

    async fn list_summaries(
        &self,
        workspace: &WorkspaceId,
        filter: &SummaryFilter,
    ) -> Result<Vec<EntitySummary>>;

    /// Source time of the newest summary in a workspace.
    async fn latest_summary_at(&self, workspace: &WorkspaceId) -> Result<Option<DateTime<Utc>>>;

    /// Merge a Pattern on its id, the UUIDv5 of
    /// `(pattern_name, scope_id, scope_data.period)`, and
    /// replace its FOUND_IN and DERIVED_FROM edges, in one transaction.
    async fn upsert_pattern(
        &self,
        pattern: &Pattern,
        found_in: &[Uuid],
        derived_from: &[Uuid],
    ) -> Result<UpsertOutcome>;

    async fn list_patterns(&self, scope_id: &str) -> Result<Vec<Pattern>>;

    /// Write REFERENCES_CODE and DISCUSSED_IN together. Returns whether the pair is new.
    async fn link_memory_code(&self, link: &CodeReference) -> Result<bool>;

    /// Outgoing edges of a node, optionally of one kind.
    async fn edges_from(&self, from_id: Uuid, kind: Option<EdgeKind>) -> Result<Vec<Edge>>;

    /// Workspaces with summaries whose last detection run is older than `min_interval`.
    async fn workspaces_due(&self, min_interval: Duration, limit: usize)
        -> Result<Vec<WorkspaceId>>;

    async fn record_detection_run(&self, workspace: &WorkspaceId, batch_id: Uuid) -> Result<()>;
}

// =============================================================================
// AUDIT
// =============================================================================

/// Destination of structured audit records.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: &AuditRecord) -> Result<()>;
}

// =============================================================================
// EMBEDDINGS
// =============================================================================

/// Embedding provider with a fixed output dimension.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a batch of texts, one vector per input in input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vector> {
        let mut vectors = self.embed_texts(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| crate::Error::Provider("provider returned no embedding".into()))
    }

    /// Embedding dimension of this deployment.
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;
}
