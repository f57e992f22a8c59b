//! In-process implementations of the store traits.
//!
//! They follow the same merge, visibility, and atomicity rules as the
//! PostgreSQL repositories and back the pipeline tests, which need no
//! running database.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use devgraph_core::{
    dead_letter_queue, AuditRecord, AuditSink, CodeEntityNode, CodeReference, Edge, EdgeKind,
    EntitySummary, EntityType, Error, GraphStore, MemoryNode, MessageQueue, PageCursor, Pattern,
    QueueMessage, Result, SourceEntity, SummaryFilter, UpsertOutcome, WorkspaceId,
};

// =============================================================================
// QUEUE
// =============================================================================

#[derive(Debug, Clone)]
struct StoredMessage {
    queue: String,
    payload: JsonValue,
    read_count: i32,
    enqueued_at: DateTime<Utc>,
    visible_at: Instant,
    dead_reason: Option<String>,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: i64,
    messages: BTreeMap<i64, StoredMessage>,
}

/// Visibility-timeout queue held in memory. Uses the tokio clock, so tests
/// can advance time with `tokio::time::advance`.
#[derive(Debug, Default)]
pub struct InMemoryQueue {
    state: Mutex<QueueState>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Payloads currently in `queue`, leased or not, in id order.
    pub async fn payloads(&self, queue: &str) -> Vec<JsonValue> {
        let state = self.state.lock().await;
        state
            .messages
            .values()
            .filter(|m| m.queue == queue)
            .map(|m| m.payload.clone())
            .collect()
    }

    /// Reason recorded when a message was dead-lettered.
    pub async fn dead_reason(&self, message_id: i64) -> Option<String> {
        let state = self.state.lock().await;
        state
            .messages
            .get(&message_id)
            .and_then(|m| m.dead_reason.clone())
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn enqueue(&self, queue: &str, payload: &JsonValue) -> Result<i64> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        state.messages.insert(
            id,
            StoredMessage {
                queue: queue.to_string(),
                payload: payload.clone(),
                read_count: 0,
                enqueued_at: Utc::now(),
                visible_at: Instant::now(),
                dead_reason: None,
            },
        );
        Ok(id)
    }

    async fn dequeue(
        &self,
        queue: &str,
        visibility_timeout: Duration,
        max_count: usize,
    ) -> Result<Vec<QueueMessage>> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        let mut leased = Vec::new();
        for (id, message) in state.messages.iter_mut() {
            if leased.len() >= max_count {
                break;
            }
            if message.queue != queue || message.visible_at > now {
                continue;
            }
            message.visible_at = now + visibility_timeout;
            message.read_count += 1;
            leased.push(QueueMessage {
                message_id: *id,
                payload: message.payload.clone(),
                read_count: message.read_count,
                enqueued_at: message.enqueued_at,
            });
        }
        Ok(leased)
    }

    async fn ack(&self, queue: &str, message_id: i64) -> Result<()> {
        let mut state = self.state.lock().await;
        if state
            .messages
            .get(&message_id)
            .is_some_and(|m| m.queue == queue)
        {
            state.messages.remove(&message_id);
        }
        Ok(())
    }

    async fn nack(&self, queue: &str, message_id: i64, delay: Duration) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(message) = state
            .messages
            .get_mut(&message_id)
            .filter(|m| m.queue == queue)
        {
            message.visible_at = Instant::now() + delay;
        }
        Ok(())
    }

    async fn dead_letter(&self, queue: &str, message_id: i64, reason: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let message = state
            .messages
            .get_mut(&message_id)
            .filter(|m| m.queue == queue)
            .ok_or_else(|| {
                Error::NotFound(format!("message {} not found in queue {}", message_id, queue))
            })?;
        message.queue = dead_letter_queue(queue);
        message.dead_reason = Some(reason.to_string());
        message.visible_at = Instant::now();
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state.messages.values().filter(|m| m.queue == queue).count() as i64)
    }
}

// =============================================================================
// GRAPH STORE
// =============================================================================

type EdgeKey = (Uuid, Uuid, EdgeKind);
type PatternKey = (String, String, String);

#[derive(Debug, Default)]
struct GraphState {
    memories: BTreeMap<Uuid, MemoryNode>,
    memory_keys: HashMap<(WorkspaceId, String), Uuid>,
    code: BTreeMap<Uuid, CodeEntityNode>,
    code_keys: HashMap<(WorkspaceId, String, String), Uuid>,
    summaries: HashMap<(Uuid, EntityType), EntitySummary>,
    patterns: HashMap<PatternKey, Pattern>,
    edges: BTreeMap<EdgeKey, Edge>,
    detection_runs: HashMap<WorkspaceId, (Uuid, DateTime<Utc>)>,
}

impl GraphState {
    fn has_summary(&self, entity_id: Uuid) -> bool {
        self.edges
            .keys()
            .any(|(_, to, kind)| *to == entity_id && *kind == EdgeKind::Summarizes)
    }

    /// Insert an edge unless it exists. Returns whether it was new.
    fn insert_edge(&mut self, from_id: Uuid, to_id: Uuid, kind: EdgeKind, properties: JsonValue) -> bool {
        let key = (from_id, to_id, kind);
        if self.edges.contains_key(&key) {
            return false;
        }
        self.edges.insert(
            key,
            Edge {
                from_id,
                to_id,
                kind,
                properties,
                created_at: Utc::now(),
            },
        );
        true
    }

    fn replace_edges(&mut self, from_id: Uuid, kind: EdgeKind, targets: &[Uuid]) {
        self.edges
            .retain(|(from, to, k), _| !(*from == from_id && *k == kind && !targets.contains(to)));
        for target in targets {
            self.insert_edge(from_id, *target, kind, JsonValue::Object(Default::default()));
        }
    }
}

/// Drop null object members at every depth, as `jsonb_strip_nulls` does.
/// Nulls inside arrays stay.
fn strip_nulls(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => JsonValue::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(strip_nulls).collect()),
        other => other.clone(),
    }
}

/// Shallow merge of `incoming` into `existing` after stripping its nulls.
fn merge_metadata(existing: &mut JsonValue, incoming: &JsonValue) {
    if !existing.is_object() {
        *existing = JsonValue::Object(Default::default());
    }
    if let (JsonValue::Object(target), JsonValue::Object(source)) = (existing, strip_nulls(incoming)) {
        target.extend(source);
    }
}

fn stripped(metadata: &JsonValue) -> JsonValue {
    let mut out = JsonValue::Object(Default::default());
    merge_metadata(&mut out, metadata);
    out
}

/// Graph store held in memory.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    state: Mutex<GraphState>,
    failing_writes: AtomicU32,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` write operations with a transient store error.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    fn check_write(&self) -> Result<()> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::TransientStore("injected write failure".into()));
        }
        Ok(())
    }

    pub async fn summary_count(&self) -> usize {
        self.state.lock().await.summaries.len()
    }

    /// All edges of one kind, in key order.
    pub async fn edges_of_kind(&self, kind: EdgeKind) -> Vec<Edge> {
        let state = self.state.lock().await;
        state
            .edges
            .values()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_memory(&self, node: &MemoryNode) -> Result<UpsertOutcome> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        let key = (node.workspace_id, node.chunk_id.clone());
        if let Some(id) = state.memory_keys.get(&key).copied() {
            if let Some(existing) = state.memories.get_mut(&id) {
                if node.project_name.is_some() {
                    existing.project_name = node.project_name.clone();
                }
                if existing.embedding.is_none() {
                    existing.embedding = node.embedding.clone();
                }
                merge_metadata(&mut existing.metadata, &node.metadata);
                return Ok(UpsertOutcome::Updated);
            }
        }
        let mut created = node.clone();
        created.metadata = stripped(&node.metadata);
        state.memory_keys.insert(key, node.id);
        state.memories.insert(node.id, created);
        Ok(UpsertOutcome::Created)
    }

    async fn upsert_code_entity(&self, node: &CodeEntityNode) -> Result<UpsertOutcome> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        let key = (
            node.workspace_id,
            node.project_name.clone(),
            node.file_path.clone(),
        );
        if let Some(id) = state.code_keys.get(&key).copied() {
            if let Some(existing) = state.code.get_mut(&id) {
                // Content and the metadata derived from it move together.
                existing.content = node.content.clone();
                existing.name = node.name.clone();
                existing.entity_type = node.entity_type.clone();
                if node.language.is_some() {
                    existing.language = node.language.clone();
                }
                if node.last_modified.is_some() {
                    existing.last_modified = node.last_modified;
                }
                merge_metadata(&mut existing.metadata, &node.metadata);
                return Ok(UpsertOutcome::Updated);
            }
        }
        let mut created = node.clone();
        created.metadata = stripped(&node.metadata);
        state.code_keys.insert(key, node.id);
        state.code.insert(node.id, created);
        Ok(UpsertOutcome::Created)
    }

    async fn get_memory(&self, id: Uuid) -> Result<Option<MemoryNode>> {
        Ok(self.state.lock().await.memories.get(&id).cloned())
    }

    async fn memories_after(
        &self,
        workspace: &WorkspaceId,
        after: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Vec<MemoryNode>> {
        let state = self.state.lock().await;
        let mut nodes: Vec<MemoryNode> = state
            .memories
            .values()
            .filter(|m| m.workspace_id == *workspace)
            .filter(|m| after.map_or(true, |a| (m.created_at, m.id) > (a.created_at, a.id)))
            .cloned()
            .collect();
        nodes.sort_by_key(|m| (m.created_at, m.id));
        nodes.truncate(limit);
        Ok(nodes)
    }

    async fn code_entities_after(
        &self,
        workspace: &WorkspaceId,
        after: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Vec<CodeEntityNode>> {
        let state = self.state.lock().await;
        let mut nodes: Vec<CodeEntityNode> = state
            .code
            .values()
            .filter(|c| c.workspace_id == *workspace)
            .filter(|c| after.map_or(true, |a| (c.created_at, c.id) > (a.created_at, a.id)))
            .cloned()
            .collect();
        nodes.sort_by_key(|c| (c.created_at, c.id));
        nodes.truncate(limit);
        Ok(nodes)
    }

    async fn unsummarized_entities(
        &self,
        workspace: &WorkspaceId,
        limit: usize,
    ) -> Result<Vec<SourceEntity>> {
        let state = self.state.lock().await;
        let mut pending: Vec<(DateTime<Utc>, SourceEntity)> = state
            .memories
            .values()
            .filter(|m| m.workspace_id == *workspace && !state.has_summary(m.id))
            .map(|m| (m.created_at, SourceEntity::Memory(m.clone())))
            .chain(
                state
                    .code
                    .values()
                    .filter(|c| c.workspace_id == *workspace && !state.has_summary(c.id))
                    .map(|c| (c.created_at, SourceEntity::Code(c.clone()))),
            )
            .collect();
        pending.sort_by_key(|(created, e)| (*created, e.entity_id()));
        Ok(pending.into_iter().take(limit).map(|(_, e)| e).collect())
    }

    async fn write_summary(&self, summary: &EntitySummary) -> Result<UpsertOutcome> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        let key = (summary.entity_id, summary.entity_type);
        let outcome = match state.summaries.get(&key) {
            Some(existing) if existing.id != summary.id => {
                return Err(Error::ConstraintViolation(format!(
                    "entity {} ({}) already has a summary with a different id",
                    summary.entity_id, summary.entity_type
                )));
            }
            Some(_) => UpsertOutcome::Updated,
            None => UpsertOutcome::Created,
        };
        let mut stored = summary.clone();
        if let Some(existing) = state.summaries.get(&key) {
            stored.created_at = existing.created_at;
        }
        state.summaries.insert(key, stored);
        state.insert_edge(
            summary.id,
            summary.entity_id,
            EdgeKind::Summarizes,
            JsonValue::Object(Default::default()),
        );
        Ok(outcome)
    }

    async fn list_summaries(
        &self,
        workspace: &WorkspaceId,
        filter: &SummaryFilter,
    ) -> Result<Vec<EntitySummary>> {
        let state = self.state.lock().await;
        let mut summaries: Vec<EntitySummary> = state
            .summaries
            .values()
            .filter(|s| s.workspace_id == *workspace)
            .filter(|s| filter.entity_type.map_or(true, |t| s.entity_type == t))
            .filter(|s| filter.window.map_or(true, |w| w.contains(s.occurred_at)))
            .filter(|s| {
                filter
                    .entity_ids
                    .as_ref()
                    .map_or(true, |ids| ids.contains(&s.entity_id))
            })
            .cloned()
            .collect();
        summaries.sort_by_key(|s| (s.occurred_at, s.id));
        if let Some(limit) = filter.limit {
            let skip = summaries.len().saturating_sub(limit);
            summaries.drain(..skip);
        }
        Ok(summaries)
    }

    async fn latest_summary_at(&self, workspace: &WorkspaceId) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.lock().await;
        Ok(state
            .summaries
            .values()
            .filter(|s| s.workspace_id == *workspace)
            .map(|s| s.occurred_at)
            .max())
    }

    async fn upsert_pattern(
        &self,
        pattern: &Pattern,
        found_in: &[Uuid],
        derived_from: &[Uuid],
    ) -> Result<UpsertOutcome> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        let key = (
            pattern.pattern_name.clone(),
            pattern.scope_id.clone(),
            pattern.scope_data.period.clone(),
        );
        let (outcome, stored) = match state.patterns.get(&key) {
            Some(existing) => {
                let mut merged = pattern.clone();
                merged.id = existing.id;
                merged.first_detected = existing.first_detected;
                (UpsertOutcome::Updated, merged)
            }
            None => (UpsertOutcome::Created, pattern.clone()),
        };
        let pattern_id = stored.id;
        state.patterns.insert(key, stored);
        state.replace_edges(pattern_id, EdgeKind::FoundIn, found_in);
        state.replace_edges(pattern_id, EdgeKind::DerivedFrom, derived_from);
        Ok(outcome)
    }

    async fn list_patterns(&self, scope_id: &str) -> Result<Vec<Pattern>> {
        let state = self.state.lock().await;
        let mut patterns: Vec<Pattern> = state
            .patterns
            .values()
            .filter(|p| p.scope_id == scope_id)
            .cloned()
            .collect();
        patterns.sort_by(|a, b| {
            (&a.scope_data.period, &a.pattern_name).cmp(&(&b.scope_data.period, &b.pattern_name))
        });
        Ok(patterns)
    }

    async fn link_memory_code(&self, link: &CodeReference) -> Result<bool> {
        self.check_write()?;
        let mut state = self.state.lock().await;
        let properties = link.properties();
        let created = state.insert_edge(
            link.memory_id,
            link.code_id,
            EdgeKind::ReferencesCode,
            properties.clone(),
        );
        state.insert_edge(link.code_id, link.memory_id, EdgeKind::DiscussedIn, properties);
        if created {
            if let Some(memory) = state.memories.get_mut(&link.memory_id) {
                merge_metadata(
                    &mut memory.metadata,
                    &serde_json::json!({
                        "has_code_references": true,
                        "code_linked_at": Utc::now().to_rfc3339(),
                    }),
                );
            }
        }
        Ok(created)
    }

    async fn edges_from(&self, from_id: Uuid, kind: Option<EdgeKind>) -> Result<Vec<Edge>> {
        let state = self.state.lock().await;
        Ok(state
            .edges
            .values()
            .filter(|e| e.from_id == from_id && kind.map_or(true, |k| e.kind == k))
            .cloned()
            .collect())
    }

    async fn workspaces_due(
        &self,
        min_interval: Duration,
        limit: usize,
    ) -> Result<Vec<WorkspaceId>> {
        let state = self.state.lock().await;
        let interval = chrono::Duration::from_std(min_interval)
            .map_err(|e| Error::Validation(format!("interval out of range: {}", e)))?;
        let cutoff = Utc::now() - interval;

        let mut due: Vec<(Option<DateTime<Utc>>, WorkspaceId)> = state
            .summaries
            .values()
            .map(|s| s.workspace_id)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .map(|ws| (state.detection_runs.get(&ws).map(|(_, at)| *at), ws))
            .filter(|(last_run, _)| last_run.map_or(true, |at| at < cutoff))
            .collect();
        // Never-run workspaces first (None sorts before Some).
        due.sort();
        Ok(due.into_iter().take(limit).map(|(_, ws)| ws).collect())
    }

    async fn record_detection_run(&self, workspace: &WorkspaceId, batch_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .detection_runs
            .insert(*workspace, (batch_id, Utc::now()));
        Ok(())
    }
}

// =============================================================================
// AUDIT
// =============================================================================

/// Audit sink that keeps records in memory.
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
    failing: AtomicBool,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `record` call fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::TransientStore("audit sink unavailable".into()));
        }
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}
