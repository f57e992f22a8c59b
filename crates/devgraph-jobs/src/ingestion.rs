//! Memory and code ingestion handlers.
//!
//! Both handlers turn one queue message into graph upserts keyed on the
//! entity's natural key, then ask the summarization stage to pick up the
//! new work. Node ids are always derived from the natural key. A
//! producer-supplied `id` is kept as `metadata.source_id` and nothing else.

use std::collections::HashMap;
use std::hash::Hash;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value as JsonValue};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use devgraph_core::{
    defaults, identity, AuditRecord, CodeEntityNode, CodeFile, CodeIngestPayload, Error,
    LogEvent, MemoryChunk, MemoryIngestPayload, MemoryNode, Result, SummarizationRequest,
    UpsertOutcome, WorkspaceId,
};

use crate::code_metadata;
use crate::handler::{HandlerOutcome, MessageContext, MessageHandler, Stores};

/// Result of ingesting one message.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub workspace_id: WorkspaceId,
    pub batch_id: Uuid,
    pub created: usize,
    pub updated: usize,
    /// Ids of the upserted nodes, in input order after dedupe.
    pub entity_ids: Vec<Uuid>,
}

impl IngestReport {
    fn new(workspace_id: WorkspaceId) -> Self {
        Self {
            workspace_id,
            batch_id: Uuid::now_v7(),
            created: 0,
            updated: 0,
            entity_ids: Vec::new(),
        }
    }

    fn count(&mut self, id: Uuid, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Created => self.created += 1,
            UpsertOutcome::Updated => self.updated += 1,
        }
        self.entity_ids.push(id);
    }

    pub fn to_json(&self) -> JsonValue {
        json!({
            "workspace_id": self.workspace_id.to_string(),
            "batch_id": self.batch_id,
            "created": self.created,
            "updated": self.updated,
        })
    }
}

// =============================================================================
// VALIDATION HELPERS
// =============================================================================

fn require_non_empty(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", field)));
    }
    Ok(())
}

/// Caller metadata as a map. Null or absent is empty; anything else but an
/// object is malformed.
fn metadata_map(metadata: Option<JsonValue>, context: &str) -> Result<Map<String, JsonValue>> {
    match metadata {
        None | Some(JsonValue::Null) => Ok(Map::new()),
        Some(JsonValue::Object(map)) => Ok(map),
        Some(other) => Err(Error::Validation(format!(
            "{}: metadata must be an object, got {}",
            context,
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn record_source_id(map: &mut Map<String, JsonValue>, id: Option<JsonValue>) {
    if let Some(id) = id.filter(|v| !v.is_null()) {
        map.insert("source_id".to_string(), id);
    }
}

/// Collapse items sharing a key. The later item wins but keeps the position
/// of the first occurrence.
fn dedupe_by_key<T, K, F>(items: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut positions: HashMap<K, usize> = HashMap::new();
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        match positions.get(&key(&item)) {
            Some(&pos) => out[pos] = item,
            None => {
                positions.insert(key(&item), out.len());
                out.push(item);
            }
        }
    }
    out
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

// =============================================================================
// NODE CONSTRUCTION
// =============================================================================

fn memory_nodes(
    workspace: WorkspaceId,
    user_id: &str,
    chunks: Vec<MemoryChunk>,
) -> Result<Vec<MemoryNode>> {
    if chunks.is_empty() {
        return Err(Error::Validation("memory message contains no chunks".into()));
    }
    for chunk in &chunks {
        require_non_empty(&chunk.chunk_id, "chunk_id")?;
    }
    let chunks = dedupe_by_key(chunks, |c| c.chunk_id.trim().to_string());

    let now = Utc::now();
    chunks
        .into_iter()
        .map(|chunk| {
            let chunk_id = chunk.chunk_id.trim().to_string();
            if chunk.content.trim().is_empty() {
                return Err(Error::Validation(format!(
                    "chunk '{}' has empty content",
                    chunk_id
                )));
            }
            if chunk.embedding.as_ref().map_or(false, |e| e.is_empty()) {
                return Err(Error::Validation(format!(
                    "chunk '{}' has an empty embedding",
                    chunk_id
                )));
            }
            let mut metadata = metadata_map(chunk.metadata, &format!("chunk '{}'", chunk_id))?;
            record_source_id(&mut metadata, chunk.id);

            Ok(MemoryNode {
                id: identity::memory_id(&workspace, &chunk_id),
                workspace_id: workspace,
                user_id: user_id.to_string(),
                chunk_id,
                content: chunk.content,
                project_name: non_empty(chunk.project_name),
                occurred_at: chunk.occurred_at.unwrap_or(now),
                created_at: now,
                embedding: chunk.embedding,
                metadata: JsonValue::Object(metadata),
            })
        })
        .collect()
}

fn code_nodes(
    workspace: WorkspaceId,
    user_id: &str,
    files: Vec<CodeFile>,
) -> Result<Vec<CodeEntityNode>> {
    if files.is_empty() {
        return Err(Error::Validation("code message contains no files".into()));
    }
    let mut keyed = Vec::with_capacity(files.len());
    for file in files {
        require_non_empty(&file.file_path, "file_path")?;
        let project = non_empty(file.project_name.clone()).ok_or_else(|| {
            Error::Validation(format!("file '{}' has no project_name", file.file_path))
        })?;
        keyed.push((project, file));
    }
    let keyed = dedupe_by_key(keyed, |(project, f)| {
        (project.clone(), f.file_path.trim().to_string())
    });

    let now = Utc::now();
    keyed
        .into_iter()
        .map(|(project_name, file)| {
            let file_path = file.file_path.trim().to_string();
            let language = non_empty(file.language)
                .map(|l| l.to_lowercase())
                .or_else(|| code_metadata::detect_language(&file_path).map(str::to_string));
            let extracted =
                code_metadata::extract(&file_path, &file.content, language.as_deref());

            let mut metadata = metadata_map(file.metadata, &format!("file '{}'", file_path))?;
            if let JsonValue::Object(derived) = extracted.to_json() {
                metadata.extend(derived);
            }
            if let Some(language) = &language {
                metadata.insert("language".to_string(), json!(language));
            }
            record_source_id(&mut metadata, file.id);

            Ok(CodeEntityNode {
                id: identity::code_entity_id(&workspace, &project_name, &file_path),
                workspace_id: workspace,
                user_id: user_id.to_string(),
                name: code_metadata::basename(&file_path).to_string(),
                entity_type: "file".to_string(),
                project_name,
                file_path,
                language,
                content: file.content,
                last_modified: file.last_modified,
                created_at: now,
                metadata: JsonValue::Object(metadata),
            })
        })
        .collect()
}

/// Enqueue the summarization request and write the audit record.
async fn complete(
    stores: &Stores,
    summarization_queue: &str,
    source_queue: &str,
    report: &IngestReport,
) -> Result<()> {
    let request = SummarizationRequest {
        workspace_id: report.workspace_id,
        batch_id: Some(report.batch_id),
    };
    let payload = serde_json::to_value(&request)?;
    let message_id = stores.queues.enqueue(summarization_queue, &payload).await?;
    debug!(
        subsystem = "jobs",
        queue = summarization_queue,
        message_id,
        workspace_id = %report.workspace_id,
        "Summarization requested"
    );

    stores
        .record_audit(
            AuditRecord::info(
                format!("ingested {} entities from {}", report.entity_ids.len(), source_queue),
                LogEvent::IngestionResult {
                    queue: source_queue.to_string(),
                    workspace_id: report.workspace_id.to_string(),
                    created: report.created,
                    updated: report.updated,
                },
            )
            .with_batch(report.batch_id),
        )
        .await;
    Ok(())
}

fn log_failure(queue: &str, message_id: i64, err: &Error) {
    warn!(
        subsystem = "jobs",
        queue,
        message_id,
        error = %err,
        error_class = ?err.class(),
        "Ingestion failed"
    );
}

// =============================================================================
// MEMORY INGESTION
// =============================================================================

/// Drains `memory_ingestion` into Memory nodes.
pub struct MemoryIngestionHandler {
    stores: Stores,
    queue: String,
    summarization_queue: String,
}

impl MemoryIngestionHandler {
    pub fn new(stores: Stores) -> Self {
        Self {
            stores,
            queue: defaults::MEMORY_INGESTION_QUEUE.to_string(),
            summarization_queue: defaults::SUMMARIZATION_QUEUE.to_string(),
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_summarization_queue(mut self, queue: impl Into<String>) -> Self {
        self.summarization_queue = queue.into();
        self
    }

    /// Upsert every chunk of a message payload.
    pub async fn ingest(&self, payload: &JsonValue) -> Result<IngestReport> {
        let (workspace_id, user_id, chunks) = MemoryIngestPayload::parse(payload)?.into_parts();
        require_non_empty(&user_id, "user_id")?;
        let workspace = WorkspaceId::resolve(workspace_id.as_deref(), &user_id)?;
        let nodes = memory_nodes(workspace, user_id.trim(), chunks)?;

        let mut report = IngestReport::new(workspace);
        for node in &nodes {
            let outcome = self.stores.graph.upsert_memory(node).await?;
            report.count(node.id, outcome);
        }

        complete(&self.stores, &self.summarization_queue, &self.queue, &report).await?;
        info!(
            subsystem = "jobs",
            component = "memory_ingestion",
            workspace_id = %workspace,
            batch_id = %report.batch_id,
            entity_count = nodes.len(),
            created = report.created,
            updated = report.updated,
            "Memory chunks ingested"
        );
        Ok(report)
    }
}

#[async_trait]
impl MessageHandler for MemoryIngestionHandler {
    fn queue(&self) -> &str {
        &self.queue
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", queue = %ctx.queue, message_id = ctx.message_id()))]
    async fn handle(&self, ctx: MessageContext) -> HandlerOutcome {
        let result = self.ingest(ctx.payload()).await;
        if let Err(e) = &result {
            log_failure(&ctx.queue, ctx.message_id(), e);
        }
        HandlerOutcome::from_result(result.map(|r| r.to_json()))
    }
}

// =============================================================================
// CODE INGESTION
// =============================================================================

/// Drains `code_ingestion` into CodeEntity nodes, one per file.
pub struct CodeIngestionHandler {
    stores: Stores,
    queue: String,
    summarization_queue: String,
}

impl CodeIngestionHandler {
    pub fn new(stores: Stores) -> Self {
        Self {
            stores,
            queue: defaults::CODE_INGESTION_QUEUE.to_string(),
            summarization_queue: defaults::SUMMARIZATION_QUEUE.to_string(),
        }
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_summarization_queue(mut self, queue: impl Into<String>) -> Self {
        self.summarization_queue = queue.into();
        self
    }

    /// Upsert every file of a message payload.
    pub async fn ingest(&self, payload: &JsonValue) -> Result<IngestReport> {
        let (workspace_id, user_id, files) = CodeIngestPayload::parse(payload)?.into_parts();
        require_non_empty(&user_id, "user_id")?;
        let workspace = WorkspaceId::resolve(workspace_id.as_deref(), &user_id)?;
        let nodes = code_nodes(workspace, user_id.trim(), files)?;

        let mut report = IngestReport::new(workspace);
        for node in &nodes {
            let outcome = self.stores.graph.upsert_code_entity(node).await?;
            report.count(node.id, outcome);
        }

        complete(&self.stores, &self.summarization_queue, &self.queue, &report).await?;
        info!(
            subsystem = "jobs",
            component = "code_ingestion",
            workspace_id = %workspace,
            batch_id = %report.batch_id,
            entity_count = nodes.len(),
            created = report.created,
            updated = report.updated,
            "Code files ingested"
        );
        Ok(report)
    }
}

#[async_trait]
impl MessageHandler for CodeIngestionHandler {
    fn queue(&self) -> &str {
        &self.queue
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", queue = %ctx.queue, message_id = ctx.message_id()))]
    async fn handle(&self, ctx: MessageContext) -> HandlerOutcome {
        let result = self.ingest(ctx.payload()).await;
        if let Err(e) = &result {
            log_failure(&ctx.queue, ctx.message_id(), e);
        }
        HandlerOutcome::from_result(result.map(|r| r.to_json()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use devgraph_core::{GraphStore, LogLevel, MessageQueue, QueueMessage};
    use devgraph_db::{InMemoryAuditSink, InMemoryGraphStore, InMemoryQueue};

    const USER: &str = "00000000-0000-0000-0000-0000000000aa";

    struct Fixture {
        queues: Arc<InMemoryQueue>,
        graph: Arc<InMemoryGraphStore>,
        audit: Arc<InMemoryAuditSink>,
        stores: Stores,
    }

    fn fixture() -> Fixture {
        let queues = Arc::new(InMemoryQueue::new());
        let graph = Arc::new(InMemoryGraphStore::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let stores = Stores::new(queues.clone(), graph.clone(), audit.clone());
        Fixture {
            queues,
            graph,
            audit,
            stores,
        }
    }

    fn workspace() -> WorkspaceId {
        WorkspaceId::resolve(None, USER).unwrap()
    }

    fn ctx(queue: &str, payload: JsonValue) -> MessageContext {
        MessageContext::new(
            queue,
            QueueMessage {
                message_id: 1,
                payload,
                read_count: 1,
                enqueued_at: Utc::now(),
            },
        )
    }

    #[test]
    fn test_dedupe_keeps_first_position_and_last_value() {
        let items = vec![("a", 1), ("b", 2), ("a", 3), ("c", 4)];
        let out = dedupe_by_key(items, |(k, _)| *k);
        assert_eq!(out, vec![("a", 3), ("b", 2), ("c", 4)]);
    }

    #[test]
    fn test_metadata_map_rejects_non_objects() {
        assert!(metadata_map(None, "x").unwrap().is_empty());
        assert!(metadata_map(Some(JsonValue::Null), "x").unwrap().is_empty());
        assert!(matches!(
            metadata_map(Some(json!([1, 2])), "x"),
            Err(Error::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_batch_yields_distinct_nodes() {
        let f = fixture();
        let handler = MemoryIngestionHandler::new(f.stores.clone());
        let payload = json!({
            "user_id": USER,
            "chunks": [
                {"chunk_id": "c-1", "content": "first"},
                {"chunk_id": "c-2", "content": "second"},
                {"chunk_id": "c-3", "content": "third"}
            ]
        });

        let report = handler.ingest(&payload).await.unwrap();
        assert_eq!(report.created, 3);
        assert_eq!(report.workspace_id, workspace());

        let ids: std::collections::HashSet<_> = report.entity_ids.iter().collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(f.graph.list_memories(&workspace(), 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_caller_id_is_provenance_only() {
        let f = fixture();
        let handler = MemoryIngestionHandler::new(f.stores.clone());
        let payload = json!({
            "user_id": USER,
            "chunks": [
                {"chunk_id": "c-1", "content": "first", "id": "same"},
                {"chunk_id": "c-2", "content": "second", "id": "same"}
            ]
        });

        let report = handler.ingest(&payload).await.unwrap();
        assert_eq!(report.created, 2);
        let node = f
            .graph
            .get_memory(identity::memory_id(&workspace(), "c-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(node.metadata["source_id"], "same");
    }

    #[tokio::test]
    async fn test_duplicate_chunk_ids_collapse_to_last() {
        let f = fixture();
        let handler = MemoryIngestionHandler::new(f.stores.clone());
        let payload = json!({
            "user_id": USER,
            "chunks": [
                {"chunk_id": "c-1", "content": "old"},
                {"chunk_id": "c-1", "content": "new"}
            ]
        });

        let report = handler.ingest(&payload).await.unwrap();
        assert_eq!(report.entity_ids.len(), 1);
        let node = f
            .graph
            .get_memory(report.entity_ids[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(node.content, "new");
    }

    #[tokio::test]
    async fn test_redelivery_updates_instead_of_duplicating() {
        let f = fixture();
        let handler = MemoryIngestionHandler::new(f.stores.clone());
        let payload = json!({
            "user_id": USER,
            "chunk_id": "c-1",
            "content": "hello",
            "metadata": {"source": "cli"}
        });

        handler.ingest(&payload).await.unwrap();
        let again = handler.ingest(&payload).await.unwrap();
        assert_eq!((again.created, again.updated), (0, 1));
        assert_eq!(f.graph.list_memories(&workspace(), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_success_enqueues_summarization_and_audits() {
        let f = fixture();
        let handler = MemoryIngestionHandler::new(f.stores.clone());
        let outcome = handler
            .handle(ctx(
                defaults::MEMORY_INGESTION_QUEUE,
                json!({"user_id": USER, "chunk_id": "c-1", "content": "hello"}),
            ))
            .await;
        assert!(outcome.is_ack());

        let requests = f.queues.payloads(defaults::SUMMARIZATION_QUEUE).await;
        assert_eq!(requests.len(), 1);
        let request: SummarizationRequest = serde_json::from_value(requests[0].clone()).unwrap();
        assert_eq!(request.workspace_id, workspace());
        assert!(request.batch_id.is_some());

        let records = f.audit.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, LogLevel::Info);
        assert!(matches!(
            records[0].event,
            LogEvent::IngestionResult { created: 1, updated: 0, .. }
        ));
    }

    #[tokio::test]
    async fn test_malformed_messages_are_rejected() {
        let f = fixture();
        let handler = MemoryIngestionHandler::new(f.stores.clone());
        let cases = [
            json!("not an object"),
            json!({"user_id": USER}),
            json!({"user_id": USER, "chunk_id": "", "content": "x"}),
            json!({"user_id": USER, "chunk_id": "c", "content": "  "}),
            json!({"user_id": USER, "chunks": []}),
            json!({"user_id": "not-a-uuid", "chunk_id": "c", "content": "x"}),
            json!({"workspace_id": "org:1", "user_id": USER, "chunk_id": "c", "content": "x"}),
            json!({"user_id": USER, "chunk_id": "c", "content": "x", "metadata": "tags"}),
        ];
        for payload in cases {
            let outcome = handler
                .handle(ctx(defaults::MEMORY_INGESTION_QUEUE, payload.clone()))
                .await;
            assert!(
                matches!(outcome, HandlerOutcome::Reject(_)),
                "expected reject for {}",
                payload
            );
        }
        assert!(f.queues.payloads(defaults::SUMMARIZATION_QUEUE).await.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_retried() {
        let f = fixture();
        f.graph.fail_next_writes(1);
        let handler = MemoryIngestionHandler::new(f.stores.clone());
        let outcome = handler
            .handle(ctx(
                defaults::MEMORY_INGESTION_QUEUE,
                json!({"user_id": USER, "chunk_id": "c-1", "content": "hello"}),
            ))
            .await;
        assert!(matches!(outcome, HandlerOutcome::Retry(_)));
        assert!(f.queues.payloads(defaults::SUMMARIZATION_QUEUE).await.is_empty());
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_fail_ingestion() {
        let f = fixture();
        f.audit.set_failing(true);
        let handler = MemoryIngestionHandler::new(f.stores.clone());
        let outcome = handler
            .handle(ctx(
                defaults::MEMORY_INGESTION_QUEUE,
                json!({"user_id": USER, "chunk_id": "c-1", "content": "hello"}),
            ))
            .await;
        assert!(outcome.is_ack());
    }

    #[tokio::test]
    async fn test_code_ingestion_derives_metadata() {
        let f = fixture();
        let handler = CodeIngestionHandler::new(f.stores.clone());
        let payload = json!({
            "user_id": USER,
            "project_name": "web",
            "files": [
                {
                    "file_path": "src/foo.ts",
                    "content": "import { a } from './a'\nexport function renderFoo() {}\n",
                    "id": 17
                },
                {"file_path": "src/foo.test.ts", "project_name": "web", "content": ""}
            ]
        });

        let report = handler.ingest(&payload).await.unwrap();
        assert_eq!(report.created, 2);

        let nodes = f.graph.list_code_entities(&workspace(), 10).await.unwrap();
        let foo = nodes.iter().find(|n| n.file_path == "src/foo.ts").unwrap();
        assert_eq!(foo.id, identity::code_entity_id(&workspace(), "web", "src/foo.ts"));
        assert_eq!(foo.name, "foo.ts");
        assert_eq!(foo.entity_type, "file");
        assert_eq!(foo.language.as_deref(), Some("typescript"));
        assert_eq!(foo.metadata["functions"], json!(["renderFoo"]));
        assert_eq!(foo.metadata["imports"], json!(["./a"]));
        assert_eq!(foo.metadata["source_id"], 17);

        let test_file = nodes.iter().find(|n| n.file_path == "src/foo.test.ts").unwrap();
        assert_eq!(test_file.metadata["is_test_file"], true);
    }

    #[tokio::test]
    async fn test_same_path_in_two_projects_is_two_nodes() {
        let f = fixture();
        let handler = CodeIngestionHandler::new(f.stores.clone());
        let payload = json!({
            "user_id": USER,
            "files": [
                {"file_path": "src/lib.rs", "project_name": "a", "content": "fn a() {}"},
                {"file_path": "src/lib.rs", "project_name": "b", "content": "fn b() {}"}
            ]
        });
        let report = handler.ingest(&payload).await.unwrap();
        assert_eq!(report.created, 2);
        assert_ne!(report.entity_ids[0], report.entity_ids[1]);
    }

    #[tokio::test]
    async fn test_code_without_project_is_rejected() {
        let f = fixture();
        let handler = CodeIngestionHandler::new(f.stores.clone());
        let outcome = handler
            .handle(ctx(
                defaults::CODE_INGESTION_QUEUE,
                json!({"user_id": USER, "file_path": "src/a.rs", "content": "fn a() {}"}),
            ))
            .await;
        assert!(matches!(outcome, HandlerOutcome::Reject(_)));
        assert!(f.graph.list_code_entities(&workspace(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queue_names_are_configurable() {
        let f = fixture();
        let handler = CodeIngestionHandler::new(f.stores.clone())
            .with_queue("code_in")
            .with_summarization_queue("sum_in");
        assert_eq!(handler.queue(), "code_in");
        handler
            .ingest(&json!({
                "user_id": USER,
                "file_path": "a.py",
                "project_name": "p",
                "content": "def a(): pass"
            }))
            .await
            .unwrap();
        assert_eq!(f.queues.depth("sum_in").await.unwrap(), 1);
    }
}
