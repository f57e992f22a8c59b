//! End-to-end pipeline scenarios over the in-memory stores.
//!
//! Each stage runs as a real queue worker that stops once its queue is
//! empty, so messages flow exactly as they would in production.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value as JsonValue};

use devgraph_db::{InMemoryAuditSink, InMemoryGraphStore, InMemoryQueue};
use devgraph_inference::{EmbedderConfig, MockEmbeddingBackend};
use devgraph_jobs::{
    defaults, dead_letter_queue, CodeIngestionHandler, DetectionMethod, EdgeKind, GraphStore,
    LogEvent, MemoryIngestionHandler, MessageHandler, MessageQueue, PatternConfig,
    PatternDetectionHandler, RelationshipConfig, StopReason, Stores, SummarizationConfig,
    SummarizationHandler, WorkerBuilder, WorkerConfig, WorkspaceId,
};

const USER: &str = "5b1e0a52-3f43-4c0e-9a57-2f1d1f6b0c01";
const DIM: usize = 64;

struct Pipeline {
    queues: Arc<InMemoryQueue>,
    graph: Arc<InMemoryGraphStore>,
    audit: Arc<InMemoryAuditSink>,
    stores: Stores,
}

impl Pipeline {
    fn new() -> Self {
        let queues = Arc::new(InMemoryQueue::new());
        let graph = Arc::new(InMemoryGraphStore::new());
        let audit = Arc::new(InMemoryAuditSink::new());
        let stores = Stores::new(queues.clone(), graph.clone(), audit.clone());
        Self {
            queues,
            graph,
            audit,
            stores,
        }
    }

    fn workspace() -> WorkspaceId {
        WorkspaceId::resolve(None, USER).unwrap()
    }

    async fn enqueue(&self, queue: &str, payload: JsonValue) {
        self.queues.enqueue(queue, &payload).await.unwrap();
    }

    /// Run a worker for `handler` until its queue is empty.
    async fn drain<H: MessageHandler + 'static>(&self, handler: H) -> StopReason {
        let worker = WorkerBuilder::new(self.stores.clone())
            .with_config(
                WorkerConfig::default()
                    .with_stop_when_idle(true)
                    .with_poll_interval(10)
                    .with_retry_delay(Duration::ZERO),
            )
            .with_handler(handler)
            .build()
            .expect("worker");
        worker.run_to_completion().await
    }

    fn summarizer(&self, backend: MockEmbeddingBackend) -> SummarizationHandler {
        let config = SummarizationConfig::default().with_embedder(
            EmbedderConfig::default()
                .with_dimension(DIM)
                .with_max_retries(0)
                .with_base_delay(Duration::from_millis(1)),
        );
        SummarizationHandler::new(self.stores.clone(), backend, config).expect("summarizer")
    }

    fn detector(&self) -> PatternDetectionHandler {
        PatternDetectionHandler::new(
            self.stores.clone(),
            PatternConfig::default(),
            RelationshipConfig::default(),
        )
    }

    /// Drain every stage in pipeline order.
    async fn run_all(&self, backend: MockEmbeddingBackend) {
        assert_eq!(
            self.drain(MemoryIngestionHandler::new(self.stores.clone())).await,
            StopReason::Idle
        );
        assert_eq!(
            self.drain(CodeIngestionHandler::new(self.stores.clone())).await,
            StopReason::Idle
        );
        assert_eq!(self.drain(self.summarizer(backend)).await, StopReason::Idle);
        assert_eq!(self.drain(self.detector()).await, StopReason::Idle);
    }
}

fn backend() -> MockEmbeddingBackend {
    MockEmbeddingBackend::new()
        .with_dimension(DIM)
        .with_topic("login redirect")
}

fn chunk(id: &str, content: &str, occurred_at: &str) -> JsonValue {
    json!({"chunk_id": id, "content": content, "occurred_at": occurred_at})
}

#[tokio::test]
async fn test_batch_without_ids_yields_distinct_nodes() {
    let p = Pipeline::new();
    p.enqueue(
        defaults::MEMORY_INGESTION_QUEUE,
        json!({
            "user_id": USER,
            "chunks": [
                chunk("a", "first chunk", "2026-03-02T09:00:00Z"),
                chunk("b", "second chunk", "2026-03-02T09:01:00Z"),
                chunk("c", "third chunk", "2026-03-02T09:02:00Z")
            ]
        }),
    )
    .await;

    p.drain(MemoryIngestionHandler::new(p.stores.clone())).await;

    let memories = p.graph.list_memories(&Pipeline::workspace(), 10).await.unwrap();
    assert_eq!(memories.len(), 3);
    let mut ids: Vec<_> = memories.iter().map(|m| m.id).collect();
    ids.dedup();
    assert_eq!(ids.len(), 3);
}

#[tokio::test]
async fn test_redelivery_creates_no_duplicates() {
    let p = Pipeline::new();
    let message = json!({
        "user_id": USER,
        "chunks": [
            chunk("a", "first chunk", "2026-03-02T09:00:00Z"),
            chunk("b", "second chunk", "2026-03-02T09:01:00Z")
        ]
    });
    p.enqueue(defaults::MEMORY_INGESTION_QUEUE, message.clone()).await;
    p.enqueue(defaults::MEMORY_INGESTION_QUEUE, message).await;

    p.run_all(backend()).await;

    assert_eq!(p.graph.list_memories(&Pipeline::workspace(), 10).await.unwrap().len(), 2);
    assert_eq!(p.graph.summary_count().await, 2);
    assert_eq!(p.graph.edges_of_kind(EdgeKind::Summarizes).await.len(), 2);
    for queue in [
        defaults::MEMORY_INGESTION_QUEUE,
        defaults::SUMMARIZATION_QUEUE,
        defaults::PATTERN_DETECTION_QUEUE,
    ] {
        assert_eq!(p.queues.depth(queue).await.unwrap(), 0, "{} not drained", queue);
    }
}

#[tokio::test]
async fn test_resummarization_keeps_five_summaries() {
    let p = Pipeline::new();
    let chunks: Vec<JsonValue> = (0..5)
        .map(|i| chunk(&format!("c{}", i), &format!("note number {}", i), "2026-03-02T09:00:00Z"))
        .collect();
    p.enqueue(
        defaults::MEMORY_INGESTION_QUEUE,
        json!({"user_id": USER, "chunks": chunks}),
    )
    .await;
    p.run_all(backend()).await;
    assert_eq!(p.graph.summary_count().await, 5);

    let mock = backend();
    p.enqueue(
        defaults::SUMMARIZATION_QUEUE,
        json!({"workspace_id": Pipeline::workspace().to_string()}),
    )
    .await;
    p.drain(p.summarizer(mock.clone())).await;

    assert_eq!(p.graph.summary_count().await, 5);
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn test_four_similar_memories_form_one_pattern() {
    let p = Pipeline::new();
    p.enqueue(
        defaults::MEMORY_INGESTION_QUEUE,
        json!({
            "user_id": USER,
            "chunks": [
                chunk("a", "login redirect loops on safari", "2026-03-02T09:00:00Z"),
                chunk("b", "login redirect drops the session cookie", "2026-03-03T10:00:00Z"),
                chunk("c", "the login redirect target is stale", "2026-03-04T11:00:00Z"),
                chunk("d", "login redirect works behind the proxy now", "2026-03-05T12:00:00Z"),
                chunk("e", "quarterly planning for the design offsite", "2026-03-05T13:00:00Z")
            ]
        }),
    )
    .await;

    p.run_all(backend()).await;

    let patterns = p
        .graph
        .list_patterns(&Pipeline::workspace().to_string())
        .await
        .unwrap();
    let semantic: Vec<_> = patterns
        .iter()
        .filter(|pat| pat.metadata.detection_method == DetectionMethod::SemanticCluster)
        .collect();
    assert_eq!(semantic.len(), 1);
    let pattern = semantic[0];
    assert_eq!(pattern.frequency, 4);
    assert_eq!(pattern.scope_data.period, "2026-W10");
    assert!(pattern.confidence >= 0.85 && pattern.confidence <= 1.0);

    let outlier = devgraph_jobs::identity::memory_id(&Pipeline::workspace(), "e");
    let derived = p
        .graph
        .edges_from(pattern.id, Some(EdgeKind::DerivedFrom))
        .await
        .unwrap();
    assert_eq!(derived.len(), 4);
    assert!(derived.iter().all(|e| e.to_id != outlier));
    assert_eq!(
        p.graph
            .edges_from(pattern.id, Some(EdgeKind::FoundIn))
            .await
            .unwrap()
            .len(),
        4
    );

    for pat in &patterns {
        assert!((0.0..=1.0).contains(&pat.confidence));
        assert!(pat.frequency as usize >= defaults::PATTERN_MIN_FREQUENCY);
    }
}

#[tokio::test]
async fn test_detection_rerun_is_idempotent() {
    let p = Pipeline::new();
    let chunks: Vec<JsonValue> = (0..4)
        .map(|i| {
            chunk(
                &format!("c{}", i),
                &format!("login redirect attempt {}", i),
                &format!("2026-03-02T09:0{}:00Z", i),
            )
        })
        .collect();
    p.enqueue(
        defaults::MEMORY_INGESTION_QUEUE,
        json!({"user_id": USER, "chunks": chunks}),
    )
    .await;
    p.run_all(backend()).await;

    let before = p
        .graph
        .list_patterns(&Pipeline::workspace().to_string())
        .await
        .unwrap();
    assert!(!before.is_empty());

    p.enqueue(
        defaults::PATTERN_DETECTION_QUEUE,
        json!({"workspace_id": Pipeline::workspace().to_string()}),
    )
    .await;
    p.drain(p.detector()).await;

    let after = p
        .graph
        .list_patterns(&Pipeline::workspace().to_string())
        .await
        .unwrap();
    assert_eq!(after.len(), before.len());
    for (a, b) in before.iter().zip(&after) {
        assert_eq!(a.id, b.id);
        assert_eq!(a.frequency, b.frequency);
        assert_eq!(a.first_detected, b.first_detected);
        assert!(b.last_updated >= a.last_updated);
    }
}

#[tokio::test]
async fn test_path_reference_links_memory_and_code_once() {
    let p = Pipeline::new();
    p.enqueue(
        defaults::MEMORY_INGESTION_QUEUE,
        json!({
            "user_id": USER,
            "chunk_id": "m1",
            "content": "The crash comes from src/foo.ts when the list is empty"
        }),
    )
    .await;
    p.enqueue(
        defaults::CODE_INGESTION_QUEUE,
        json!({
            "user_id": USER,
            "file_path": "src/foo.ts",
            "project_name": "web",
            "content": "export function renderList(items) { return items[0].name }"
        }),
    )
    .await;

    p.run_all(backend()).await;
    p.enqueue(
        defaults::PATTERN_DETECTION_QUEUE,
        json!({"workspace_id": Pipeline::workspace().to_string(), "pattern_types": ["memory_code"]}),
    )
    .await;
    p.drain(p.detector()).await;

    let references = p.graph.edges_of_kind(EdgeKind::ReferencesCode).await;
    let discussed = p.graph.edges_of_kind(EdgeKind::DiscussedIn).await;
    assert_eq!(references.len(), 1);
    assert_eq!(discussed.len(), 1);
    assert_eq!(references[0].from_id, discussed[0].to_id);
    assert_eq!(references[0].to_id, discussed[0].from_id);
    assert_eq!(references[0].properties["link_type"], "path_match");
}

#[tokio::test]
async fn test_wrong_embedding_length_stops_summarization() {
    let p = Pipeline::new();
    p.enqueue(
        defaults::MEMORY_INGESTION_QUEUE,
        json!({"user_id": USER, "chunk_id": "m1", "content": "hello"}),
    )
    .await;
    p.drain(MemoryIngestionHandler::new(p.stores.clone())).await;

    let broken = MockEmbeddingBackend::new()
        .with_dimension(DIM)
        .with_output_dimension(DIM / 2);
    let reason = p.drain(p.summarizer(broken)).await;

    assert_eq!(reason, StopReason::Fatal);
    assert_eq!(p.graph.summary_count().await, 0);
    assert_eq!(p.queues.depth(defaults::SUMMARIZATION_QUEUE).await.unwrap(), 1);
    assert_eq!(
        p.queues
            .depth(&dead_letter_queue(defaults::SUMMARIZATION_QUEUE))
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn test_poison_message_is_dead_lettered() {
    let p = Pipeline::new();
    p.enqueue(defaults::MEMORY_INGESTION_QUEUE, json!({"user_id": USER})).await;
    p.enqueue(
        defaults::MEMORY_INGESTION_QUEUE,
        json!({"user_id": USER, "chunk_id": "ok", "content": "fine"}),
    )
    .await;

    p.drain(MemoryIngestionHandler::new(p.stores.clone())).await;

    assert_eq!(p.graph.list_memories(&Pipeline::workspace(), 10).await.unwrap().len(), 1);
    assert_eq!(
        p.queues
            .depth(&dead_letter_queue(defaults::MEMORY_INGESTION_QUEUE))
            .await
            .unwrap(),
        1
    );
    assert!(p
        .audit
        .records()
        .await
        .iter()
        .any(|r| matches!(r.event, LogEvent::MessageDeadLettered { .. })));
}
