//! PostgreSQL-backed queue and graph store tests.
//!
//! **IMPORTANT**: These tests require a PostgreSQL database with the
//! `vector` extension available. Set `DATABASE_URL` or start the test
//! database on port 15432, then run with `cargo test -- --ignored`.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use devgraph_core::identity;
use devgraph_db::test_fixtures::TestDatabase;
use devgraph_db::{
    CodeEntityNode, CodeReference, DetectionMethod, EdgeKind, EntitySummary, EntityType, Error,
    GraphStore, LinkType, MemoryNode, MessageQueue, Pattern, PatternMetadata, PatternSignals,
    PatternType, ScopeData, SummaryFilter, UpsertOutcome, WorkspaceId,
};

const DIM: usize = 8;

fn memory(ws: WorkspaceId, chunk_id: &str, content: &str) -> MemoryNode {
    MemoryNode {
        id: identity::memory_id(&ws, chunk_id),
        workspace_id: ws,
        user_id: ws.owner().to_string(),
        chunk_id: chunk_id.to_string(),
        content: content.to_string(),
        project_name: Some("api".to_string()),
        occurred_at: Utc::now(),
        created_at: Utc::now(),
        embedding: None,
        metadata: json!({"source": "chat"}),
    }
}

fn summary_of(node: &MemoryNode) -> EntitySummary {
    EntitySummary {
        id: identity::summary_id(EntityType::Memory, node.id),
        entity_id: node.id,
        entity_type: EntityType::Memory,
        workspace_id: node.workspace_id,
        user_id: node.user_id.clone(),
        project_name: node.project_name.clone(),
        content_summary: node.content.clone(),
        keyword_frequencies: Default::default(),
        signals: PatternSignals::default(),
        embedding: vec![0.5; DIM],
        occurred_at: node.occurred_at,
        created_at: Utc::now(),
    }
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_queue_lease_ack_and_dead_letter() {
    let t = TestDatabase::new().await.expect("test database");
    let queue = t.queue("memory_ingestion");

    let first = t.db.queues.enqueue(&queue, &json!({"n": 1})).await.unwrap();
    let second = t.db.queues.enqueue(&queue, &json!({"n": 2})).await.unwrap();
    assert_eq!(t.db.queues.depth(&queue).await.unwrap(), 2);

    let leased = t
        .db
        .queues
        .dequeue(&queue, Duration::from_secs(60), 10)
        .await
        .unwrap();
    assert_eq!(
        leased.iter().map(|m| m.message_id).collect::<Vec<_>>(),
        vec![first, second]
    );
    assert!(leased.iter().all(|m| m.read_count == 1));

    // Leased messages are invisible until the timeout lapses.
    assert!(t
        .db
        .queues
        .dequeue(&queue, Duration::from_secs(60), 10)
        .await
        .unwrap()
        .is_empty());

    t.db.queues.ack(&queue, first).await.unwrap();
    t.db.queues.dead_letter(&queue, second, "poison").await.unwrap();

    assert_eq!(t.db.queues.depth(&queue).await.unwrap(), 0);
    assert_eq!(
        t.db.queues.depth(&format!("{}_dlq", queue)).await.unwrap(),
        1
    );
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_nack_makes_message_visible_again() {
    let t = TestDatabase::new().await.expect("test database");
    let queue = t.queue("code_ingestion");
    let id = t.db.queues.enqueue(&queue, &json!({})).await.unwrap();

    t.db.queues
        .dequeue(&queue, Duration::from_secs(600), 1)
        .await
        .unwrap();
    t.db.queues.nack(&queue, id, Duration::ZERO).await.unwrap();

    let again = t
        .db
        .queues
        .dequeue(&queue, Duration::from_secs(600), 1)
        .await
        .unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].read_count, 2);
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_memory_upsert_is_idempotent() {
    let t = TestDatabase::new().await.expect("test database");
    let node = memory(t.workspace, "chunk-1", "debugging the auth flow");

    assert_eq!(
        t.db.graph.upsert_memory(&node).await.unwrap(),
        UpsertOutcome::Created
    );

    let mut again = node.clone();
    again.metadata = json!({"source": null, "lang": "en"});
    assert_eq!(
        t.db.graph.upsert_memory(&again).await.unwrap(),
        UpsertOutcome::Updated
    );

    let stored = t.db.graph.get_memory(node.id).await.unwrap().unwrap();
    assert_eq!(stored.metadata, json!({"source": "chat", "lang": "en"}));
    assert_eq!(
        t.db.graph.list_memories(&t.workspace, 10).await.unwrap().len(),
        1
    );
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_summary_removes_entity_from_unsummarized() {
    let t = TestDatabase::new().await.expect("test database");
    let node = memory(t.workspace, "chunk-1", "learning sqlx");
    t.db.graph.upsert_memory(&node).await.unwrap();

    assert_eq!(
        t.db.graph
            .unsummarized_entities(&t.workspace, 10)
            .await
            .unwrap()
            .len(),
        1
    );

    let summary = summary_of(&node);
    assert_eq!(
        t.db.graph.write_summary(&summary).await.unwrap(),
        UpsertOutcome::Created
    );
    assert!(t
        .db
        .graph
        .unsummarized_entities(&t.workspace, 10)
        .await
        .unwrap()
        .is_empty());

    let stored = t
        .db
        .graph
        .list_summaries(&t.workspace, &SummaryFilter::of_type(EntityType::Memory))
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].embedding.len(), DIM);

    let mut duplicate = summary.clone();
    duplicate.id = Uuid::new_v4();
    assert!(matches!(
        t.db.graph.write_summary(&duplicate).await,
        Err(Error::ConstraintViolation(_))
    ));
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_pattern_upsert_preserves_first_detected_and_replaces_edges() {
    let t = TestDatabase::new().await.expect("test database");
    let scope = t.workspace.to_string();
    let name = "debugging-cluster-test";
    let first_seen = Utc::now() - chrono::Duration::days(3);

    let mut pattern = Pattern {
        id: identity::pattern_id(name, &scope, "2026-W42"),
        pattern_type: PatternType::Debugging,
        pattern_name: name.to_string(),
        scope_id: scope.clone(),
        scope_data: ScopeData {
            project: None,
            period: "2026-W42".to_string(),
        },
        confidence: 0.9,
        frequency: 3,
        batch_id: Uuid::now_v7(),
        first_detected: first_seen,
        last_updated: Utc::now(),
        metadata: PatternMetadata {
            detection_method: DetectionMethod::SemanticCluster,
            avg_similarity: Some(0.9),
            min_similarity: Some(0.85),
            temporal_grouping: "iso_week".to_string(),
            sample_entity_ids: vec![],
        },
    };

    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    let c = Uuid::new_v4();
    t.db.graph.upsert_pattern(&pattern, &[a, b], &[]).await.unwrap();

    pattern.first_detected = Utc::now();
    pattern.frequency = 2;
    assert_eq!(
        t.db.graph.upsert_pattern(&pattern, &[b, c], &[]).await.unwrap(),
        UpsertOutcome::Updated
    );

    let stored = t.db.graph.list_patterns(&scope).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].frequency, 2);
    assert_eq!(
        stored[0].first_detected.timestamp_millis(),
        first_seen.timestamp_millis()
    );

    let mut targets: Vec<Uuid> = t
        .db
        .graph
        .edges_from(pattern.id, Some(EdgeKind::FoundIn))
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.to_id)
        .collect();
    targets.sort();
    let mut expected = vec![b, c];
    expected.sort();
    assert_eq!(targets, expected);
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_link_memory_code_writes_both_directions() {
    let t = TestDatabase::new().await.expect("test database");
    let node = memory(t.workspace, "chunk-1", "see src/auth.rs");
    t.db.graph.upsert_memory(&node).await.unwrap();

    let link = CodeReference {
        memory_id: node.id,
        code_id: Uuid::new_v4(),
        link_type: LinkType::PathMatch,
        similarity: None,
    };
    assert!(t.db.graph.link_memory_code(&link).await.unwrap());
    assert!(!t.db.graph.link_memory_code(&link).await.unwrap());

    let forward = t
        .db
        .graph
        .edges_from(node.id, Some(EdgeKind::ReferencesCode))
        .await
        .unwrap();
    let backward = t
        .db
        .graph
        .edges_from(link.code_id, Some(EdgeKind::DiscussedIn))
        .await
        .unwrap();
    assert_eq!(forward.len(), 1);
    assert_eq!(backward.len(), 1);
    assert_eq!(forward[0].properties["link_type"], "path_match");

    let stored = t.db.graph.get_memory(node.id).await.unwrap().unwrap();
    assert_eq!(stored.metadata["has_code_references"], true);
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_workspace_due_until_detection_recorded() {
    let t = TestDatabase::new().await.expect("test database");
    let node = memory(t.workspace, "chunk-1", "refactor the parser");
    t.db.graph.upsert_memory(&node).await.unwrap();
    t.db.graph.write_summary(&summary_of(&node)).await.unwrap();

    let due = t
        .db
        .graph
        .workspaces_due(Duration::from_secs(3600), 10_000)
        .await
        .unwrap();
    assert!(due.contains(&t.workspace));

    t.db.graph
        .record_detection_run(&t.workspace, Uuid::now_v7())
        .await
        .unwrap();
    let due = t
        .db
        .graph
        .workspaces_due(Duration::from_secs(3600), 10_000)
        .await
        .unwrap();
    assert!(!due.contains(&t.workspace));
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_concurrent_identical_upserts_all_succeed() {
    let t = TestDatabase::new().await.expect("test database");

    for round in 0..25 {
        let node = memory(t.workspace, &format!("race-{}", round), "same message twice");
        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let graph = t.db.graph.clone();
            let node = node.clone();
            tasks.spawn(async move { graph.upsert_memory(&node).await });
        }

        let mut created = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined.expect("task panicked") {
                Ok(UpsertOutcome::Created) => created += 1,
                Ok(UpsertOutcome::Updated) => {}
                Err(e) => panic!("round {}: concurrent upsert failed: {}", round, e),
            }
        }
        assert_eq!(created, 1, "round {}", round);
    }

    assert_eq!(
        t.db.graph.list_memories(&t.workspace, 100).await.unwrap().len(),
        25
    );
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_code_reingest_replaces_content_and_metadata() {
    let t = TestDatabase::new().await.expect("test database");
    let node = CodeEntityNode {
        id: identity::code_entity_id(&t.workspace, "api", "src/auth.rs"),
        workspace_id: t.workspace,
        user_id: t.workspace.owner().to_string(),
        project_name: "api".to_string(),
        file_path: "src/auth.rs".to_string(),
        name: "auth.rs".to_string(),
        entity_type: "file".to_string(),
        language: Some("rust".to_string()),
        content: "fn login() {}".to_string(),
        last_modified: None,
        created_at: Utc::now(),
        metadata: json!({"functions": ["login"], "owner": "core"}),
    };
    t.db.graph.upsert_code_entity(&node).await.unwrap();

    let mut changed = node.clone();
    changed.content = "fn logout() {}".to_string();
    changed.metadata = json!({"functions": ["logout"], "owner": null});
    t.db.graph.upsert_code_entity(&changed).await.unwrap();

    let stored = t
        .db
        .graph
        .list_code_entities(&t.workspace, 10)
        .await
        .unwrap()
        .remove(0);
    assert_eq!(stored.content, "fn logout() {}");
    assert_eq!(stored.metadata, json!({"functions": ["logout"], "owner": "core"}));
}

#[tokio::test]
#[ignore] // Requires database connection
async fn test_summary_limit_keeps_newest_rows() {
    let t = TestDatabase::new().await.expect("test database");
    let base = Utc::now() - chrono::Duration::hours(1);
    let mut ids = Vec::new();
    for i in 0..4 {
        let mut node = memory(t.workspace, &format!("chunk-{i}"), "tuning the cache");
        node.occurred_at = base + chrono::Duration::minutes(i);
        t.db.graph.upsert_memory(&node).await.unwrap();
        t.db.graph.write_summary(&summary_of(&node)).await.unwrap();
        ids.push(node.id);
    }

    let newest = t
        .db
        .graph
        .list_summaries(&t.workspace, &SummaryFilter::default().with_limit(2))
        .await
        .unwrap();
    assert_eq!(
        newest.iter().map(|s| s.entity_id).collect::<Vec<_>>(),
        vec![ids[2], ids[3]]
    );

    let scoped = t
        .db
        .graph
        .list_summaries(&t.workspace, &SummaryFilter::for_entities(vec![ids[1]]))
        .await
        .unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].entity_id, ids[1]);
}
