//! Knowledge-graph repository: source nodes, summaries, patterns, and edges.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use devgraph_core::{
    CodeEntityNode, CodeReference, Edge, EdgeKind, EntitySummary, Error, GraphStore,
    MemoryNode, PageCursor, Pattern, PatternMetadata, PatternType, Result, RetryPolicy,
    ScopeData, SourceEntity, SummaryFilter, UpsertOutcome, WorkspaceId,
};

const MEMORY_COLUMNS: &str = "id, workspace_id, user_id, chunk_id, content, project_name, \
     occurred_at, created_at, embedding, metadata";

const CODE_COLUMNS: &str = "id, workspace_id, user_id, project_name, file_path, name, \
     entity_type, language, content, last_modified, created_at, metadata";

const SUMMARY_COLUMNS: &str = "id, entity_id, entity_type, workspace_id, user_id, project_name, \
     content_summary, keyword_frequencies, pattern_signals, embedding, occurred_at, created_at";

const PATTERN_COLUMNS: &str = "id, pattern_type, pattern_name, scope_id, scope_data, \
     confidence, frequency, batch_id, first_detected, last_updated, metadata";

/// PostgreSQL implementation of GraphStore.
///
/// Every operation is retried under the configured [`RetryPolicy`] when it
/// fails with a transient store error. Multi-row writes run in one
/// transaction so a retry never observes a partial write.
#[derive(Clone)]
pub struct PgGraphStore {
    pool: Pool<Postgres>,
    retry: RetryPolicy,
}

impl PgGraphStore {
    /// Create a new PgGraphStore with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self {
            pool,
            retry: RetryPolicy::default(),
        }
    }

    /// Override the transient-failure retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    // =========================================================================
    // Row parsing
    // =========================================================================

    fn parse_workspace(row: &PgRow) -> Result<WorkspaceId> {
        row.get::<String, _>("workspace_id").parse()
    }

    fn parse_memory_row(row: &PgRow) -> Result<MemoryNode> {
        Ok(MemoryNode {
            id: row.get("id"),
            workspace_id: Self::parse_workspace(row)?,
            user_id: row.get("user_id"),
            chunk_id: row.get("chunk_id"),
            content: row.get("content"),
            project_name: row.get("project_name"),
            occurred_at: row.get("occurred_at"),
            created_at: row.get("created_at"),
            embedding: row
                .get::<Option<Vector>, _>("embedding")
                .map(|v| v.to_vec()),
            metadata: row.get("metadata"),
        })
    }

    fn parse_code_row(row: &PgRow) -> Result<CodeEntityNode> {
        Ok(CodeEntityNode {
            id: row.get("id"),
            workspace_id: Self::parse_workspace(row)?,
            user_id: row.get("user_id"),
            project_name: row.get("project_name"),
            file_path: row.get("file_path"),
            name: row.get("name"),
            entity_type: row.get("entity_type"),
            language: row.get("language"),
            content: row.get("content"),
            last_modified: row.get("last_modified"),
            created_at: row.get("created_at"),
            metadata: row.get("metadata"),
        })
    }

    fn parse_summary_row(row: &PgRow) -> Result<EntitySummary> {
        let entity_type: String = row.get("entity_type");
        Ok(EntitySummary {
            id: row.get("id"),
            entity_id: row.get("entity_id"),
            entity_type: entity_type.parse()?,
            workspace_id: Self::parse_workspace(row)?,
            user_id: row.get("user_id"),
            project_name: row.get("project_name"),
            content_summary: row.get("content_summary"),
            keyword_frequencies: serde_json::from_value(row.get("keyword_frequencies"))?,
            signals: serde_json::from_value(row.get("pattern_signals"))?,
            embedding: row.get::<Vector, _>("embedding").to_vec(),
            occurred_at: row.get("occurred_at"),
            created_at: row.get("created_at"),
        })
    }

    fn parse_pattern_row(row: &PgRow) -> Result<Pattern> {
        let pattern_type: String = row.get("pattern_type");
        let scope_data: ScopeData = serde_json::from_value(row.get("scope_data"))?;
        let metadata: PatternMetadata = serde_json::from_value(row.get("metadata"))?;
        Ok(Pattern {
            id: row.get("id"),
            pattern_type: pattern_type.parse::<PatternType>()?,
            pattern_name: row.get("pattern_name"),
            scope_id: row.get("scope_id"),
            scope_data,
            confidence: row.get("confidence"),
            frequency: row.get("frequency"),
            batch_id: row.get("batch_id"),
            first_detected: row.get("first_detected"),
            last_updated: row.get("last_updated"),
            metadata,
        })
    }

    fn parse_edge_row(row: &PgRow) -> Result<Edge> {
        let kind: String = row.get("kind");
        Ok(Edge {
            from_id: row.get("from_id"),
            to_id: row.get("to_id"),
            kind: kind.parse()?,
            properties: row.get("properties"),
            created_at: row.get("created_at"),
        })
    }

    fn outcome(inserted: bool) -> UpsertOutcome {
        if inserted {
            UpsertOutcome::Created
        } else {
            UpsertOutcome::Updated
        }
    }

    // =========================================================================
    // Single attempts
    // =========================================================================

    async fn upsert_memory_once(&self, node: &MemoryNode) -> Result<UpsertOutcome> {
        // Content and occurred_at are immutable once written; metadata is
        // merged without letting nulls overwrite existing keys.
        let inserted: bool = sqlx::query_scalar(
            "INSERT INTO memory_node
                (id, workspace_id, user_id, chunk_id, content, project_name,
                 occurred_at, created_at, embedding, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9,
                     CASE WHEN jsonb_typeof($10) = 'object' THEN jsonb_strip_nulls($10) ELSE '{}'::jsonb END)
             ON CONFLICT (id) DO UPDATE SET
                project_name = COALESCE(EXCLUDED.project_name, memory_node.project_name),
                embedding = COALESCE(memory_node.embedding, EXCLUDED.embedding),
                metadata = memory_node.metadata || EXCLUDED.metadata,
                updated_at = now()
             RETURNING (xmax = 0) AS inserted",
        )
        .bind(node.id)
        .bind(node.workspace_id.to_string())
        .bind(&node.user_id)
        .bind(&node.chunk_id)
        .bind(&node.content)
        .bind(&node.project_name)
        .bind(node.occurred_at)
        .bind(node.created_at)
        .bind(node.embedding.clone().map(Vector::from))
        .bind(&node.metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(Self::outcome(inserted))
    }

    async fn upsert_code_entity_once(&self, node: &CodeEntityNode) -> Result<UpsertOutcome> {
        // A re-ingested file replaces its content together with the metadata
        // derived from it.
        let inserted: bool = sqlx::query_scalar(
            "INSERT INTO code_entity_node
                (id, workspace_id, user_id, project_name, file_path, name, entity_type,
                 language, content, last_modified, created_at, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                     CASE WHEN jsonb_typeof($12) = 'object' THEN jsonb_strip_nulls($12) ELSE '{}'::jsonb END)
             ON CONFLICT (id) DO UPDATE SET
                content = EXCLUDED.content,
                name = EXCLUDED.name,
                entity_type = EXCLUDED.entity_type,
                language = COALESCE(EXCLUDED.language, code_entity_node.language),
                last_modified = COALESCE(EXCLUDED.last_modified, code_entity_node.last_modified),
                metadata = code_entity_node.metadata || EXCLUDED.metadata,
                updated_at = now()
             RETURNING (xmax = 0) AS inserted",
        )
        .bind(node.id)
        .bind(node.workspace_id.to_string())
        .bind(&node.user_id)
        .bind(&node.project_name)
        .bind(&node.file_path)
        .bind(&node.name)
        .bind(&node.entity_type)
        .bind(&node.language)
        .bind(&node.content)
        .bind(node.last_modified)
        .bind(node.created_at)
        .bind(&node.metadata)
        .fetch_one(&self.pool)
        .await?;
        Ok(Self::outcome(inserted))
    }

    async fn unsummarized_once(
        &self,
        workspace: &WorkspaceId,
        limit: usize,
    ) -> Result<Vec<SourceEntity>> {
        let ws = workspace.to_string();
        let limit = limit as i64;

        let memory_rows = sqlx::query(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memory_node m
             WHERE m.workspace_id = $1
               AND NOT EXISTS (
                   SELECT 1 FROM graph_edge e
                   WHERE e.to_id = m.id AND e.kind = 'SUMMARIZES')
             ORDER BY m.created_at, m.id
             LIMIT $2"
        ))
        .bind(&ws)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let code_rows = sqlx::query(&format!(
            "SELECT {CODE_COLUMNS} FROM code_entity_node c
             WHERE c.workspace_id = $1
               AND NOT EXISTS (
                   SELECT 1 FROM graph_edge e
                   WHERE e.to_id = c.id AND e.kind = 'SUMMARIZES')
             ORDER BY c.created_at, c.id
             LIMIT $2"
        ))
        .bind(&ws)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut entities = Vec::with_capacity(memory_rows.len() + code_rows.len());
        for row in &memory_rows {
            entities.push(SourceEntity::Memory(Self::parse_memory_row(row)?));
        }
        for row in &code_rows {
            entities.push(SourceEntity::Code(Self::parse_code_row(row)?));
        }
        entities.sort_by_key(|e| (created_at(e), e.entity_id()));
        entities.truncate(limit as usize);
        Ok(entities)
    }

    async fn write_summary_once(&self, summary: &EntitySummary) -> Result<UpsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let inserted: Option<bool> = sqlx::query_scalar(
            "INSERT INTO entity_summary
                (id, entity_id, entity_type, workspace_id, user_id, project_name,
                 content_summary, keyword_frequencies, pattern_signals, embedding,
                 occurred_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (entity_id, entity_type) DO UPDATE SET
                content_summary = EXCLUDED.content_summary,
                keyword_frequencies = EXCLUDED.keyword_frequencies,
                pattern_signals = EXCLUDED.pattern_signals,
                embedding = EXCLUDED.embedding,
                project_name = EXCLUDED.project_name,
                occurred_at = EXCLUDED.occurred_at,
                updated_at = now()
             WHERE entity_summary.id = EXCLUDED.id
             RETURNING (xmax = 0) AS inserted",
        )
        .bind(summary.id)
        .bind(summary.entity_id)
        .bind(summary.entity_type.as_str())
        .bind(summary.workspace_id.to_string())
        .bind(&summary.user_id)
        .bind(&summary.project_name)
        .bind(&summary.content_summary)
        .bind(serde_json::to_value(&summary.keyword_frequencies)?)
        .bind(serde_json::to_value(&summary.signals)?)
        .bind(Vector::from(summary.embedding.clone()))
        .bind(summary.occurred_at)
        .bind(summary.created_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(inserted) = inserted else {
            return Err(Error::ConstraintViolation(format!(
                "entity {} ({}) already has a summary with a different id",
                summary.entity_id, summary.entity_type
            )));
        };

        sqlx::query(
            "INSERT INTO graph_edge (from_id, to_id, kind)
             VALUES ($1, $2, 'SUMMARIZES')
             ON CONFLICT DO NOTHING",
        )
        .bind(summary.id)
        .bind(summary.entity_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Self::outcome(inserted))
    }

    async fn list_summaries_once(
        &self,
        workspace: &WorkspaceId,
        filter: &SummaryFilter,
    ) -> Result<Vec<EntitySummary>> {
        // The cap keeps the newest rows; they are handed back oldest first.
        let rows = sqlx::query(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM entity_summary
             WHERE workspace_id = $1
               AND ($2::text IS NULL OR entity_type = $2)
               AND ($3::timestamptz IS NULL OR occurred_at >= $3)
               AND ($4::timestamptz IS NULL OR occurred_at < $4)
               AND ($6::uuid[] IS NULL OR entity_id = ANY($6))
             ORDER BY occurred_at DESC, id DESC
             LIMIT $5"
        ))
        .bind(workspace.to_string())
        .bind(filter.entity_type.map(|t| t.as_str()))
        .bind(filter.window.map(|w| w.start))
        .bind(filter.window.map(|w| w.end))
        .bind(filter.limit.map(|l| l as i64))
        .bind(filter.entity_ids.as_deref())
        .fetch_all(&self.pool)
        .await?;

        let mut summaries = rows
            .iter()
            .map(Self::parse_summary_row)
            .collect::<Result<Vec<_>>>()?;
        summaries.reverse();
        Ok(summaries)
    }

    async fn upsert_pattern_once(
        &self,
        pattern: &Pattern,
        found_in: &[Uuid],
        derived_from: &[Uuid],
    ) -> Result<UpsertOutcome> {
        let mut tx = self.pool.begin().await?;

        // first_detected survives re-detection; every measured value is replaced.
        let row = sqlx::query(
            "INSERT INTO pattern
                (id, pattern_type, pattern_name, scope_id, period, scope_data, confidence,
                 frequency, batch_id, first_detected, last_updated, metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (id) DO UPDATE SET
                pattern_type = EXCLUDED.pattern_type,
                scope_data = EXCLUDED.scope_data,
                confidence = EXCLUDED.confidence,
                frequency = EXCLUDED.frequency,
                batch_id = EXCLUDED.batch_id,
                last_updated = EXCLUDED.last_updated,
                metadata = EXCLUDED.metadata
             RETURNING id, (xmax = 0) AS inserted",
        )
        .bind(pattern.id)
        .bind(pattern.pattern_type.as_str())
        .bind(&pattern.pattern_name)
        .bind(&pattern.scope_id)
        .bind(&pattern.scope_data.period)
        .bind(serde_json::to_value(&pattern.scope_data)?)
        .bind(pattern.confidence)
        .bind(pattern.frequency)
        .bind(pattern.batch_id)
        .bind(pattern.first_detected)
        .bind(pattern.last_updated)
        .bind(serde_json::to_value(&pattern.metadata)?)
        .fetch_one(&mut *tx)
        .await?;

        let pattern_id: Uuid = row.get("id");
        let inserted: bool = row.get("inserted");

        for (kind, targets) in [
            (EdgeKind::FoundIn, found_in),
            (EdgeKind::DerivedFrom, derived_from),
        ] {
            sqlx::query(
                "DELETE FROM graph_edge
                 WHERE from_id = $1 AND kind = $2 AND NOT (to_id = ANY($3))",
            )
            .bind(pattern_id)
            .bind(kind.as_str())
            .bind(targets)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO graph_edge (from_id, to_id, kind)
                 SELECT $1, target, $2 FROM unnest($3::uuid[]) AS target
                 ON CONFLICT DO NOTHING",
            )
            .bind(pattern_id)
            .bind(kind.as_str())
            .bind(targets)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!(
            subsystem = "graph",
            op = "upsert_pattern",
            pattern_name = %pattern.pattern_name,
            found_in = found_in.len(),
            derived_from = derived_from.len(),
            "Pattern written"
        );
        Ok(Self::outcome(inserted))
    }

    async fn link_memory_code_once(&self, link: &CodeReference) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let properties = link.properties();

        let created = sqlx::query(
            "INSERT INTO graph_edge (from_id, to_id, kind, properties)
             VALUES ($1, $2, 'REFERENCES_CODE', $3)
             ON CONFLICT DO NOTHING",
        )
        .bind(link.memory_id)
        .bind(link.code_id)
        .bind(&properties)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        sqlx::query(
            "INSERT INTO graph_edge (from_id, to_id, kind, properties)
             VALUES ($1, $2, 'DISCUSSED_IN', $3)
             ON CONFLICT DO NOTHING",
        )
        .bind(link.code_id)
        .bind(link.memory_id)
        .bind(&properties)
        .execute(&mut *tx)
        .await?;

        if created {
            sqlx::query(
                "UPDATE memory_node
                 SET metadata = metadata || jsonb_build_object(
                        'has_code_references', true,
                        'code_linked_at', now()),
                     updated_at = now()
                 WHERE id = $1",
            )
            .bind(link.memory_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(created)
    }
}

fn created_at(entity: &SourceEntity) -> DateTime<Utc> {
    match entity {
        SourceEntity::Memory(m) => m.created_at,
        SourceEntity::Code(c) => c.created_at,
    }
}

#[async_trait]
impl GraphStore for PgGraphStore {
    async fn upsert_memory(&self, node: &MemoryNode) -> Result<UpsertOutcome> {
        self.retry
            .run("upsert_memory", || self.upsert_memory_once(node))
            .await
    }

    async fn upsert_code_entity(&self, node: &CodeEntityNode) -> Result<UpsertOutcome> {
        self.retry
            .run("upsert_code_entity", || self.upsert_code_entity_once(node))
            .await
    }

    async fn get_memory(&self, id: Uuid) -> Result<Option<MemoryNode>> {
        let row = self
            .retry
            .run("get_memory", || async move {
                sqlx::query(&format!(
                    "SELECT {MEMORY_COLUMNS} FROM memory_node WHERE id = $1"
                ))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(Error::from)
            })
            .await?;
        row.as_ref().map(Self::parse_memory_row).transpose()
    }

    async fn memories_after(
        &self,
        workspace: &WorkspaceId,
        after: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Vec<MemoryNode>> {
        let ws = workspace.to_string();
        let ws = ws.as_str();
        let rows = self
            .retry
            .run("memories_after", || async move {
                sqlx::query(&format!(
                    "SELECT {MEMORY_COLUMNS} FROM memory_node
                     WHERE workspace_id = $1
                       AND ($2::timestamptz IS NULL OR (created_at, id) > ($2, $3::uuid))
                     ORDER BY created_at, id
                     LIMIT $4"
                ))
                .bind(ws)
                .bind(after.map(|c| c.created_at))
                .bind(after.map(|c| c.id))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::from)
            })
            .await?;
        rows.iter().map(Self::parse_memory_row).collect()
    }

    async fn code_entities_after(
        &self,
        workspace: &WorkspaceId,
        after: Option<&PageCursor>,
        limit: usize,
    ) -> Result<Vec<CodeEntityNode>> {
        let ws = workspace.to_string();
        let ws = ws.as_str();
        let rows = self
            .retry
            .run("code_entities_after", || async move {
                sqlx::query(&format!(
                    "SELECT {CODE_COLUMNS} FROM code_entity_node
                     WHERE workspace_id = $1
                       AND ($2::timestamptz IS NULL OR (created_at, id) > ($2, $3::uuid))
                     ORDER BY created_at, id
                     LIMIT $4"
                ))
                .bind(ws)
                .bind(after.map(|c| c.created_at))
                .bind(after.map(|c| c.id))
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::from)
            })
            .await?;
        rows.iter().map(Self::parse_code_row).collect()
    }

    async fn unsummarized_entities(
        &self,
        workspace: &WorkspaceId,
        limit: usize,
    ) -> Result<Vec<SourceEntity>> {
        self.retry
            .run("unsummarized_entities", || {
                self.unsummarized_once(workspace, limit)
            })
            .await
    }

    async fn write_summary(&self, summary: &EntitySummary) -> Result<UpsertOutcome> {
        self.retry
            .run("write_summary", || self.write_summary_once(summary))
            .await
    }

    async fn list_summaries(
        &self,
        workspace: &WorkspaceId,
        filter: &SummaryFilter,
    ) -> Result<Vec<EntitySummary>> {
        self.retry
            .run("list_summaries", || self.list_summaries_once(workspace, filter))
            .await
    }

    async fn latest_summary_at(&self, workspace: &WorkspaceId) -> Result<Option<DateTime<Utc>>> {
        let ws = workspace.to_string();
        let ws = ws.as_str();
        self.retry
            .run("latest_summary_at", || async move {
                sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
                    "SELECT max(occurred_at) FROM entity_summary WHERE workspace_id = $1",
                )
                .bind(ws)
                .fetch_one(&self.pool)
                .await
                .map_err(Error::from)
            })
            .await
    }

    async fn upsert_pattern(
        &self,
        pattern: &Pattern,
        found_in: &[Uuid],
        derived_from: &[Uuid],
    ) -> Result<UpsertOutcome> {
        self.retry
            .run("upsert_pattern", || {
                self.upsert_pattern_once(pattern, found_in, derived_from)
            })
            .await
    }

    async fn list_patterns(&self, scope_id: &str) -> Result<Vec<Pattern>> {
        let rows = self
            .retry
            .run("list_patterns", || async move {
                sqlx::query(&format!(
                    "SELECT {PATTERN_COLUMNS} FROM pattern
                     WHERE scope_id = $1
                     ORDER BY period, pattern_name"
                ))
                .bind(scope_id)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::from)
            })
            .await?;
        rows.iter().map(Self::parse_pattern_row).collect()
    }

    async fn link_memory_code(&self, link: &CodeReference) -> Result<bool> {
        self.retry
            .run("link_memory_code", || self.link_memory_code_once(link))
            .await
    }

    async fn edges_from(&self, from_id: Uuid, kind: Option<EdgeKind>) -> Result<Vec<Edge>> {
        let kind = kind.map(|k| k.as_str());
        let rows = self
            .retry
            .run("edges_from", || async move {
                sqlx::query(
                    "SELECT from_id, to_id, kind, properties, created_at FROM graph_edge
                     WHERE from_id = $1 AND ($2::text IS NULL OR kind = $2)
                     ORDER BY kind, to_id",
                )
                .bind(from_id)
                .bind(kind)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::from)
            })
            .await?;
        rows.iter().map(Self::parse_edge_row).collect()
    }

    async fn workspaces_due(
        &self,
        min_interval: Duration,
        limit: usize,
    ) -> Result<Vec<WorkspaceId>> {
        let rows: Vec<String> = self
            .retry
            .run("workspaces_due", || async move {
                sqlx::query_scalar(
                    "SELECT s.workspace_id
                     FROM (SELECT DISTINCT workspace_id FROM entity_summary) s
                     LEFT JOIN detection_run d ON d.workspace_id = s.workspace_id
                     WHERE d.last_run_at IS NULL
                        OR d.last_run_at < now() - make_interval(secs => $1)
                     ORDER BY d.last_run_at NULLS FIRST, s.workspace_id
                     LIMIT $2",
                )
                .bind(min_interval.as_secs_f64())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(Error::from)
            })
            .await?;
        rows.iter().map(|ws| ws.parse()).collect()
    }

    async fn record_detection_run(&self, workspace: &WorkspaceId, batch_id: Uuid) -> Result<()> {
        let ws = workspace.to_string();
        let ws = ws.as_str();
        self.retry
            .run("record_detection_run", || async move {
                sqlx::query(
                    "INSERT INTO detection_run (workspace_id, last_batch_id, last_run_at)
                     VALUES ($1, $2, now())
                     ON CONFLICT (workspace_id) DO UPDATE SET
                        last_batch_id = EXCLUDED.last_batch_id,
                        last_run_at = EXCLUDED.last_run_at",
                )
                .bind(ws)
                .bind(batch_id)
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(Error::from)
            })
            .await
    }
}
