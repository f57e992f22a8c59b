//! Entity summarization: one embedded EntitySummary per Memory/CodeEntity.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use devgraph_core::{
    defaults, identity, signals, AuditRecord, EmbeddingBackend, EntitySummary, Error, LogEvent,
    PatternDetectionTrigger, Result, SourceEntity, SummarizationRequest, WorkspaceId,
};
use devgraph_inference::{EmbedderConfig, ResilientEmbedder};

use crate::code_metadata::CodeMetadata;
use crate::handler::{HandlerOutcome, MessageContext, MessageHandler, Stores};

/// Settings for [`SummarizationHandler`].
#[derive(Debug, Clone)]
pub struct SummarizationConfig {
    /// Entities embedded per provider call.
    pub batch_size: usize,
    /// Batches per message; further pending entities go to a follow-up request.
    pub max_batches: usize,
    /// Characters of source content kept in `content_summary` and code embedding text.
    pub content_chars: usize,
    pub embedder: EmbedderConfig,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::SUMMARY_BATCH_SIZE,
            max_batches: defaults::SUMMARY_MAX_BATCHES,
            content_chars: defaults::SUMMARY_CONTENT_CHARS,
            embedder: EmbedderConfig::default(),
        }
    }
}

impl SummarizationConfig {
    /// Read `SUMMARY_BATCH_SIZE`, `SUMMARY_MAX_BATCHES` plus the embedder variables.
    pub fn from_env() -> Self {
        let mut config = Self {
            embedder: EmbedderConfig::from_env(),
            ..Self::default()
        };
        if let Some(k) = std::env::var("SUMMARY_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|k: &usize| *k > 0)
        {
            config.batch_size = k;
        }
        if let Some(n) = std::env::var("SUMMARY_MAX_BATCHES")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n: &usize| *n > 0)
        {
            config.max_batches = n;
        }
        config
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_batches(mut self, max_batches: usize) -> Self {
        self.max_batches = max_batches.max(1);
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.embedder = self.embedder.with_dimension(dimension);
        self
    }

    pub fn with_embedder(mut self, embedder: EmbedderConfig) -> Self {
        self.embedder = embedder;
        self
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension
    }
}

/// Totals of one summarization run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummarizationReport {
    pub summarized: usize,
    pub reused_embeddings: usize,
    pub provider_calls: usize,
    /// A follow-up request was enqueued for entities left pending.
    pub continued: bool,
}

/// First `max` characters of `text`.
fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Text embedded for an entity.
pub fn embedding_text(entity: &SourceEntity, content_chars: usize) -> String {
    match entity {
        SourceEntity::Memory(m) => m.content.clone(),
        SourceEntity::Code(c) => {
            let meta = CodeMetadata::from_json(&c.metadata);
            let symbols: Vec<&str> = meta.symbol_names().collect();
            let mut text = format!("{}\n{}", c.name, c.file_path);
            if !symbols.is_empty() {
                text.push_str("\nsymbols: ");
                text.push_str(&symbols.join(", "));
            }
            if !meta.imports.is_empty() {
                text.push_str("\nimports: ");
                text.push_str(&meta.imports.join(", "));
            }
            let body = truncate_chars(&c.content, content_chars);
            if !body.trim().is_empty() {
                text.push('\n');
                text.push_str(body);
            }
            text
        }
    }
}

/// Drains `entity_summarization`, embedding every un-summarized entity of
/// the requested workspace.
pub struct SummarizationHandler {
    stores: Stores,
    embedder: Arc<dyn EmbeddingBackend>,
    config: SummarizationConfig,
    queue: String,
    pattern_queue: String,
}

impl SummarizationHandler {
    /// Fails with a configuration error when the backend's dimension differs
    /// from the deployment's.
    pub fn new<B>(stores: Stores, backend: B, config: SummarizationConfig) -> Result<Self>
    where
        B: EmbeddingBackend + 'static,
    {
        let embedder = ResilientEmbedder::new(backend, config.embedder.clone())?;
        Ok(Self {
            stores,
            embedder: Arc::new(embedder),
            config,
            queue: defaults::SUMMARIZATION_QUEUE.to_string(),
            pattern_queue: defaults::PATTERN_DETECTION_QUEUE.to_string(),
        })
    }

    pub fn with_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn with_pattern_queue(mut self, queue: impl Into<String>) -> Self {
        self.pattern_queue = queue.into();
        self
    }

    /// Pending entities of `workspace` not yet handled in this pass.
    async fn pending(
        &self,
        workspace: &WorkspaceId,
        done: &HashSet<Uuid>,
    ) -> Result<Vec<SourceEntity>> {
        Ok(self
            .stores
            .graph
            .unsummarized_entities(workspace, self.config.batch_size)
            .await?
            .into_iter()
            .filter(|e| !done.contains(&e.entity_id()))
            .collect())
    }

    /// Summarize pending entities of `workspace`, K at a time, for at most
    /// `max_batches` batches. Anything left is handed to a follow-up
    /// request on the summarization queue.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "summarization", workspace_id = %workspace))]
    pub async fn summarize_workspace(
        &self,
        workspace: &WorkspaceId,
        batch_id: Uuid,
    ) -> Result<SummarizationReport> {
        let mut report = SummarizationReport::default();
        let mut done: HashSet<Uuid> = HashSet::new();
        let mut drained = false;

        for _ in 0..self.config.max_batches.max(1) {
            let pending = self.pending(workspace, &done).await?;
            if pending.is_empty() {
                drained = true;
                break;
            }
            self.summarize_batch(&pending, &mut report).await?;
            done.extend(pending.iter().map(SourceEntity::entity_id));
        }

        if !drained && !self.pending(workspace, &done).await?.is_empty() {
            let follow_up = SummarizationRequest {
                workspace_id: *workspace,
                batch_id: Some(batch_id),
            };
            self.stores
                .queues
                .enqueue(&self.queue, &serde_json::to_value(&follow_up)?)
                .await?;
            report.continued = true;
            debug!(batches = self.config.max_batches, "Batch cap reached, follow-up enqueued");
        }

        if report.summarized > 0 {
            let trigger = PatternDetectionTrigger::for_workspace(*workspace, batch_id);
            self.stores
                .queues
                .enqueue(&self.pattern_queue, &serde_json::to_value(&trigger)?)
                .await?;
        }

        self.stores
            .record_audit(
                AuditRecord::info(
                    format!("summarized {} entities", report.summarized),
                    LogEvent::SummarizationResult {
                        workspace_id: workspace.to_string(),
                        summarized: report.summarized,
                        reused_embeddings: report.reused_embeddings,
                    },
                )
                .with_batch(batch_id),
            )
            .await;

        info!(
            entity_count = report.summarized,
            reused = report.reused_embeddings,
            provider_calls = report.provider_calls,
            continued = report.continued,
            "Summarization complete"
        );
        Ok(report)
    }

    /// Embed and write one batch. Nothing is written unless every vector is valid.
    async fn summarize_batch(
        &self,
        entities: &[SourceEntity],
        report: &mut SummarizationReport,
    ) -> Result<()> {
        let dimension = self.config.dimension();
        let texts: Vec<String> = entities
            .iter()
            .map(|e| embedding_text(e, self.config.content_chars))
            .collect();

        let mut embeddings: Vec<Option<Vec<f32>>> = entities
            .iter()
            .map(|e| match e {
                SourceEntity::Memory(m) => m
                    .embedding
                    .clone()
                    .filter(|v| v.len() == dimension),
                SourceEntity::Code(_) => None,
            })
            .collect();
        let reused = embeddings.iter().filter(|e| e.is_some()).count();

        let missing: Vec<usize> = (0..entities.len())
            .filter(|&i| embeddings[i].is_none())
            .collect();
        if !missing.is_empty() {
            let inputs: Vec<String> = missing.iter().map(|&i| texts[i].clone()).collect();
            let vectors = self.embedder.embed_texts(&inputs).await?;
            report.provider_calls += 1;
            if vectors.len() != missing.len() {
                return Err(Error::Provider(format!(
                    "requested {} embeddings, received {}",
                    missing.len(),
                    vectors.len()
                )));
            }
            for (&i, vector) in missing.iter().zip(vectors) {
                embeddings[i] = Some(vector.as_slice().to_vec());
            }
        }

        let now = Utc::now();
        for ((entity, text), embedding) in entities.iter().zip(&texts).zip(embeddings) {
            let embedding = embedding.ok_or_else(|| {
                Error::Internal(format!("no embedding for entity {}", entity.entity_id()))
            })?;
            if embedding.len() != dimension {
                return Err(Error::Config(format!(
                    "embedding for entity {} has dimension {}, expected {}",
                    entity.entity_id(),
                    embedding.len(),
                    dimension
                )));
            }
            let keywords = signals::keyword_frequencies(text);
            let summary = EntitySummary {
                id: identity::summary_id(entity.entity_type(), entity.entity_id()),
                entity_id: entity.entity_id(),
                entity_type: entity.entity_type(),
                workspace_id: entity.workspace_id(),
                user_id: entity.user_id().to_string(),
                project_name: entity.project_name().map(str::to_string),
                content_summary: truncate_chars(text, self.config.content_chars).to_string(),
                signals: signals::pattern_signals(text, &keywords),
                keyword_frequencies: keywords,
                embedding,
                occurred_at: entity.occurred_at(),
                created_at: now,
            };
            self.stores.graph.write_summary(&summary).await?;
            debug!(
                entity_id = %summary.entity_id,
                entity_type = %summary.entity_type,
                "Summary written"
            );
        }

        report.summarized += entities.len();
        report.reused_embeddings += reused;
        Ok(())
    }
}

#[async_trait]
impl MessageHandler for SummarizationHandler {
    fn queue(&self) -> &str {
        &self.queue
    }

    #[instrument(skip(self, ctx), fields(subsystem = "jobs", queue = %ctx.queue, message_id = ctx.message_id()))]
    async fn handle(&self, ctx: MessageContext) -> HandlerOutcome {
        let request: SummarizationRequest = match serde_json::from_value(ctx.payload().clone()) {
            Ok(r) => r,
            Err(e) => {
                return HandlerOutcome::Reject(format!("malformed summarization request: {}", e))
            }
        };
        let batch_id = request.batch_id.unwrap_or_else(Uuid::now_v7);

        match self.summarize_workspace(&request.workspace_id, batch_id).await {
            Ok(report) => HandlerOutcome::Ack(Some(json!({
                "workspace_id": request.workspace_id.to_string(),
                "summarized": report.summarized,
                "reused_embeddings": report.reused_embeddings,
                "continued": report.continued,
            }))),
            Err(e) => {
                warn!(
                    workspace_id = %request.workspace_id,
                    error = %e,
                    error_class = ?e.class(),
                    "Summarization failed"
                );
                if matches!(e.class(), devgraph_core::ErrorClass::Fatal) {
                    self.stores
                        .record_audit(
                            AuditRecord::error("summarization aborted", &e).with_batch(batch_id),
                        )
                        .await;
                }
                HandlerOutcome::from_error(&e)
            }
        }
    }
}
