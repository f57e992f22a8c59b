//! Queue message payloads exchanged between pipeline stages.
//!
//! Ingestion payloads accept either the single-entity form or a batch form
//! carrying many entities under one workspace/user envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::{defaults, Error, Result, WorkspaceId};

// =============================================================================
// MEMORY INGESTION
// =============================================================================

/// One conversation chunk as sent by a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryChunk {
    pub chunk_id: String,
    pub content: String,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
    /// Precomputed embedding, reused at summarization when its length matches.
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    /// Producer-side id. Kept as provenance only, never used as the node id.
    #[serde(default)]
    pub id: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryBatch {
    #[serde(default)]
    pub workspace_id: Option<String>,
    pub user_id: String,
    pub chunks: Vec<MemoryChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMessage {
    #[serde(default)]
    pub workspace_id: Option<String>,
    pub user_id: String,
    #[serde(flatten)]
    pub chunk: MemoryChunk,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MemoryIngestPayload {
    Batch(MemoryBatch),
    Single(MemoryMessage),
}

impl MemoryIngestPayload {
    pub fn parse(payload: &JsonValue) -> Result<Self> {
        serde_json::from_value(payload.clone())
            .map_err(|e| Error::Validation(format!("malformed memory message: {}", e)))
    }

    /// Normalize into `(workspace_id, user_id, chunks)`.
    pub fn into_parts(self) -> (Option<String>, String, Vec<MemoryChunk>) {
        match self {
            MemoryIngestPayload::Batch(b) => (b.workspace_id, b.user_id, b.chunks),
            MemoryIngestPayload::Single(m) => (m.workspace_id, m.user_id, vec![m.chunk]),
        }
    }
}

// =============================================================================
// CODE INGESTION
// =============================================================================

/// One source file as sent by a producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeFile {
    pub file_path: String,
    #[serde(default)]
    pub project_name: Option<String>,
    pub content: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Option<JsonValue>,
    #[serde(default)]
    pub id: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeBatch {
    #[serde(default)]
    pub workspace_id: Option<String>,
    pub user_id: String,
    /// Applies to files that carry no project of their own.
    #[serde(default)]
    pub project_name: Option<String>,
    pub files: Vec<CodeFile>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeMessage {
    #[serde(default)]
    pub workspace_id: Option<String>,
    pub user_id: String,
    #[serde(flatten)]
    pub file: CodeFile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CodeIngestPayload {
    Batch(CodeBatch),
    Single(CodeMessage),
}

impl CodeIngestPayload {
    pub fn parse(payload: &JsonValue) -> Result<Self> {
        serde_json::from_value(payload.clone())
            .map_err(|e| Error::Validation(format!("malformed code message: {}", e)))
    }

    /// Normalize into `(workspace_id, user_id, files)`, applying the batch project.
    pub fn into_parts(self) -> (Option<String>, String, Vec<CodeFile>) {
        match self {
            CodeIngestPayload::Batch(b) => {
                let project = b.project_name;
                let files = b
                    .files
                    .into_iter()
                    .map(|mut f| {
                        if f.project_name.is_none() {
                            f.project_name = project.clone();
                        }
                        f
                    })
                    .collect();
                (b.workspace_id, b.user_id, files)
            }
            CodeIngestPayload::Single(m) => (m.workspace_id, m.user_id, vec![m.file]),
        }
    }
}

// =============================================================================
// SUMMARIZATION & DETECTION
// =============================================================================

/// Request to summarize pending entities of a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizationRequest {
    pub workspace_id: WorkspaceId,
    #[serde(default)]
    pub batch_id: Option<Uuid>,
}

/// Detector selectable in a trigger's `pattern_types`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorKind {
    Debugging,
    Learning,
    Refactoring,
    Temporal,
    Semantic,
    MemoryCode,
}

impl DetectorKind {
    pub const ALL: [DetectorKind; 6] = [
        DetectorKind::Debugging,
        DetectorKind::Learning,
        DetectorKind::Refactoring,
        DetectorKind::Temporal,
        DetectorKind::Semantic,
        DetectorKind::MemoryCode,
    ];
}

fn default_trigger_limit() -> usize {
    defaults::PATTERN_TRIGGER_LIMIT
}

/// Pattern detection trigger. No `workspace_id` means every workspace due for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternDetectionTrigger {
    #[serde(default = "Uuid::now_v7")]
    pub batch_id: Uuid,
    #[serde(default)]
    pub pattern_types: Vec<DetectorKind>,
    #[serde(default = "default_trigger_limit")]
    pub limit: usize,
    #[serde(default)]
    pub workspace_id: Option<WorkspaceId>,
}

impl PatternDetectionTrigger {
    /// Trigger for one workspace with every detector enabled.
    pub fn for_workspace(workspace_id: WorkspaceId, batch_id: Uuid) -> Self {
        Self {
            batch_id,
            pattern_types: DetectorKind::ALL.to_vec(),
            limit: defaults::PATTERN_TRIGGER_LIMIT,
            workspace_id: Some(workspace_id),
        }
    }

    pub fn parse(payload: &JsonValue) -> Result<Self> {
        serde_json::from_value(payload.clone())
            .map_err(|e| Error::Validation(format!("malformed detection trigger: {}", e)))
    }

    /// Whether a detector runs. An empty list enables all of them.
    pub fn wants(&self, kind: DetectorKind) -> bool {
        self.pattern_types.is_empty() || self.pattern_types.contains(&kind)
    }
}
