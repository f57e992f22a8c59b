//! Graph node, edge, and queue record types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub use pgvector::Vector;

use crate::signals::PatternSignals;
use crate::{Error, Result, WorkspaceId};

// =============================================================================
// SOURCE ENTITIES
// =============================================================================

/// Kind of entity an [`EntitySummary`] digests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Memory,
    Code,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Memory => "memory",
            EntityType::Code => "code",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(EntityType::Memory),
            "code" => Ok(EntityType::Code),
            other => Err(Error::Validation(format!("unknown entity type '{}'", other))),
        }
    }
}

/// One conversation chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryNode {
    pub id: Uuid,
    pub workspace_id: WorkspaceId,
    pub user_id: String,
    /// Caller-supplied natural key, unique within the workspace.
    pub chunk_id: String,
    pub content: String,
    pub project_name: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: JsonValue,
}

/// One parsed code unit. Ingestion produces one per file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeEntityNode {
    pub id: Uuid,
    pub workspace_id: WorkspaceId,
    pub user_id: String,
    pub project_name: String,
    pub file_path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub language: Option<String>,
    pub content: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub metadata: JsonValue,
}

/// A Memory or CodeEntity awaiting summarization.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEntity {
    Memory(MemoryNode),
    Code(CodeEntityNode),
}

impl SourceEntity {
    pub fn entity_id(&self) -> Uuid {
        match self {
            SourceEntity::Memory(m) => m.id,
            SourceEntity::Code(c) => c.id,
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            SourceEntity::Memory(_) => EntityType::Memory,
            SourceEntity::Code(_) => EntityType::Code,
        }
    }

    pub fn workspace_id(&self) -> WorkspaceId {
        match self {
            SourceEntity::Memory(m) => m.workspace_id,
            SourceEntity::Code(c) => c.workspace_id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            SourceEntity::Memory(m) => &m.user_id,
            SourceEntity::Code(c) => &c.user_id,
        }
    }

    pub fn project_name(&self) -> Option<&str> {
        match self {
            SourceEntity::Memory(m) => m.project_name.as_deref(),
            SourceEntity::Code(c) => Some(&c.project_name),
        }
    }

    /// When the underlying activity happened, used for temporal bucketing.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SourceEntity::Memory(m) => m.occurred_at,
            SourceEntity::Code(c) => c.last_modified.unwrap_or(c.created_at),
        }
    }
}

/// Outcome of a merge-by-natural-key write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

// =============================================================================
// SUMMARIES
// =============================================================================

/// Embeddable digest of exactly one Memory or CodeEntity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub id: Uuid,
    pub entity_id: Uuid,
    pub entity_type: EntityType,
    pub workspace_id: WorkspaceId,
    pub user_id: String,
    pub project_name: Option<String>,
    pub content_summary: String,
    pub keyword_frequencies: BTreeMap<String, u32>,
    pub signals: PatternSignals,
    pub embedding: Vec<f32>,
    pub occurred_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// PATTERNS
// =============================================================================

/// Heuristic classification of a detected pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Debugging,
    Learning,
    Refactoring,
    Architecture,
    ProblemSolving,
    MemoryCode,
    Semantic,
    Temporal,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Debugging => "debugging",
            PatternType::Learning => "learning",
            PatternType::Refactoring => "refactoring",
            PatternType::Architecture => "architecture",
            PatternType::ProblemSolving => "problem_solving",
            PatternType::MemoryCode => "memory_code",
            PatternType::Semantic => "semantic",
            PatternType::Temporal => "temporal",
        }
    }
}

impl fmt::Display for PatternType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatternType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        serde_json::from_value(JsonValue::String(s.to_string()))
            .map_err(|_| Error::Validation(format!("unknown pattern type '{}'", s)))
    }
}

/// What produced a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    SemanticCluster,
    KeywordHeuristic,
    TemporalSession,
}

/// Scope qualifiers of a pattern. `period` is part of the pattern identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub period: String,
}

/// Detection statistics stored alongside a pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternMetadata {
    pub detection_method: DetectionMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_similarity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_similarity: Option<f64>,
    pub temporal_grouping: String,
    #[serde(default)]
    pub sample_entity_ids: Vec<Uuid>,
}

/// A detected recurring structure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: Uuid,
    pub pattern_type: PatternType,
    pub pattern_name: String,
    pub scope_id: String,
    pub scope_data: ScopeData,
    /// Always within `[0, 1]`.
    pub confidence: f64,
    pub frequency: i32,
    pub batch_id: Uuid,
    pub first_detected: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub metadata: PatternMetadata,
}

/// Clamp a raw score into the confidence range, mapping NaN to zero.
pub fn clamp_confidence(raw: f64) -> f64 {
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 1.0)
    }
}

// =============================================================================
// EDGES
// =============================================================================

/// Typed, directed relationship between two nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EdgeKind {
    /// EntitySummary -> Memory | CodeEntity
    Summarizes,
    /// Pattern -> Memory | CodeEntity
    DerivedFrom,
    /// Pattern -> EntitySummary
    FoundIn,
    /// Memory -> CodeEntity
    ReferencesCode,
    /// CodeEntity -> Memory
    DiscussedIn,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Summarizes => "SUMMARIZES",
            EdgeKind::DerivedFrom => "DERIVED_FROM",
            EdgeKind::FoundIn => "FOUND_IN",
            EdgeKind::ReferencesCode => "REFERENCES_CODE",
            EdgeKind::DiscussedIn => "DISCUSSED_IN",
        }
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SUMMARIZES" => Ok(EdgeKind::Summarizes),
            "DERIVED_FROM" => Ok(EdgeKind::DerivedFrom),
            "FOUND_IN" => Ok(EdgeKind::FoundIn),
            "REFERENCES_CODE" => Ok(EdgeKind::ReferencesCode),
            "DISCUSSED_IN" => Ok(EdgeKind::DiscussedIn),
            other => Err(Error::Validation(format!("unknown edge kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub from_id: Uuid,
    pub to_id: Uuid,
    pub kind: EdgeKind,
    pub properties: JsonValue,
    pub created_at: DateTime<Utc>,
}

/// How a memory-code link was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    PathMatch,
    NameMatch,
    Semantic,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::PathMatch => "path_match",
            LinkType::NameMatch => "name_match",
            LinkType::Semantic => "semantic",
        }
    }
}

/// A REFERENCES_CODE / DISCUSSED_IN pair to be written together.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeReference {
    pub memory_id: Uuid,
    pub code_id: Uuid,
    pub link_type: LinkType,
    pub similarity: Option<f64>,
}

impl CodeReference {
    pub fn properties(&self) -> JsonValue {
        serde_json::json!({
            "link_type": self.link_type.as_str(),
            "similarity": self.similarity,
        })
    }
}

// =============================================================================
// WINDOWS & QUEUES
// =============================================================================

/// Keyset position in `(created_at, id)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PageCursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl PageCursor {
    pub fn of_memory(node: &MemoryNode) -> Self {
        Self {
            created_at: node.created_at,
            id: node.id,
        }
    }

    pub fn of_code(node: &CodeEntityNode) -> Self {
        Self {
            created_at: node.created_at,
            id: node.id,
        }
    }
}

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `days`-long window that ends just after `anchor`.
    pub fn trailing(anchor: DateTime<Utc>, days: i64) -> Self {
        let end = anchor + Duration::milliseconds(1);
        Self {
            start: end - Duration::days(days),
            end,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }
}

/// A message leased from a queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueMessage {
    pub message_id: i64,
    pub payload: JsonValue,
    /// Number of times this message has been dequeued, including this one.
    pub read_count: i32,
    pub enqueued_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_round_trip() {
        for t in [EntityType::Memory, EntityType::Code] {
            assert_eq!(t.as_str().parse::<EntityType>().unwrap(), t);
        }
        assert!("note".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_entity_type_serde() {
        assert_eq!(
            serde_json::to_string(&EntityType::Code).unwrap(),
            "\"code\""
        );
    }

    #[test]
    fn test_pattern_type_from_str() {
        assert_eq!(
            "problem_solving".parse::<PatternType>().unwrap(),
            PatternType::ProblemSolving
        );
        assert_eq!(
            "memory_code".parse::<PatternType>().unwrap(),
            PatternType::MemoryCode
        );
        assert!("gardening".parse::<PatternType>().is_err());
    }

    #[test]
    fn test_edge_kind_strings() {
        assert_eq!(EdgeKind::ReferencesCode.as_str(), "REFERENCES_CODE");
        assert_eq!(
            "DISCUSSED_IN".parse::<EdgeKind>().unwrap(),
            EdgeKind::DiscussedIn
        );
        assert_eq!(
            serde_json::to_string(&EdgeKind::FoundIn).unwrap(),
            "\"FOUND_IN\""
        );
    }

    #[test]
    fn test_pattern_metadata_uses_camel_case() {
        let meta = PatternMetadata {
            detection_method: DetectionMethod::SemanticCluster,
            avg_similarity: Some(0.9),
            min_similarity: None,
            temporal_grouping: "iso_week".to_string(),
            sample_entity_ids: vec![],
        };
        let json = serde_json::to_value(&meta).unwrap();
        assert_eq!(json["detectionMethod"], "semantic_cluster");
        assert_eq!(json["avgSimilarity"], 0.9);
        assert!(json.get("minSimilarity").is_none());
    }

    #[test]
    fn test_clamp_confidence() {
        assert_eq!(clamp_confidence(1.3), 1.0);
        assert_eq!(clamp_confidence(-0.1), 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert_eq!(clamp_confidence(0.42), 0.42);
    }

    #[test]
    fn test_time_window_trailing_contains_anchor() {
        let anchor = Utc::now();
        let window = TimeWindow::trailing(anchor, 7);
        assert!(window.contains(anchor));
        assert!(window.contains(anchor - Duration::days(6)));
        assert!(!window.contains(anchor - Duration::days(8)));
    }

    #[test]
    fn test_source_entity_code_occurred_at_falls_back_to_created() {
        let created = Utc::now();
        let code = CodeEntityNode {
            id: Uuid::nil(),
            workspace_id: WorkspaceId::for_user(Uuid::nil()),
            user_id: Uuid::nil().to_string(),
            project_name: "api".into(),
            file_path: "src/lib.rs".into(),
            name: "lib.rs".into(),
            entity_type: "file".into(),
            language: Some("rust".into()),
            content: String::new(),
            last_modified: None,
            created_at: created,
            metadata: JsonValue::Null,
        };
        let entity = SourceEntity::Code(code);
        assert_eq!(entity.occurred_at(), created);
        assert_eq!(entity.entity_type(), EntityType::Code);
        assert_eq!(entity.project_name(), Some("api"));
    }
}
