//! Deterministic entity ids derived from natural keys.
//!
//! Every node id is a UUIDv5 over its natural key, so reprocessing the same
//! input always lands on the same node and distinct keys never share an id.

use uuid::Uuid;

use crate::models::EntityType;
use crate::WorkspaceId;

/// Namespace for all devgraph node ids.
pub const NAMESPACE: Uuid = Uuid::from_u128(0x6d2c_41b8_5a0e_4f3c_9a71_d08e_2b5f_c3a9);

/// Key components are joined with the ASCII unit separator so that
/// `("a:b", "c")` and `("a", "b:c")` never collide.
const KEY_SEPARATOR: char = '\u{1f}';

fn derive(kind: &str, parts: &[&str]) -> Uuid {
    let mut key = String::with_capacity(kind.len() + parts.iter().map(|p| p.len() + 1).sum::<usize>());
    key.push_str(kind);
    for part in parts {
        key.push(KEY_SEPARATOR);
        key.push_str(part);
    }
    Uuid::new_v5(&NAMESPACE, key.as_bytes())
}

/// Id of a Memory node: `(workspace_id, chunk_id)`.
pub fn memory_id(workspace: &WorkspaceId, chunk_id: &str) -> Uuid {
    derive("memory", &[&workspace.to_string(), chunk_id])
}

/// Id of a CodeEntity node: `(workspace_id, project_name, file_path)`.
pub fn code_entity_id(workspace: &WorkspaceId, project_name: &str, file_path: &str) -> Uuid {
    derive("code", &[&workspace.to_string(), project_name, file_path])
}

/// Id of the EntitySummary of a source entity.
pub fn summary_id(entity_type: EntityType, entity_id: Uuid) -> Uuid {
    derive("summary", &[entity_type.as_str(), &entity_id.to_string()])
}

/// Id of a Pattern: `(pattern_name, scope_id, period)`.
pub fn pattern_id(pattern_name: &str, scope_id: &str, period: &str) -> Uuid {
    derive("pattern", &[pattern_name, scope_id, period])
}
