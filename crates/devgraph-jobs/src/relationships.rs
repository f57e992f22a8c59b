//! Memory ↔ CodeEntity links from explicit references and summary similarity.
//!
//! Detection walks memories and code entities in keyset pages, so every node
//! is compared however large the workspace grows. Only the summaries of the
//! nodes in hand are loaded. Semantic candidates come from LSH buckets once a
//! page outgrows exhaustive comparison.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use devgraph_core::similarity::{cosine_similarity, LshIndex};
use devgraph_core::{
    defaults, CodeEntityNode, CodeReference, EntitySummary, EntityType, GraphStore, LinkType,
    MemoryNode, PageCursor, Result, SummaryFilter, WorkspaceId,
};

use crate::code_metadata::{basename, CodeMetadata};

/// Settings for [`RelationshipDetector`].
#[derive(Debug, Clone)]
pub struct RelationshipConfig {
    /// τ': minimum memory/code summary similarity for a semantic link.
    pub similarity_threshold: f64,
    /// Shorter symbol names and file stems are too common to count as references.
    pub min_symbol_len: usize,
    /// Page size for memories and code entities.
    pub max_entities: usize,
    /// Pages with at most this many embedded nodes are compared exhaustively.
    pub exact_pairwise_limit: usize,
}

impl Default for RelationshipConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: defaults::LINK_SIMILARITY_THRESHOLD,
            min_symbol_len: defaults::LINK_MIN_SYMBOL_LEN,
            max_entities: defaults::PATTERN_MAX_SUMMARIES,
            exact_pairwise_limit: defaults::EXACT_PAIRWISE_LIMIT,
        }
    }
}

impl RelationshipConfig {
    /// Read `LINK_SIMILARITY_THRESHOLD` and `LINK_PAGE_SIZE`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(t) = std::env::var("LINK_SIMILARITY_THRESHOLD")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.similarity_threshold = t;
        }
        if let Some(n) = std::env::var("LINK_PAGE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.max_entities = n;
        }
        config
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_min_symbol_len(mut self, len: usize) -> Self {
        self.min_symbol_len = len;
        self
    }

    pub fn with_max_entities(mut self, max: usize) -> Self {
        self.max_entities = max;
        self
    }

    pub fn with_exact_pairwise_limit(mut self, limit: usize) -> Self {
        self.exact_pairwise_limit = limit;
        self
    }
}

/// Totals of one relationship run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationshipReport {
    /// Memory/code pairs evaluated.
    pub candidates: usize,
    /// Pairs found, by link type.
    pub path_matches: usize,
    pub name_matches: usize,
    pub semantic_matches: usize,
    /// Pairs whose edges did not exist before this run.
    pub links_created: usize,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Whether `needle` occurs in `haystack` not embedded in a longer word.
pub fn contains_token(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        before.map_or(true, |c| !is_word_char(c)) && after.map_or(true, |c| !is_word_char(c))
    })
}

/// The strings of one code entity that count as a mention of it.
struct CodeTokens<'a> {
    path: &'a str,
    stripped: &'a str,
    /// File name, when its stem is long enough to be distinctive.
    name: Option<&'a str>,
    symbols: Vec<String>,
}

impl<'a> CodeTokens<'a> {
    fn new(code: &'a CodeEntityNode, min_symbol_len: usize) -> Self {
        let path = code.file_path.as_str();
        let stripped = path.strip_prefix("./").unwrap_or(path);
        let file_name = basename(stripped);
        let stem = file_name.split('.').next().unwrap_or_default();
        let symbols = CodeMetadata::from_json(&code.metadata)
            .symbol_names()
            .filter(|s| s.chars().count() >= min_symbol_len)
            .map(str::to_string)
            .collect();
        Self {
            path,
            stripped,
            name: (stem.chars().count() >= min_symbol_len).then_some(file_name),
            symbols,
        }
    }

    fn reference_in(&self, content: &str) -> Option<LinkType> {
        if contains_token(content, self.path) || contains_token(content, self.stripped) {
            return Some(LinkType::PathMatch);
        }
        if self.name.is_some_and(|name| contains_token(content, name)) {
            return Some(LinkType::NameMatch);
        }
        self.symbols
            .iter()
            .any(|s| contains_token(content, s))
            .then_some(LinkType::NameMatch)
    }
}

/// Explicit reference to `code` in memory `content`, strongest kind first.
pub fn explicit_reference(content: &str, code: &CodeEntityNode, min_symbol_len: usize) -> Option<LinkType> {
    CodeTokens::new(code, min_symbol_len).reference_in(content)
}

type Embeddings<'a> = HashMap<(Uuid, EntityType), &'a [f32]>;

/// Detects and writes REFERENCES_CODE / DISCUSSED_IN pairs for a workspace.
pub struct RelationshipDetector {
    graph: Arc<dyn GraphStore>,
    config: RelationshipConfig,
}

impl RelationshipDetector {
    pub fn new(graph: Arc<dyn GraphStore>, config: RelationshipConfig) -> Self {
        Self { graph, config }
    }

    /// Links between the given nodes. Each pair yields at most one link,
    /// explicit references taking precedence over similarity.
    pub fn find_links(
        &self,
        memories: &[MemoryNode],
        code: &[CodeEntityNode],
        summaries: &[EntitySummary],
    ) -> Vec<CodeReference> {
        let embeddings: Embeddings<'_> = summaries
            .iter()
            .map(|s| ((s.entity_id, s.entity_type), s.embedding.as_slice()))
            .collect();
        self.links_between(memories, code, &embeddings)
    }

    fn links_between(
        &self,
        memories: &[MemoryNode],
        code: &[CodeEntityNode],
        embeddings: &Embeddings<'_>,
    ) -> Vec<CodeReference> {
        let semantic = self.semantic_pairs(memories, code, embeddings);
        let tokens: Vec<CodeTokens<'_>> = code
            .iter()
            .map(|c| CodeTokens::new(c, self.config.min_symbol_len))
            .collect();

        let mut links: BTreeMap<(Uuid, Uuid), CodeReference> = BTreeMap::new();
        for (mi, memory) in memories.iter().enumerate() {
            for (ci, entity) in code.iter().enumerate() {
                if entity.workspace_id != memory.workspace_id {
                    continue;
                }
                let link = match tokens[ci].reference_in(&memory.content) {
                    Some(link_type) => Some((link_type, None)),
                    None => semantic
                        .get(&(mi, ci))
                        .map(|sim| (LinkType::Semantic, Some(*sim))),
                };
                if let Some((link_type, similarity)) = link {
                    links.insert(
                        (memory.id, entity.id),
                        CodeReference {
                            memory_id: memory.id,
                            code_id: entity.id,
                            link_type,
                            similarity,
                        },
                    );
                }
            }
        }
        links.into_values().collect()
    }

    /// `(memory index, code index)` pairs whose summaries reach the
    /// similarity threshold, with their similarity.
    fn semantic_pairs(
        &self,
        memories: &[MemoryNode],
        code: &[CodeEntityNode],
        embeddings: &Embeddings<'_>,
    ) -> HashMap<(usize, usize), f64> {
        let memory_vecs: Vec<(usize, &[f32])> = memories
            .iter()
            .enumerate()
            .filter_map(|(i, m)| embeddings.get(&(m.id, EntityType::Memory)).map(|v| (i, *v)))
            .collect();
        let code_vecs: Vec<(usize, &[f32])> = code
            .iter()
            .enumerate()
            .filter_map(|(i, c)| embeddings.get(&(c.id, EntityType::Code)).map(|v| (i, *v)))
            .collect();
        if memory_vecs.is_empty() || code_vecs.is_empty() {
            return HashMap::new();
        }

        // Indices into memory_vecs and code_vecs.
        let candidates: Vec<(usize, usize)> =
            if memory_vecs.len() + code_vecs.len() <= self.config.exact_pairwise_limit {
                (0..memory_vecs.len())
                    .flat_map(|a| (0..code_vecs.len()).map(move |b| (a, b)))
                    .collect()
            } else {
                let all: Vec<&[f32]> = memory_vecs
                    .iter()
                    .chain(&code_vecs)
                    .map(|(_, v)| *v)
                    .collect();
                let index = LshIndex::new(
                    all[0].len(),
                    defaults::LSH_BANDS,
                    defaults::LSH_BITS_PER_BAND,
                    defaults::LSH_SEED,
                );
                let split = memory_vecs.len();
                index
                    .candidate_pairs(&all)
                    .into_iter()
                    .filter(|&(i, j)| i < split && j >= split)
                    .map(|(i, j)| (i, j - split))
                    .collect()
            };

        candidates
            .into_iter()
            .filter_map(|(a, b)| {
                let (mi, m) = memory_vecs[a];
                let (ci, c) = code_vecs[b];
                let sim = cosine_similarity(m, c);
                (sim >= self.config.similarity_threshold).then_some(((mi, ci), sim))
            })
            .collect()
    }

    async fn summaries_of(
        &self,
        workspace: &WorkspaceId,
        entity_ids: Vec<Uuid>,
    ) -> Result<Vec<EntitySummary>> {
        self.graph
            .list_summaries(workspace, &SummaryFilter::for_entities(entity_ids))
            .await
    }

    /// Find and merge links for one workspace.
    #[instrument(skip(self), fields(subsystem = "jobs", component = "relationships", workspace_id = %workspace))]
    pub async fn detect(&self, workspace: &WorkspaceId) -> Result<RelationshipReport> {
        let page = self.config.max_entities.max(1);
        let mut report = RelationshipReport::default();
        if self
            .graph
            .code_entities_after(workspace, None, 1)
            .await?
            .is_empty()
        {
            debug!("No code entities to link");
            return Ok(report);
        }

        let mut memory_cursor: Option<PageCursor> = None;
        loop {
            let memories = self
                .graph
                .memories_after(workspace, memory_cursor.as_ref(), page)
                .await?;
            let Some(last) = memories.last() else { break };
            memory_cursor = Some(PageCursor::of_memory(last));
            let memory_summaries = self
                .summaries_of(workspace, memories.iter().map(|m| m.id).collect())
                .await?;

            let mut code_cursor: Option<PageCursor> = None;
            loop {
                let code = self
                    .graph
                    .code_entities_after(workspace, code_cursor.as_ref(), page)
                    .await?;
                let Some(last) = code.last() else { break };
                code_cursor = Some(PageCursor::of_code(last));
                let code_summaries = self
                    .summaries_of(workspace, code.iter().map(|c| c.id).collect())
                    .await?;

                let embeddings: Embeddings<'_> = memory_summaries
                    .iter()
                    .chain(&code_summaries)
                    .map(|s| ((s.entity_id, s.entity_type), s.embedding.as_slice()))
                    .collect();
                report.candidates += memories.len() * code.len();
                for link in self.links_between(&memories, &code, &embeddings) {
                    match link.link_type {
                        LinkType::PathMatch => report.path_matches += 1,
                        LinkType::NameMatch => report.name_matches += 1,
                        LinkType::Semantic => report.semantic_matches += 1,
                    }
                    if self.graph.link_memory_code(&link).await? {
                        report.links_created += 1;
                    }
                }
                if code.len() < page {
                    break;
                }
            }
            if memories.len() < page {
                break;
            }
        }

        info!(
            candidates = report.candidates,
            edge_count = report.path_matches + report.name_matches + report.semantic_matches,
            links_created = report.links_created,
            "Memory-code relationships merged"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use devgraph_core::{identity, EdgeKind, PatternSignals};
    use devgraph_db::InMemoryGraphStore;

    fn ws() -> WorkspaceId {
        WorkspaceId::for_user(Uuid::from_u128(3))
    }

    fn memory(chunk: &str, content: &str) -> MemoryNode {
        MemoryNode {
            id: identity::memory_id(&ws(), chunk),
            workspace_id: ws(),
            user_id: ws().owner().to_string(),
            chunk_id: chunk.into(),
            content: content.into(),
            project_name: None,
            occurred_at: Utc::now(),
            created_at: Utc::now(),
            embedding: None,
            metadata: json!({}),
        }
    }

    fn code(path: &str, functions: &[&str]) -> CodeEntityNode {
        CodeEntityNode {
            id: identity::code_entity_id(&ws(), "web", path),
            workspace_id: ws(),
            user_id: ws().owner().to_string(),
            project_name: "web".into(),
            file_path: path.into(),
            name: basename(path).into(),
            entity_type: "file".into(),
            language: None,
            content: String::new(),
            last_modified: None,
            created_at: Utc::now(),
            metadata: json!({ "functions": functions }),
        }
    }

    fn summary_of(entity_id: Uuid, entity_type: EntityType, embedding: Vec<f32>) -> EntitySummary {
        EntitySummary {
            id: identity::summary_id(entity_type, entity_id),
            entity_id,
            entity_type,
            workspace_id: ws(),
            user_id: ws().owner().to_string(),
            project_name: None,
            content_summary: String::new(),
            keyword_frequencies: Default::default(),
            signals: PatternSignals::default(),
            embedding,
            occurred_at: Utc::now(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_contains_token_boundaries() {
        assert!(contains_token("see src/foo.ts, line 3", "src/foo.ts"));
        assert!(contains_token("web/src/foo.ts", "src/foo.ts"));
        assert!(!contains_token("src/foo.tsx", "src/foo.ts"));
        assert!(!contains_token("parseConfigFile", "parseConfig"));
        assert!(contains_token("call parseConfig()", "parseConfig"));
        assert!(!contains_token("anything", ""));
    }

    #[test]
    fn test_explicit_reference_kinds() {
        let entity = code("./src/render.ts", &["renderFoo", "go"]);
        assert_eq!(
            explicit_reference("broke src/render.ts again", &entity, 4),
            Some(LinkType::PathMatch)
        );
        assert_eq!(
            explicit_reference("render.ts has a typo", &entity, 4),
            Some(LinkType::NameMatch)
        );
        assert_eq!(
            explicit_reference("renderFoo returns null", &entity, 4),
            Some(LinkType::NameMatch)
        );
        assert_eq!(explicit_reference("let's go", &entity, 4), None);
    }

    #[test]
    fn test_short_file_stems_need_a_path() {
        let entity = code("pkg/io.go", &[]);
        assert_eq!(explicit_reference("rewrote io.go over lunch", &entity, 4), None);
        assert_eq!(
            explicit_reference("rewrote pkg/io.go over lunch", &entity, 4),
            Some(LinkType::PathMatch)
        );
        assert_eq!(
            explicit_reference("rewrote io.go over lunch", &entity, 2),
            Some(LinkType::NameMatch)
        );
    }

    #[test]
    fn test_semantic_links_need_threshold() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let detector = RelationshipDetector::new(graph, RelationshipConfig::default());
        let m = memory("m", "nothing explicit here");
        let close = code("src/a.rs", &[]);
        let far = code("src/b.rs", &[]);
        let summaries = vec![
            summary_of(m.id, EntityType::Memory, vec![1.0, 0.0]),
            summary_of(close.id, EntityType::Code, vec![0.9, 0.1]),
            summary_of(far.id, EntityType::Code, vec![0.0, 1.0]),
        ];

        let links = detector.find_links(&[m], &[close.clone(), far], &summaries);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].code_id, close.id);
        assert_eq!(links[0].link_type, LinkType::Semantic);
        assert!(links[0].similarity.unwrap() >= 0.70);
    }

    #[tokio::test]
    async fn test_detect_writes_edge_pair_once() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let m = memory("m", "the bug is in src/foo.ts");
        let c = code("src/foo.ts", &[]);
        graph.upsert_memory(&m).await.unwrap();
        graph.upsert_code_entity(&c).await.unwrap();
        let detector = RelationshipDetector::new(graph.clone(), RelationshipConfig::default());

        let first = detector.detect(&ws()).await.unwrap();
        assert_eq!((first.path_matches, first.links_created), (1, 1));
        let second = detector.detect(&ws()).await.unwrap();
        assert_eq!((second.path_matches, second.links_created), (1, 0));

        assert_eq!(graph.edges_of_kind(EdgeKind::ReferencesCode).await.len(), 1);
        assert_eq!(graph.edges_of_kind(EdgeKind::DiscussedIn).await.len(), 1);
        let stored = graph.get_memory(m.id).await.unwrap().unwrap();
        assert_eq!(stored.metadata["has_code_references"], true);
    }

    #[test]
    fn test_semantic_links_from_lsh_buckets() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let config = RelationshipConfig::default().with_exact_pairwise_limit(0);
        let detector = RelationshipDetector::new(graph, config);
        let m = memory("m", "nothing explicit here");
        let twin = code("src/a.rs", &[]);
        let other = code("src/b.rs", &[]);
        let summaries = vec![
            summary_of(m.id, EntityType::Memory, vec![0.6, 0.8, 0.0]),
            summary_of(twin.id, EntityType::Code, vec![0.6, 0.8, 0.0]),
            summary_of(other.id, EntityType::Code, vec![0.0, 0.0, 1.0]),
        ];

        let links = detector.find_links(&[m], &[twin.clone(), other], &summaries);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].code_id, twin.id);
        assert_eq!(links[0].link_type, LinkType::Semantic);
    }

    #[tokio::test]
    async fn test_detect_pages_past_max_entities() {
        let graph = Arc::new(InMemoryGraphStore::new());
        let c = code("src/session.ts", &[]);
        graph.upsert_code_entity(&c).await.unwrap();
        graph.upsert_code_entity(&code("src/other.ts", &[])).await.unwrap();
        let base = Utc::now();
        for i in 0..4 {
            let mut m = memory(&format!("old-{i}"), "standup notes");
            m.created_at = base + chrono::Duration::seconds(i);
            graph.upsert_memory(&m).await.unwrap();
        }
        let mut newest = memory("newest", "session.ts drops the cookie");
        newest.created_at = base + chrono::Duration::seconds(10);
        graph.upsert_memory(&newest).await.unwrap();
        graph
            .write_summary(&summary_of(newest.id, EntityType::Memory, vec![1.0, 0.0]))
            .await
            .unwrap();

        let config = RelationshipConfig::default().with_max_entities(2);
        let detector = RelationshipDetector::new(graph.clone(), config);
        let report = detector.detect(&ws()).await.unwrap();

        assert_eq!(report.candidates, 5 * 2);
        assert_eq!((report.name_matches, report.links_created), (1, 1));
        let edges = graph.edges_of_kind(EdgeKind::ReferencesCode).await;
        assert_eq!(edges.len(), 1);
        assert_eq!((edges[0].from_id, edges[0].to_id), (newest.id, c.id));
    }

    #[tokio::test]
    async fn test_detect_without_code_is_noop() {
        let graph = Arc::new(InMemoryGraphStore::new());
        graph.upsert_memory(&memory("m", "src/foo.ts")).await.unwrap();
        let detector = RelationshipDetector::new(graph, RelationshipConfig::default());
        assert_eq!(detector.detect(&ws()).await.unwrap(), RelationshipReport::default());
    }
}
