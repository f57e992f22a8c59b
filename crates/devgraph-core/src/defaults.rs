//! Centralized default constants for the devgraph pipeline.
//!
//! **This module is the single source of truth** for shared default values.
//! Config structs in every crate start from these and override them from the
//! environment.

// =============================================================================
// QUEUES
// =============================================================================

/// Queue of raw conversation chunks.
pub const MEMORY_INGESTION_QUEUE: &str = "memory_ingestion";

/// Queue of parsed source files.
pub const CODE_INGESTION_QUEUE: &str = "code_ingestion";

/// Queue of per-workspace summarization requests.
pub const SUMMARIZATION_QUEUE: &str = "entity_summarization";

/// Queue of pattern detection triggers.
pub const PATTERN_DETECTION_QUEUE: &str = "pattern_detection";

/// Suffix appended to a queue name to form its dead-letter queue.
pub const DLQ_SUFFIX: &str = "_dlq";

/// Visibility timeout applied on dequeue (seconds).
pub const QUEUE_VISIBILITY_TIMEOUT_SECS: u64 = 600;

/// Maximum messages leased per dequeue.
pub const QUEUE_BATCH_SIZE: usize = 10;

/// Read-count ceiling; a message read more often than this is dead-lettered.
pub const QUEUE_MAX_READS: i32 = 5;

/// Delay before a nacked message becomes visible again (seconds).
pub const QUEUE_NACK_DELAY_SECS: u64 = 30;

// =============================================================================
// WORKERS
// =============================================================================

/// Sleep between polls when a queue is empty (milliseconds).
pub const WORKER_POLL_INTERVAL_MS: u64 = 1000;

/// Per-message processing timeout (seconds). Must stay below the visibility timeout.
pub const WORKER_MESSAGE_TIMEOUT_SECS: u64 = 300;

/// Default event bus broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// GRAPH STORE
// =============================================================================

/// Default maximum number of pooled connections.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Statement timeout applied to every graph-store query (seconds).
pub const DB_STATEMENT_TIMEOUT_SECS: u64 = 30;

/// Attempts for a graph-store operation that fails transiently.
pub const DB_RETRY_ATTEMPTS: u32 = 3;

/// Base backoff between graph-store retries (milliseconds).
pub const DB_RETRY_BASE_DELAY_MS: u64 = 100;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding model name.
pub const EMBED_MODEL: &str = "text-embedding-3-large";

/// Fixed embedding dimension of a deployment.
pub const EMBED_DIMENSION: usize = 3072;

/// Timeout for embedding requests in seconds.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

/// Retries of a failed embedding call before giving up.
pub const EMBED_MAX_RETRIES: u32 = 3;

/// Base backoff between embedding retries (milliseconds).
pub const EMBED_RETRY_BASE_DELAY_MS: u64 = 500;

/// Embedding calls slower than this are logged as slow (milliseconds).
pub const EMBED_SLOW_THRESHOLD_MS: u64 = 5000;

// =============================================================================
// SUMMARIZATION
// =============================================================================

/// K: entities summarized per provider call.
pub const SUMMARY_BATCH_SIZE: usize = 50;

/// Batches handled per summarization message before the rest is re-enqueued.
pub const SUMMARY_MAX_BATCHES: usize = 20;

/// Characters of source content kept in the summary digest and embedding text.
pub const SUMMARY_CONTENT_CHARS: usize = 500;

// =============================================================================
// PATTERN DETECTION
// =============================================================================

/// τ: minimum cosine similarity joining two summaries into a cluster.
pub const PATTERN_SIMILARITY_THRESHOLD: f64 = 0.80;

/// Minimum component size that yields a pattern.
pub const PATTERN_MIN_FREQUENCY: usize = 3;

/// Detection window length in days.
pub const PATTERN_WINDOW_DAYS: i64 = 30;

/// Maximum summaries considered per detection run.
pub const PATTERN_MAX_SUMMARIES: usize = 5000;

/// Default limit carried by a detection trigger.
pub const PATTERN_TRIGGER_LIMIT: usize = 100;

/// Gap that ends a temporal session (minutes).
pub const SESSION_GAP_MINUTES: i64 = 30;

/// Keyword-heuristic confidence saturates at this count.
pub const KEYWORD_CONFIDENCE_SATURATION: f64 = 20.0;

/// Upper bound of heuristic confidence.
pub const HEURISTIC_CONFIDENCE_CAP: f64 = 0.95;

/// Sample member ids kept in pattern metadata.
pub const PATTERN_SAMPLE_SIZE: usize = 5;

/// Workspaces whose last detection run is older than this are due (seconds).
pub const DETECTION_MIN_INTERVAL_SECS: u64 = 3600;

/// Buckets up to this size are compared exhaustively.
pub const EXACT_PAIRWISE_LIMIT: usize = 512;

/// LSH bands. Higher recall, more candidates.
pub const LSH_BANDS: usize = 20;

/// Hyperplanes per LSH band.
pub const LSH_BITS_PER_BAND: usize = 8;

/// Seed for LSH hyperplanes, fixed for reproducible detection runs.
pub const LSH_SEED: u64 = 0x5eed_0f_d3c0de;

// =============================================================================
// RELATIONSHIPS
// =============================================================================

/// τ': minimum cosine similarity for a semantic memory-code link.
pub const LINK_SIMILARITY_THRESHOLD: f64 = 0.70;

/// Symbol names shorter than this are never matched verbatim.
pub const LINK_MIN_SYMBOL_LEN: usize = 4;
