//! Structured logging schema and field name constants.
//!
//! All crates use these constants (or the identical literal field names in
//! `tracing` macros) so log aggregation can query every stage by the same keys.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Fatal worker abort, constraint violation, requires operator attention |
//! | WARN  | Dead-lettered message, retry scheduled, slow provider call |
//! | INFO  | Lifecycle events, per-message and per-run completions |
//! | DEBUG | Decision points, batch sizes, config choices |
//! | TRACE | Per-entity and per-pair iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "queue", "graph", "inference", "jobs", "worker"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "pg_queue", "memory_ingestion", "pattern_engine"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "dequeue", "upsert_memory", "embed_texts", "detect"
pub const OPERATION: &str = "op";

/// Detection or ingestion batch correlating log lines and audit records.
pub const BATCH_ID: &str = "batch_id";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Queue name.
pub const QUEUE: &str = "queue";

/// Queue message id.
pub const MESSAGE_ID: &str = "message_id";

/// Delivery attempt of a message.
pub const READ_COUNT: &str = "read_count";

/// Workspace scope of the operation.
pub const WORKSPACE_ID: &str = "workspace_id";

/// Graph node id being operated on.
pub const ENTITY_ID: &str = "entity_id";

/// Pattern name.
pub const PATTERN_NAME: &str = "pattern_name";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of input texts sent to an embedding model.
pub const INPUT_COUNT: &str = "input_count";

/// Number of entities written.
pub const ENTITY_COUNT: &str = "entity_count";

/// Number of patterns written.
pub const PATTERN_COUNT: &str = "pattern_count";

/// Number of edges written.
pub const EDGE_COUNT: &str = "edge_count";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

/// Retry attempt number.
pub const ATTEMPT: &str = "attempt";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for embedding.
pub const MODEL: &str = "model";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Error class: permanent, transient, fatal.
pub const ERROR_CLASS: &str = "error_class";

/// Slow operation threshold exceeded.
pub const SLOW: &str = "slow";
