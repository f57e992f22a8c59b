//! # devgraph-jobs
//!
//! Queue workers and stage handlers for the devgraph pipeline.
//!
//! This crate provides:
//! - A polling queue worker with per-message timeouts, dead-lettering and a
//!   wall-clock budget
//! - Memory and code ingestion handlers
//! - Batched entity summarization with embeddings
//! - Pattern detection (semantic clusters, keyword activity, sessions)
//! - Memory-code relationship detection
//!
//! ## Example
//!
//! ```ignore
//! use devgraph_jobs::{MemoryIngestionHandler, Stores, WorkerBuilder, WorkerConfig};
//! use devgraph_db::Database;
//!
//! let db = Database::connect("postgres://...").await?;
//! let stores = Stores::from_database(&db);
//!
//! let worker = WorkerBuilder::new(stores.clone())
//!     .with_config(WorkerConfig::default().with_poll_interval(1000))
//!     .with_handler(MemoryIngestionHandler::new(stores))
//!     .build()?;
//!
//! let handle = worker.start();
//!
//! let mut events = handle.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! handle.shutdown().await?;
//! ```

pub mod code_metadata;
pub mod detection;
pub mod handler;
pub mod ingestion;
pub mod patterns;
pub mod relationships;
pub mod summarization;
pub mod worker;

// Re-export core types
pub use devgraph_core::*;

pub use detection::{PatternDetectionHandler, WorkspaceRun};
pub use handler::{HandlerOutcome, MessageContext, MessageHandler, NoOpHandler, Stores};
pub use ingestion::{CodeIngestionHandler, IngestReport, MemoryIngestionHandler};
pub use patterns::{DetectedPattern, DetectionReport, PatternConfig, PatternEngine};
pub use relationships::{RelationshipConfig, RelationshipDetector, RelationshipReport};
pub use summarization::{SummarizationConfig, SummarizationHandler, SummarizationReport};
pub use worker::{
    BatchReport, QueueWorker, StopReason, WorkerBuilder, WorkerConfig, WorkerEvent, WorkerHandle,
};
