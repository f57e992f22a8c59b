//! # devgraph-core
//!
//! Core types, traits, and abstractions for the devgraph pipeline.
//!
//! This crate provides:
//! - Graph node and edge models (Memory, CodeEntity, EntitySummary, Pattern)
//! - Workspace identifiers and deterministic id derivation
//! - The error taxonomy shared by every stage
//! - Repository and provider traits (queues, graph store, audit sink, embeddings)
//! - Content signals, similarity clustering, and temporal bucketing

pub mod audit;
pub mod defaults;
pub mod error;
pub mod identity;
pub mod logging;
pub mod messages;
pub mod models;
pub mod retry;
pub mod signals;
pub mod similarity;
pub mod temporal;
pub mod traits;
pub mod workspace;

pub use audit::{AuditRecord, LogEvent, LogLevel};
pub use error::{Error, ErrorClass, Result};
pub use messages::{
    CodeFile, CodeIngestPayload, DetectorKind, MemoryChunk, MemoryIngestPayload,
    PatternDetectionTrigger, SummarizationRequest,
};
pub use models::*;
pub use retry::RetryPolicy;
pub use signals::PatternSignals;
pub use traits::*;
pub use workspace::{WorkspaceId, WorkspaceKind};
