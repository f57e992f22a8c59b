//! # devgraph-inference
//!
//! Embedding provider backends for the devgraph pipeline.
//!
//! This crate provides:
//! - OpenAI-compatible embedding backend (feature `openai`, default)
//! - [`ResilientEmbedder`]: retry with exponential backoff plus a hard
//!   dimension check in front of any backend
//! - Deterministic mock backend (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use devgraph_inference::{EmbedderConfig, OpenAIBackend, ResilientEmbedder};
//! use devgraph_core::EmbeddingBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OpenAIBackend::from_env().unwrap();
//!     let embedder = ResilientEmbedder::new(backend, EmbedderConfig::from_env()).unwrap();
//!     let texts = vec!["Hello".to_string()];
//!     let embeddings = embedder.embed_texts(&texts).await.unwrap();
//! }
//! ```

pub mod resilient;

#[cfg(feature = "openai")]
pub mod openai;

// Mock embedding backend for tests
#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use devgraph_core::*;

#[cfg(feature = "openai")]
pub use openai::{OpenAIBackend, OpenAIConfig};

#[cfg(any(test, feature = "mock"))]
pub use mock::MockEmbeddingBackend;

pub use resilient::{EmbedderConfig, ResilientEmbedder};
