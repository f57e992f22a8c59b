//! OpenAI-compatible embedding backend.
//!
//! Works with any endpoint that speaks the `/embeddings` API, including the
//! OpenAI cloud API, Azure OpenAI, vLLM and Ollama in compatibility mode.
//!
//! # Example
//!
//! ```rust,no_run
//! use devgraph_inference::openai::OpenAIBackend;
//! use devgraph_core::EmbeddingBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OpenAIBackend::from_env().unwrap();
//!     let texts = vec!["Hello, world!".to_string()];
//!     let vectors = backend.embed_texts(&texts).await.unwrap();
//!     assert_eq!(vectors[0].as_slice().len(), backend.config().embed_dimension);
//! }
//! ```

mod backend;
mod error;
mod types;

pub use backend::{OpenAIBackend, OpenAIConfig, DEFAULT_OPENAI_URL};
pub use error::{to_pipeline_error, OpenAIErrorCode};
pub use types::*;
