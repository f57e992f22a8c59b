//! Mock embedding backend for deterministic testing.
//!
//! Embeddings are derived from a hash of the input text, so the same text
//! always produces the same unit vector. Texts that mention a registered
//! topic keyword are pulled toward that topic's vector, which lets tests
//! build clusters without a real model.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use devgraph_inference::mock::MockEmbeddingBackend;
//! use devgraph_core::EmbeddingBackend;
//!
//! # async fn demo() {
//! let backend = MockEmbeddingBackend::new()
//!     .with_dimension(64)
//!     .with_topic("login");
//!
//! let a = backend.embed("login fails after deploy").await.unwrap();
//! let b = backend.embed("fixing the login redirect").await.unwrap();
//! assert_eq!(a.as_slice().len(), 64);
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};

use devgraph_core::{EmbeddingBackend, Error, Result, Vector};

/// Weight of the per-text component relative to a topic vector.
const TOPIC_NOISE: f32 = 0.2;

#[derive(Debug, Clone)]
struct MockConfig {
    dimension: usize,
    /// Length of returned vectors when it should differ from `dimension`.
    output_dimension: Option<usize>,
    topics: Vec<String>,
    fixed: HashMap<String, Vec<f32>>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            dimension: 64,
            output_dimension: None,
            topics: Vec::new(),
            fixed: HashMap::new(),
        }
    }
}

/// Deterministic [`EmbeddingBackend`] for tests.
#[derive(Clone, Default)]
pub struct MockEmbeddingBackend {
    config: Arc<MockConfig>,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    failures_remaining: Arc<AtomicU32>,
}

impl MockEmbeddingBackend {
    /// Create a new mock backend with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the embedding dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        Arc::make_mut(&mut self.config).dimension = dimension;
        self
    }

    /// Return vectors of `len` values while still reporting the configured
    /// dimension, simulating a misconfigured provider.
    pub fn with_output_dimension(mut self, len: usize) -> Self {
        Arc::make_mut(&mut self.config).output_dimension = Some(len);
        self
    }

    /// Texts containing `keyword` (case-insensitive) embed close to a shared
    /// topic vector.
    pub fn with_topic(mut self, keyword: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config)
            .topics
            .push(keyword.into().to_lowercase());
        self
    }

    /// Return exactly `vector` for `text`.
    pub fn with_fixed_embedding(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        Arc::make_mut(&mut self.config)
            .fixed
            .insert(text.into(), vector);
        self
    }

    /// Fail the next `n` calls with a provider error.
    pub fn fail_next(&self, n: u32) {
        self.failures_remaining.store(n, Ordering::SeqCst);
    }

    /// Inputs of every `embed_texts` call so far.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of `embed_texts` calls so far, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// The vector this backend returns for `text`.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(fixed) = self.config.fixed.get(text) {
            return fixed.clone();
        }
        let len = self.config.output_dimension.unwrap_or(self.config.dimension);
        let noise = seeded_unit_vector(text, len);

        let lower = text.to_lowercase();
        let Some(topic) = self.config.topics.iter().find(|t| lower.contains(t.as_str())) else {
            return noise;
        };

        let anchor = seeded_unit_vector(&format!("topic:{}", topic), len);
        let mut mixed: Vec<f32> = anchor
            .iter()
            .zip(&noise)
            .map(|(a, n)| a + TOPIC_NOISE * n)
            .collect();
        normalize(&mut mixed);
        mixed
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(texts.to_vec());

        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::Provider("simulated provider failure".into()));
        }

        Ok(texts
            .iter()
            .map(|t| Vector::from(self.vector_for(t)))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }
}

/// Unit vector seeded from the SHA-256 of `text`.
fn seeded_unit_vector(text: &str, dimension: usize) -> Vec<f32> {
    let seed: [u8; 32] = Sha256::digest(text.as_bytes()).into();
    let mut rng = StdRng::from_seed(seed);
    let mut vec: Vec<f32> = (0..dimension).map(|_| rng.gen::<f32>() - 0.5).collect();
    normalize(&mut vec);
    vec
}

fn normalize(vec: &mut [f32]) {
    let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
    if magnitude > 0.0 {
        vec.iter_mut().for_each(|x| *x /= magnitude);
    }
}
