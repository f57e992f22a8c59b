//! Retry and dimension guard around any embedding backend.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, instrument};

use devgraph_core::{defaults, EmbeddingBackend, Error, Result, RetryPolicy, Vector};

/// Settings for [`ResilientEmbedder`].
#[derive(Debug, Clone)]
pub struct EmbedderConfig {
    /// Deployment-wide embedding dimension.
    pub dimension: usize,
    /// Retries after the first failed call.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            dimension: defaults::EMBED_DIMENSION,
            max_retries: defaults::EMBED_MAX_RETRIES,
            base_delay: Duration::from_millis(defaults::EMBED_RETRY_BASE_DELAY_MS),
        }
    }
}

impl EmbedderConfig {
    /// Read `EMBED_DIMENSION` and `EMBED_MAX_RETRIES`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(d) = std::env::var("EMBED_DIMENSION")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.dimension = d;
        }
        if let Some(r) = std::env::var("EMBED_MAX_RETRIES")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.max_retries = r;
        }
        config
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }
}

/// Wraps a backend with exponential-backoff retries on provider errors and
/// a hard check that every vector has the deployment dimension.
///
/// A vector of the wrong length is a [`Error::Config`]: nothing is returned,
/// so no caller can persist a partial batch.
pub struct ResilientEmbedder<B> {
    inner: B,
    config: EmbedderConfig,
    retry: RetryPolicy,
}

impl<B: EmbeddingBackend> ResilientEmbedder<B> {
    /// Fails with a configuration error when the backend reports a dimension
    /// other than the deployment's.
    pub fn new(inner: B, config: EmbedderConfig) -> Result<Self> {
        if inner.dimension() != config.dimension {
            return Err(Error::Config(format!(
                "backend {} produces {}-dimensional embeddings, deployment expects {}",
                inner.model_name(),
                inner.dimension(),
                config.dimension
            )));
        }
        let retry = RetryPolicy::new(config.max_retries.saturating_add(1), config.base_delay);
        Ok(Self {
            inner,
            config,
            retry,
        })
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn check_dimensions(&self, vectors: &[Vector]) -> Result<()> {
        for (i, v) in vectors.iter().enumerate() {
            let len = v.as_slice().len();
            if len != self.config.dimension {
                error!(
                    subsystem = "inference",
                    model = self.inner.model_name(),
                    index = i,
                    expected = self.config.dimension,
                    actual = len,
                    "Embedding dimension mismatch"
                );
                return Err(Error::Config(format!(
                    "embedding {} has dimension {}, expected {}",
                    i, len, self.config.dimension
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl<B: EmbeddingBackend> EmbeddingBackend for ResilientEmbedder<B> {
    #[instrument(skip(self, texts), fields(subsystem = "inference", input_count = texts.len()))]
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let vectors = self
            .retry
            .run("embed_texts", || self.inner.embed_texts(texts))
            .await?;

        if vectors.len() != texts.len() {
            return Err(Error::Provider(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                vectors.len()
            )));
        }
        self.check_dimensions(&vectors)?;
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
