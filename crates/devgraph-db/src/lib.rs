//! # devgraph-db
//!
//! PostgreSQL database layer for the devgraph pipeline.
//!
//! This crate provides:
//! - Connection pool management
//! - Visibility-timeout message queues with dead-letter counterparts
//! - The knowledge-graph store (pgvector embeddings, typed edges)
//! - The `pipeline_log` audit sink
//! - In-memory implementations of the same traits for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use devgraph_db::{Database, MessageQueue};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/devgraph").await?;
//!     db.migrate().await?;
//!
//!     let depth = db.queues.depth("memory_ingestion").await?;
//!     println!("{} messages waiting", depth);
//!     Ok(())
//! }
//! ```
pub mod audit;
pub mod graph;
pub mod memory;
pub mod pool;
pub mod queues;

// Compiled outside cfg(test) so integration tests (in tests/) can use it
#[cfg(feature = "migrations")]
pub mod test_fixtures;

// Re-export core types
pub use devgraph_core::*;

pub use audit::PgAuditSink;
pub use graph::PgGraphStore;
pub use memory::{InMemoryAuditSink, InMemoryGraphStore, InMemoryQueue};
pub use pool::{create_pool_with_config, log_pool_metrics, PoolConfig};
pub use queues::PgQueueRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Stage queues and their dead-letter counterparts.
    pub queues: PgQueueRepository,
    /// Knowledge-graph store.
    pub graph: PgGraphStore,
    /// Pipeline audit log.
    pub audit: PgAuditSink,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            queues: PgQueueRepository::new(pool.clone()),
            graph: PgGraphStore::new(pool.clone()),
            audit: PgAuditSink::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, PoolConfig::default()).await
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Replace the graph store's transient-failure retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.graph = self.graph.with_retry(retry);
        self
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
