//! Audit sink writing to the `pipeline_log` table.

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use devgraph_core::{AuditRecord, AuditSink, Result};

/// PostgreSQL implementation of AuditSink.
#[derive(Clone)]
pub struct PgAuditSink {
    pool: Pool<Postgres>,
}

impl PgAuditSink {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PgAuditSink {
    async fn record(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO pipeline_log (batch_id, level, message, metadata, error_stack, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.batch_id)
        .bind(record.level.as_str())
        .bind(&record.message)
        .bind(record.metadata())
        .bind(record.error_stack())
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
