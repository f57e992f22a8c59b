//! Queue repository backed by the `queue_message` table.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, warn};

use devgraph_core::{dead_letter_queue, Error, MessageQueue, QueueMessage, Result};

/// PostgreSQL implementation of MessageQueue.
///
/// Leasing uses `FOR UPDATE SKIP LOCKED` so concurrent consumers never
/// receive the same visible message.
#[derive(Clone)]
pub struct PgQueueRepository {
    pool: Pool<Postgres>,
}

impl PgQueueRepository {
    /// Create a new PgQueueRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_message_row(row: sqlx::postgres::PgRow) -> QueueMessage {
        QueueMessage {
            message_id: row.get("message_id"),
            payload: row.get("payload"),
            read_count: row.get("read_count"),
            enqueued_at: row.get("enqueued_at"),
        }
    }
}

fn secs(d: Duration) -> f64 {
    d.as_secs_f64()
}

#[async_trait]
impl MessageQueue for PgQueueRepository {
    async fn enqueue(&self, queue: &str, payload: &JsonValue) -> Result<i64> {
        let message_id: i64 = sqlx::query_scalar(
            "INSERT INTO queue_message (queue_name, payload)
             VALUES ($1, $2)
             RETURNING message_id",
        )
        .bind(queue)
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        debug!(queue, message_id, "Message enqueued");
        Ok(message_id)
    }

    async fn dequeue(
        &self,
        queue: &str,
        visibility_timeout: Duration,
        max_count: usize,
    ) -> Result<Vec<QueueMessage>> {
        if max_count == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "UPDATE queue_message
             SET visible_at = now() + make_interval(secs => $2),
                 read_count = read_count + 1
             WHERE message_id IN (
                 SELECT message_id FROM queue_message
                 WHERE queue_name = $1 AND visible_at <= now()
                 ORDER BY message_id
                 LIMIT $3
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING message_id, payload, read_count, enqueued_at",
        )
        .bind(queue)
        .bind(secs(visibility_timeout))
        .bind(max_count as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut messages: Vec<QueueMessage> =
            rows.into_iter().map(Self::parse_message_row).collect();
        // RETURNING order is unspecified.
        messages.sort_by_key(|m| m.message_id);
        Ok(messages)
    }

    async fn ack(&self, queue: &str, message_id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM queue_message WHERE queue_name = $1 AND message_id = $2")
            .bind(queue)
            .bind(message_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            warn!(queue, message_id, "Ack for unknown message");
        }
        Ok(())
    }

    async fn nack(&self, queue: &str, message_id: i64, delay: Duration) -> Result<()> {
        sqlx::query(
            "UPDATE queue_message
             SET visible_at = now() + make_interval(secs => $3)
             WHERE queue_name = $1 AND message_id = $2",
        )
        .bind(queue)
        .bind(message_id)
        .bind(secs(delay))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dead_letter(&self, queue: &str, message_id: i64, reason: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE queue_message
             SET queue_name = $3, dead_reason = $4, visible_at = now()
             WHERE queue_name = $1 AND message_id = $2",
        )
        .bind(queue)
        .bind(message_id)
        .bind(dead_letter_queue(queue))
        .bind(reason)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!(
                "message {} not found in queue {}",
                message_id, queue
            )));
        }
        Ok(())
    }

    async fn depth(&self, queue: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue_message WHERE queue_name = $1")
            .bind(queue)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}
