//! Message handlers for each stage queue.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::warn;

use devgraph_core::{
    AuditRecord, AuditSink, Error, ErrorClass, GraphStore, MessageQueue, QueueMessage, Result,
};
use devgraph_db::Database;

/// Collaborators shared by every stage handler.
#[derive(Clone)]
pub struct Stores {
    pub queues: Arc<dyn MessageQueue>,
    pub graph: Arc<dyn GraphStore>,
    pub audit: Arc<dyn AuditSink>,
}

impl Stores {
    pub fn new(
        queues: Arc<dyn MessageQueue>,
        graph: Arc<dyn GraphStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            queues,
            graph,
            audit,
        }
    }

    /// Stores backed by the PostgreSQL repositories of `db`.
    pub fn from_database(db: &Database) -> Self {
        Self {
            queues: Arc::new(db.queues.clone()),
            graph: Arc::new(db.graph.clone()),
            audit: Arc::new(db.audit.clone()),
        }
    }

    /// Write an audit record. Sink failures are logged, never propagated.
    pub async fn record_audit(&self, record: AuditRecord) {
        if let Err(e) = self.audit.record(&record).await {
            warn!(
                subsystem = "jobs",
                error = %e,
                message = %record.message,
                "Failed to write audit record"
            );
        }
    }
}

/// Context provided to a handler for one leased message.
#[derive(Debug, Clone)]
pub struct MessageContext {
    /// Queue the message was leased from.
    pub queue: String,
    pub message: QueueMessage,
}

impl MessageContext {
    pub fn new(queue: impl Into<String>, message: QueueMessage) -> Self {
        Self {
            queue: queue.into(),
            message,
        }
    }

    pub fn message_id(&self) -> i64 {
        self.message.message_id
    }

    pub fn payload(&self) -> &JsonValue {
        &self.message.payload
    }

    pub fn read_count(&self) -> i32 {
        self.message.read_count
    }
}

/// What the worker does with a message after its handler returns.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerOutcome {
    /// Processed; delete the message. Carries an optional result summary.
    Ack(Option<JsonValue>),
    /// Leave the message for redelivery after its visibility timeout.
    Retry(String),
    /// Poison message; move it to the dead-letter queue.
    Reject(String),
    /// Leave the message unacked and stop the worker.
    Fatal(String),
}

impl HandlerOutcome {
    /// Map an error to the worker reaction its class demands.
    pub fn from_error(err: &Error) -> Self {
        match err.class() {
            ErrorClass::Permanent => HandlerOutcome::Reject(err.to_string()),
            ErrorClass::Transient => HandlerOutcome::Retry(err.to_string()),
            ErrorClass::Fatal => HandlerOutcome::Fatal(err.to_string()),
        }
    }

    pub fn from_result(result: Result<JsonValue>) -> Self {
        match result {
            Ok(value) => HandlerOutcome::Ack(Some(value)),
            Err(e) => HandlerOutcome::from_error(&e),
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self, HandlerOutcome::Ack(_))
    }
}

/// Processes messages of one queue.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Queue this handler drains.
    fn queue(&self) -> &str;

    /// Process one message. Must never panic on malformed input.
    async fn handle(&self, ctx: MessageContext) -> HandlerOutcome;
}

/// Handler that acks everything, for worker tests.
pub struct NoOpHandler {
    queue: String,
}

impl NoOpHandler {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for NoOpHandler {
    fn queue(&self) -> &str {
        &self.queue
    }

    async fn handle(&self, _ctx: MessageContext) -> HandlerOutcome {
        HandlerOutcome::Ack(None)
    }
}
