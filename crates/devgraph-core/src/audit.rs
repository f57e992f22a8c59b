//! Audit records produced for external log dashboards.
//!
//! Events are a closed set of known shapes. Anything beyond them rides in
//! the free-form `extra` field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Known event shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum LogEvent {
    IngestionResult {
        queue: String,
        workspace_id: String,
        created: usize,
        updated: usize,
    },
    SummarizationResult {
        workspace_id: String,
        summarized: usize,
        reused_embeddings: usize,
    },
    PatternResult {
        workspace_id: String,
        patterns_written: usize,
        summaries_considered: usize,
        duration_ms: u64,
    },
    RelationshipResult {
        workspace_id: String,
        links_created: usize,
        candidates: usize,
    },
    MessageDeadLettered {
        queue: String,
        message_id: i64,
        read_count: i32,
        reason: String,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_stack: Option<String>,
    },
}

/// One record for the audit sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub batch_id: Option<Uuid>,
    pub level: LogLevel,
    pub message: String,
    pub event: LogEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(level: LogLevel, message: impl Into<String>, event: LogEvent) -> Self {
        Self {
            batch_id: None,
            level,
            message: message.into(),
            event,
            extra: None,
            created_at: Utc::now(),
        }
    }

    pub fn info(message: impl Into<String>, event: LogEvent) -> Self {
        Self::new(LogLevel::Info, message, event)
    }

    /// Error record carrying the error's display text and source chain.
    pub fn error(message: impl Into<String>, err: &Error) -> Self {
        let mut stack = Vec::new();
        let mut source = std::error::Error::source(err);
        while let Some(cause) = source {
            stack.push(cause.to_string());
            source = cause.source();
        }
        Self::new(
            LogLevel::Error,
            message,
            LogEvent::Error {
                message: err.to_string(),
                error_stack: (!stack.is_empty()).then(|| stack.join("\n")),
            },
        )
    }

    pub fn with_batch(mut self, batch_id: Uuid) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    pub fn with_extra(mut self, extra: JsonValue) -> Self {
        self.extra = Some(extra);
        self
    }

    /// Metadata column: the event plus `extra`, if any.
    pub fn metadata(&self) -> JsonValue {
        let mut meta = serde_json::to_value(&self.event).unwrap_or(JsonValue::Null);
        if let (Some(extra), JsonValue::Object(map)) = (&self.extra, &mut meta) {
            map.insert("extra".to_string(), extra.clone());
        }
        meta
    }

    pub fn error_stack(&self) -> Option<&str> {
        match &self.event {
            LogEvent::Error { error_stack, .. } => error_stack.as_deref(),
            _ => None,
        }
    }
}
