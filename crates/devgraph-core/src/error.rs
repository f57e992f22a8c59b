//! Error types for the devgraph pipeline.
//!
//! Every error carries a [`ErrorClass`] so that workers can decide at the
//! message boundary whether to dead-letter, redeliver, or abort.

use thiserror::Error;

/// Result type alias using devgraph's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// How a worker must react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retrying cannot help; the message goes to the dead-letter queue.
    Permanent,
    /// Leave the message for redelivery.
    Transient,
    /// Abort the worker; the message stays unacked.
    Fatal,
}

/// Core error type for pipeline operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or incomplete message.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Store timeout, connection reset, pool exhaustion.
    #[error("Transient store error: {0}")]
    TransientStore(String),

    /// Embedding provider failure.
    #[error("Provider error: {0}")]
    Provider(String),

    /// A summary write found its entity already summarized under another id.
    /// Indicates an upstream dedupe-key bug.
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Embedding dimension or workspace-id scheme mismatch in deployment config.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Any other database failure.
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify the error for the worker's ack/retry/abort decision.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Validation(_) | Error::Serialization(_) | Error::NotFound(_) => {
                ErrorClass::Permanent
            }
            Error::TransientStore(_)
            | Error::Provider(_)
            | Error::Database(_)
            | Error::Internal(_) => ErrorClass::Transient,
            Error::ConstraintViolation(_) | Error::Config(_) => ErrorClass::Fatal,
        }
    }

    /// Whether an immediate in-process retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientStore(_) | Error::Provider(_))
    }
}

impl From<sqlx::Error> for Error {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &e {
            // Upserts arbitrate on the only unique key, so a unique violation
            // means a concurrent writer won the insert; the retry updates.
            // serialization_failure, deadlock_detected, query_canceled (statement timeout)
            if db_err.is_unique_violation()
                || matches!(
                    db_err.code().as_deref(),
                    Some("23505") | Some("40001") | Some("40P01") | Some("57014")
                )
            {
                return Error::TransientStore(db_err.message().to_string());
            }
        }
        let transient = matches!(
            e,
            sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::Io(_)
                | sqlx::Error::Tls(_)
                | sqlx::Error::WorkerCrashed
                | sqlx::Error::Protocol(_)
        );
        if transient {
            Error::TransientStore(e.to_string())
        } else {
            Error::Database(e)
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Provider(e.to_string())
    }
}
