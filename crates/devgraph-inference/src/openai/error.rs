//! Mapping of OpenAI HTTP failures onto the pipeline error taxonomy.

use devgraph_core::Error;

/// OpenAI-specific error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenAIErrorCode {
    /// Invalid authentication credentials.
    AuthenticationError,
    /// Rate limit exceeded.
    RateLimitExceeded,
    /// Model not found or not available.
    ModelNotFound,
    /// Input too large for the model.
    ContextLengthExceeded,
    /// Server error.
    ServerError,
    /// Unknown error.
    Unknown,
}

impl OpenAIErrorCode {
    /// Determine error code from HTTP status and error type.
    pub fn from_response(status: u16, error_type: &str) -> Self {
        match (status, error_type) {
            (401, _) | (403, _) => Self::AuthenticationError,
            (429, _) => Self::RateLimitExceeded,
            (404, _) | (_, "model_not_found") => Self::ModelNotFound,
            (400, _) if error_type.contains("context_length") => Self::ContextLengthExceeded,
            (500..=599, _) => Self::ServerError,
            _ => Self::Unknown,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimitExceeded | Self::ServerError | Self::Unknown)
    }
}

/// Convert an OpenAI failure into a pipeline error.
///
/// Credential and model problems are deployment configuration errors and
/// abort the worker. Oversized input can never succeed and is a validation
/// error. Everything else is a provider failure, retried with backoff.
pub fn to_pipeline_error(code: OpenAIErrorCode, message: &str) -> Error {
    match code {
        OpenAIErrorCode::AuthenticationError => {
            Error::Config(format!("Authentication failed: {}", message))
        }
        OpenAIErrorCode::ModelNotFound => Error::Config(format!("Model not found: {}", message)),
        OpenAIErrorCode::ContextLengthExceeded => {
            Error::Validation(format!("Input too long: {}", message))
        }
        OpenAIErrorCode::RateLimitExceeded => {
            Error::Provider(format!("Rate limit exceeded: {}", message))
        }
        OpenAIErrorCode::ServerError => Error::Provider(format!("Server error: {}", message)),
        OpenAIErrorCode::Unknown => Error::Provider(message.to_string()),
    }
}
