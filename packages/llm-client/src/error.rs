//! Error types for the completion client.

use std::time::Duration;

use thiserror::Error;

/// Result type for completion client operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Completion client errors.
///
/// Each variant maps to one failure the caller may want to treat differently
/// when deciding whether and how long to wait before trying again.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Configuration error (missing API key, invalid settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connection failed before a response arrived
    #[error("Network error: {0}")]
    Network(String),

    /// The per-call timeout elapsed
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// HTTP 429, with the server's `Retry-After` hint when it sent one
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Any other non-success status
    #[error("API error {status}: {body}")]
    Status { status: u16, body: String },

    /// Success status but no message content to work with
    #[error("Empty response body")]
    EmptyBody,

    /// Response envelope could not be decoded
    #[error("Parse error: {0}")]
    Parse(String),
}
