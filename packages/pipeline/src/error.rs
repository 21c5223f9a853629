//! Typed errors for the pipeline library.
//!
//! Uses `thiserror` for library errors; the `pipeline` binary wraps these in
//! `anyhow` at the top level.

use std::time::Duration;

use llm_client::LlmError;
use thiserror::Error;

/// Errors that can occur while running a pipeline phase.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Storage operation failed. Aborts the phase.
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Listing source call failed
    #[error("listing source error: {0}")]
    Source(#[from] SourceError),

    /// Remote classification call failed
    #[error("completion error: {0}")]
    Completion(#[from] LlmError),

    /// Model output could not be turned into a record
    #[error("invalid model output: {0}")]
    Validation(#[from] ValidationError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Item referenced by key does not exist
    #[error("item not found: {post_id}")]
    ItemNotFound { post_id: String },

    /// Worker task panicked or was cancelled
    #[error("worker task failed: {0}")]
    Worker(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),
}

impl PipelineError {
    pub(crate) fn storage(e: impl std::fmt::Display) -> Self {
        PipelineError::Storage(e.to_string().into())
    }
}

/// Errors reported by a listing source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// HTTP 429
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Any other non-success status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("parse error: {0}")]
    Parse(String),
}

/// Reasons a model response was rejected before it could be stored.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// No balanced JSON object anywhere in the response
    #[error("no JSON object found in response")]
    NoJsonObject,

    /// Something object-shaped was found but did not parse
    #[error("malformed JSON: {0}")]
    MalformedJson(String),

    /// Top-level value was not an object
    #[error("expected a JSON object")]
    NotAnObject,

    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// Field value, unknown field, or closed-enum violation
    #[error("schema violation: {0}")]
    Schema(String),

    #[error("expected 2 to 5 tags, got {0}")]
    TagCount(usize),

    #[error("confidence out of range: {0}")]
    Confidence(f64),
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Result type alias for listing source calls.
pub type SourceResult<T> = std::result::Result<T, SourceError>;
