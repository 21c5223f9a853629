use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RedditError>;

#[derive(Debug, Error)]
pub enum RedditError {
    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for RedditError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RedditError::Timeout
        } else if e.is_decode() {
            RedditError::Parse(e.to_string())
        } else {
            RedditError::Network(e.to_string())
        }
    }
}
