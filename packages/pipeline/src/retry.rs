//! Retry policy shared by the crawler and both classification stages.
//!
//! Errors are sorted into an [`ErrorClass`]; the policy decides per class
//! whether to try again and how long to wait first.

use std::future::Future;
use std::time::Duration;

use llm_client::LlmError;
use tracing::{debug, warn};

use crate::error::{PipelineError, SourceError};

/// How a failure should be treated by a retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Server asked us to slow down, optionally saying for how long
    RateLimited(Option<Duration>),
    /// Network, timeout, 5xx, empty body
    Transient,
    /// Response arrived but was unusable
    Malformed,
    /// Retrying will not help
    Fatal,
}

/// Errors that know their [`ErrorClass`].
pub trait Retryable {
    fn class(&self) -> ErrorClass;
}

impl Retryable for LlmError {
    fn class(&self) -> ErrorClass {
        match self {
            LlmError::RateLimited { retry_after } => ErrorClass::RateLimited(*retry_after),
            LlmError::Network(_) | LlmError::Timeout(_) | LlmError::EmptyBody => {
                ErrorClass::Transient
            }
            LlmError::Status { status, .. } if *status >= 500 || *status == 408 => {
                ErrorClass::Transient
            }
            LlmError::Parse(_) => ErrorClass::Malformed,
            LlmError::Status { .. } | LlmError::Config(_) => ErrorClass::Fatal,
        }
    }
}

impl Retryable for SourceError {
    fn class(&self) -> ErrorClass {
        match self {
            SourceError::RateLimited { retry_after } => ErrorClass::RateLimited(*retry_after),
            SourceError::Network(_) | SourceError::Timeout => ErrorClass::Transient,
            SourceError::Http { status, .. } if *status >= 500 => ErrorClass::Transient,
            SourceError::Http { .. } => ErrorClass::Fatal,
            SourceError::Parse(_) => ErrorClass::Malformed,
        }
    }
}

impl Retryable for PipelineError {
    fn class(&self) -> ErrorClass {
        match self {
            PipelineError::Completion(e) => e.class(),
            PipelineError::Source(e) => e.class(),
            PipelineError::Validation(_) | PipelineError::Json(_) => ErrorClass::Malformed,
            _ => ErrorClass::Fatal,
        }
    }
}

/// Bounded retry with per-class waits.
///
/// Waits before attempt `n + 1` (for `n >= 1` failed attempts):
/// - rate limited: the server's hint if given, else
///   `rate_limit_delay * 2^(n-1)`; capped at `max_delay` either way
/// - transient: `transient_delay * n`
/// - malformed: `malformed_delay`
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub rate_limit_delay: Duration,
    pub transient_delay: Duration,
    pub malformed_delay: Duration,
    pub max_delay: Duration,
    /// Which classes are worth another attempt
    pub retryable: fn(ErrorClass) -> bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::completion(3)
    }
}

impl RetryPolicy {
    /// Remote classification calls: everything but fatal errors is retried.
    pub fn completion(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            rate_limit_delay: Duration::from_secs(10),
            transient_delay: Duration::from_secs(2),
            malformed_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            retryable: |class| class != ErrorClass::Fatal,
        }
    }

    /// Listing pages: one retry of a rate-limited page after the server's
    /// `Retry-After` (60 s without a hint). Anything else ends the walk.
    pub fn listing() -> Self {
        Self {
            max_attempts: 2,
            rate_limit_delay: Duration::from_secs(60),
            transient_delay: Duration::ZERO,
            malformed_delay: Duration::ZERO,
            max_delay: Duration::from_secs(15 * 60),
            retryable: |class| matches!(class, ErrorClass::RateLimited(_)),
        }
    }

    /// Never retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::completion(1)
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Scale every wait to `unit`; keeps tests fast.
    pub fn with_delays(mut self, unit: Duration) -> Self {
        self.rate_limit_delay = unit;
        self.transient_delay = unit;
        self.malformed_delay = unit;
        self.max_delay = unit * 64;
        self
    }

    pub fn with_rate_limit_delay(mut self, delay: Duration) -> Self {
        self.rate_limit_delay = delay;
        self
    }

    /// Wait before the next attempt after `attempt` (1-based) failed.
    pub fn delay_for(&self, class: ErrorClass, attempt: u32) -> Duration {
        let delay = match class {
            ErrorClass::RateLimited(Some(hint)) => hint,
            ErrorClass::RateLimited(None) => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
                self.rate_limit_delay.saturating_mul(factor)
            }
            ErrorClass::Transient => self.transient_delay.saturating_mul(attempt.max(1)),
            ErrorClass::Malformed => self.malformed_delay,
            ErrorClass::Fatal => Duration::ZERO,
        };
        delay.min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. Returns the last error on failure.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let class = e.class();
                    if attempt >= self.max_attempts || !(self.retryable)(class) {
                        debug!(label, attempt, ?class, error = %e, "Giving up");
                        return Err(e);
                    }

                    let wait = self.delay_for(class, attempt);
                    warn!(label, attempt, ?class, wait_ms = wait.as_millis() as u64, error = %e, "Retrying");
                    if !wait.is_zero() {
                        tokio::time::sleep(wait).await;
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_rate_limit_backoff_is_exponential_and_capped() {
        let policy = RetryPolicy::completion(5);
        let rl = ErrorClass::RateLimited(None);

        assert_eq!(policy.delay_for(rl, 1), Duration::from_secs(10));
        assert_eq!(policy.delay_for(rl, 2), Duration::from_secs(20));
        assert_eq!(policy.delay_for(rl, 3), Duration::from_secs(40));
        assert_eq!(policy.delay_for(rl, 4), Duration::from_secs(60));
    }

    #[test]
    fn test_server_hint_wins() {
        let policy = RetryPolicy::listing();
        let hinted = ErrorClass::RateLimited(Some(Duration::from_secs(7)));
        assert_eq!(policy.delay_for(hinted, 1), Duration::from_secs(7));
        assert_eq!(
            policy.delay_for(ErrorClass::RateLimited(None), 1),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_transient_is_linear() {
        let policy = RetryPolicy::completion(3);
        assert_eq!(policy.delay_for(ErrorClass::Transient, 1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(ErrorClass::Transient, 2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(ErrorClass::Malformed, 2), Duration::from_secs(1));
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(LlmError::EmptyBody.class(), ErrorClass::Transient);
        assert_eq!(
            LlmError::Status { status: 502, body: String::new() }.class(),
            ErrorClass::Transient
        );
        assert_eq!(
            LlmError::Status { status: 401, body: String::new() }.class(),
            ErrorClass::Fatal
        );
        assert_eq!(
            SourceError::Http { status: 404, body: String::new() }.class(),
            ErrorClass::Fatal
        );
        assert_eq!(
            PipelineError::Validation(crate::error::ValidationError::NoJsonObject).class(),
            ErrorClass::Malformed
        );
    }

    #[tokio::test]
    async fn test_run_stops_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::completion(3).with_delays(Duration::from_millis(1));

        let result: Result<(), LlmError> = policy
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LlmError::Parse("bad".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_fatal() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::completion(3).with_delays(Duration::from_millis(1));

        let result: Result<(), LlmError> = policy
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(LlmError::Config("no key".into())) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_recovers() {
        let policy = RetryPolicy::completion(3).with_delays(Duration::from_millis(1));

        let result: Result<u32, LlmError> = policy
            .run("test", |attempt| async move {
                if attempt < 2 {
                    Err(LlmError::EmptyBody)
                } else {
                    Ok(attempt)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_listing_policy_retries_rate_limit_once() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::listing().with_rate_limit_delay(Duration::from_millis(1));

        let result: Result<(), SourceError> = policy
            .run("page", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::RateLimited { retry_after: None }) }
            })
            .await;

        assert!(matches!(result, Err(SourceError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_listing_policy_does_not_retry_network() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::listing();

        let _: Result<(), SourceError> = policy
            .run("page", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(SourceError::Network("reset".into())) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
