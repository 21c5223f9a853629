//! Remote classification service seam.

use async_trait::async_trait;
use llm_client::{CompletionOptions, LlmClient, LlmError};

/// A single chat completion call: system + user prompt in, raw text out.
///
/// Implementations make exactly one attempt; retrying is the caller's job.
#[async_trait]
pub trait Completion: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &CompletionOptions,
    ) -> Result<String, LlmError>;
}

#[async_trait]
impl Completion for LlmClient {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        LlmClient::complete(self, system, user, options).await
    }
}
