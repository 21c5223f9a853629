//! Pure chat completions client for OpenAI-compatible endpoints.
//!
//! Defaults to OpenRouter. One call is one HTTP request: the client never
//! retries on its own, it only reports *why* a call failed so callers can
//! apply their own retry policy.
//!
//! # Example
//!
//! ```rust,ignore
//! use llm_client::{CompletionOptions, LlmClient};
//!
//! let client = LlmClient::new(api_key);
//! let options = CompletionOptions::new("openai/gpt-oss-120b")
//!     .temperature(0.1)
//!     .json_object();
//!
//! let text = client.complete("You label posts.", "Title: ...", &options).await?;
//! ```

pub mod error;
pub mod schema;
pub mod types;

pub use error::{LlmError, Result};
pub use schema::StructuredOutput;
pub use types::*;

use std::time::{Duration, Instant};

use reqwest::{header, Client, StatusCode};
use tracing::{debug, warn};

/// Default API root (chat completions live under `/chat/completions`).
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Chat completions client.
#[derive(Clone)]
pub struct LlmClient {
    http_client: Client,
    api_key: String,
    base_url: String,
}

impl LlmClient {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Set a custom base URL (proxies, self-hosted gateways, tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Single chat completion returning the first choice's message text.
    pub async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &CompletionOptions,
    ) -> Result<String> {
        if self.api_key.trim().is_empty() {
            return Err(LlmError::Config("API key is empty".into()));
        }
        let request = CompletionRequest::from_options(system, user, options);
        let start = Instant::now();

        let response = self
            .http_client
            .post(format!("{}/chat/completions", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(header::CONTENT_TYPE, "application/json")
            .timeout(options.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| transport_error(e, options.timeout))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after(response.headers());
            warn!(model = %options.model, ?retry_after, "Completion rate limited");
            return Err(LlmError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(model = %options.model, status = %status, body = %preview(&body), "Completion API error");
            return Err(LlmError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let raw: CompletionResponseRaw = response
            .json()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(options.timeout)
                } else {
                    LlmError::Parse(e.to_string())
                }
            })?;

        let content = raw
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyBody)?;

        debug!(
            model = %options.model,
            duration_ms = start.elapsed().as_millis(),
            chars = content.len(),
            "Chat completion"
        );

        Ok(content)
    }
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

fn transport_error(e: reqwest::Error, timeout: Duration) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout(timeout)
    } else {
        warn!(error = %e, "Completion request failed");
        LlmError::Network(e.to_string())
    }
}

/// `Retry-After` in delta-seconds form.
fn retry_after(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get(header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn preview(body: &str) -> &str {
    match body.char_indices().nth(300) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header as header_eq, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options() -> CompletionOptions {
        CompletionOptions::new("test-model").timeout(Duration::from_secs(2))
    }

    async fn client_for(server: &MockServer) -> LlmClient {
        LlmClient::new("sk-test").with_base_url(server.uri())
    }

    #[test]
    fn test_client_builder() {
        let client = LlmClient::new("sk-test").with_base_url("https://gateway.local/v1/");

        assert_eq!(client.api_key, "sk-test");
        assert_eq!(client.base_url(), "https://gateway.local/v1");
    }

    #[tokio::test]
    async fn test_blank_api_key_is_config_error() {
        let server = MockServer::start().await;

        let err = LlmClient::new("  ")
            .with_base_url(server.uri())
            .complete("sys", "user", &options())
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::Config(_)));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn test_returns_first_choice_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header_eq("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({"model": "test-model"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": "{\"ok\":true}"}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let text = client_for(&server)
            .await
            .complete("sys", "user", &options())
            .await
            .unwrap();

        assert_eq!(text, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn test_429_reports_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .complete("sys", "user", &options())
            .await
            .unwrap_err();

        match err {
            LlmError::RateLimited { retry_after } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)))
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_success_status_keeps_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .complete("sys", "user", &options())
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::Status { status: 503, ref body } if body == "upstream down"));
    }

    #[tokio::test]
    async fn test_blank_content_is_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "   "}}]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .complete("sys", "user", &options())
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::EmptyBody));
    }

    #[tokio::test]
    async fn test_null_content_is_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": null}}]
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .await
            .complete("sys", "user", &options())
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::EmptyBody));
    }

    #[tokio::test]
    async fn test_slow_server_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_delay(Duration::from_millis(500))
                    .set_body_json(serde_json::json!({"choices": []})),
            )
            .mount(&server)
            .await;

        let opts = options().timeout(Duration::from_millis(50));
        let err = client_for(&server)
            .await
            .complete("sys", "user", &opts)
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::Timeout(_)));
    }

    #[test]
    fn test_retry_after_ignores_http_dates() {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::RETRY_AFTER,
            header::HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(retry_after(&headers), None);
    }
}
