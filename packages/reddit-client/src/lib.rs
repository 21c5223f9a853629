//! Pure Reddit public `.json` client.
//!
//! Reads post listings (subreddit sorts and searches) and comment threads
//! without an API key. The client makes exactly one request per call and
//! does no pacing of its own; callers are expected to wrap it in a rate
//! limiter and decide how to handle [`RedditError::RateLimited`].
//!
//! # Example
//!
//! ```rust,ignore
//! use reddit_client::RedditClient;
//!
//! let client = RedditClient::new("my-research-bot:v1.0");
//! let page = client
//!     .get_listing("/r/Scams/top.json", &[("limit", "100".into()), ("t", "year".into())])
//!     .await?;
//! for post in &page.posts {
//!     println!("{} ({})", post.title, post.score);
//! }
//! ```

pub mod error;
pub mod types;

pub use error::{RedditError, Result};
pub use types::{epoch_to_utc, is_tombstone, live_author, CommentData, Listing, PostData};

use std::time::Duration;

use reqwest::{header, StatusCode};
use serde::de::DeserializeOwned;
use types::{ListingEnvelope, Thing};

pub const DEFAULT_BASE_URL: &str = "https://www.reddit.com";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct RedditClient {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
    timeout: Duration,
}

impl RedditClient {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: user_agent.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch one listing page. `path` is relative to the base URL and already
    /// carries the `.json` suffix (`/r/Scams/new.json`, `/search.json`).
    pub async fn get_listing(&self, path: &str, params: &[(&str, String)]) -> Result<Listing> {
        let envelope: ListingEnvelope = self.get_json(path, params).await?;

        let posts = envelope
            .data
            .children
            .into_iter()
            .filter(|thing| thing.kind == "t3")
            .filter_map(decode_child::<PostData>)
            .collect();

        Ok(Listing {
            posts,
            after: envelope.data.after.filter(|a| !a.is_empty()),
        })
    }

    /// Fetch the comment thread under a post permalink (`/r/sub/comments/id/slug/`).
    ///
    /// Returns every live `t1` child of the top-level comment listing in the
    /// order Reddit returned them for `sort=top`. Tombstoned bodies are dropped.
    /// A response that is well-formed but carries no comment listing yields an
    /// empty vector, not an error.
    pub async fn get_thread(&self, permalink: &str, limit: u32) -> Result<Vec<CommentData>> {
        let path = format!("{}.json", permalink.trim_end_matches('/'));
        let params = [("sort", "top".to_string()), ("limit", limit.to_string())];

        let listings: serde_json::Value = self.get_json(&path, &params).await?;

        // [0] is the post itself, [1] its comments
        let Some(comments) = listings.as_array().and_then(|parts| parts.get(1)).cloned() else {
            return Ok(Vec::new());
        };
        let Ok(envelope) = serde_json::from_value::<ListingEnvelope>(comments) else {
            return Ok(Vec::new());
        };

        Ok(envelope
            .data
            .children
            .into_iter()
            .filter(|thing| thing.kind == "t1")
            .filter_map(decode_child::<CommentData>)
            .filter(|c| !is_tombstone(&c.body))
            .collect())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .header(header::USER_AGENT, &self.user_agent)
            .timeout(self.timeout)
            .query(params)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            tracing::warn!(url = %url, ?retry_after, "Reddit rate limited");
            return Err(RedditError::RateLimited { retry_after });
        }

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(url = %url, status = %status, "Reddit request failed");
            return Err(RedditError::Status {
                status: status.as_u16(),
                body: body.chars().take(200).collect(),
            });
        }

        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| RedditError::Parse(e.to_string()))
    }
}

fn decode_child<T: DeserializeOwned>(thing: Thing) -> Option<T> {
    match serde_json::from_value(thing.data) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            tracing::debug!(kind = %thing.kind, error = %e, "Skipping undecodable listing child");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header as header_eq, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn post(id: &str) -> serde_json::Value {
        serde_json::json!({
            "kind": "t3",
            "data": {
                "id": id,
                "name": format!("t3_{id}"),
                "title": "Got scammed",
                "selftext": "Long story",
                "subreddit": "Scams",
                "author": "someone",
                "score": 12,
                "num_comments": 3,
                "created_utc": 1_700_000_000.0,
                "permalink": format!("/r/Scams/comments/{id}/got_scammed/")
            }
        })
    }

    fn comment(id: &str, body: &str, score: i64) -> serde_json::Value {
        serde_json::json!({
            "kind": "t1",
            "data": {"id": id, "body": body, "author": "x", "score": score, "parent_id": "t3_p1"}
        })
    }

    #[tokio::test]
    async fn test_listing_keeps_only_link_children() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/Scams/new.json"))
            .and(query_param("limit", "100"))
            .and(header_eq("user-agent", "ua-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "kind": "Listing",
                "data": {
                    "after": "t3_b",
                    "children": [post("a"), {"kind": "t1", "data": {"id": "c"}}, post("b")]
                }
            })))
            .mount(&server)
            .await;

        let client = RedditClient::new("ua-test").with_base_url(server.uri());
        let page = client
            .get_listing("/r/Scams/new.json", &[("limit", "100".into())])
            .await
            .unwrap();

        let ids: Vec<_> = page.posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(page.after.as_deref(), Some("t3_b"));
    }

    #[tokio::test]
    async fn test_listing_429_carries_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "12"))
            .mount(&server)
            .await;

        let client = RedditClient::new("ua").with_base_url(server.uri());
        let err = client.get_listing("/search.json", &[]).await.unwrap_err();

        assert!(matches!(
            err,
            RedditError::RateLimited { retry_after: Some(d) } if d == Duration::from_secs(12)
        ));
    }

    #[tokio::test]
    async fn test_listing_other_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let client = RedditClient::new("ua").with_base_url(server.uri());
        let err = client.get_listing("/r/x/new.json", &[]).await.unwrap_err();

        assert!(matches!(err, RedditError::Status { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_thread_drops_tombstones_and_non_comments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/r/Scams/comments/p1/title.json"))
            .and(query_param("sort", "top"))
            .and(query_param("limit", "200"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"kind": "Listing", "data": {"children": [post("p1")]}},
                {"kind": "Listing", "data": {"children": [
                    comment("c1", "useful advice", 40),
                    comment("c2", "[deleted]", 5),
                    comment("c3", "[removed]", 2),
                    {"kind": "more", "data": {"count": 10}},
                    comment("c4", "me too", 1)
                ]}}
            ])))
            .mount(&server)
            .await;

        let client = RedditClient::new("ua").with_base_url(server.uri());
        let comments = client
            .get_thread("/r/Scams/comments/p1/title/", 200)
            .await
            .unwrap();

        let ids: Vec<_> = comments.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c4"]);
    }

    #[tokio::test]
    async fn test_thread_without_comment_listing_is_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"kind": "Listing", "data": {"children": []}}
            ])))
            .mount(&server)
            .await;

        let client = RedditClient::new("ua").with_base_url(server.uri());
        let comments = client.get_thread("/r/x/comments/p2", 200).await.unwrap();

        assert!(comments.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let client = RedditClient::new("ua").with_base_url(server.uri());
        let err = client.get_listing("/r/x/new.json", &[]).await.unwrap_err();

        assert!(matches!(err, RedditError::Parse(_)));
    }
}
