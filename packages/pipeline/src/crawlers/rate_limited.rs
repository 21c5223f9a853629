//! Rate-limited listing source wrapper.
//!
//! Wraps any `ListingSource` with a governor limiter that hands out one
//! permit per `period`. Every page and thread request waits for a permit,
//! so the crawler and the enrichment fetcher share one request budget when
//! they share the wrapper.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;

use crate::error::SourceResult;
use crate::traits::source::{ListingPage, ListingSource, PageRequest};
use crate::types::comment::Comment;

type DirectRateLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// A listing source that enforces a minimum gap between requests.
pub struct RateLimitedSource<S: ListingSource> {
    inner: S,
    /// `None` when the period is zero (no pacing)
    limiter: Option<Arc<DirectRateLimiter>>,
    period: Duration,
}

impl<S: ListingSource> RateLimitedSource<S> {
    /// Allow one request per `period`, no burst.
    pub fn new(source: S, period: Duration) -> Self {
        let limiter = Quota::with_period(period)
            .map(|quota| Arc::new(RateLimiter::direct(quota.allow_burst(nonzero!(1u32)))));
        Self {
            inner: source,
            limiter,
            period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn wait_for_permit(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }
}

#[async_trait]
impl<S: ListingSource> ListingSource for RateLimitedSource<S> {
    async fn fetch_page(&self, request: &PageRequest) -> SourceResult<ListingPage> {
        self.wait_for_permit().await;
        self.inner.fetch_page(request).await
    }

    async fn fetch_thread(
        &self,
        post_id: &str,
        permalink: &str,
        limit: u32,
    ) -> SourceResult<Vec<Comment>> {
        self.wait_for_permit().await;
        self.inner.fetch_thread(post_id, permalink, limit).await
    }
}

/// Extension trait for easy rate limiting.
pub trait ListingSourceExt: ListingSource + Sized {
    /// Wrap this source so requests are at least `period` apart.
    fn rate_limited(self, period: Duration) -> RateLimitedSource<Self> {
        RateLimitedSource::new(self, period)
    }
}

impl<S: ListingSource + Sized> ListingSourceExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockListingSource;
    use std::time::Instant;

    #[tokio::test]
    async fn test_requests_are_spaced() {
        let source = MockListingSource::new().rate_limited(Duration::from_millis(100));
        let request = PageRequest::new("/r/x/new.json", "listing_new");

        let start = Instant::now();
        for _ in 0..3 {
            let _ = source.fetch_page(&request).await;
        }

        // first permit is immediate, the next two wait one period each
        assert!(
            start.elapsed() >= Duration::from_millis(180),
            "rate limiting not applied: {:?}",
            start.elapsed()
        );
        assert_eq!(source.inner().calls().len(), 3);
    }

    #[tokio::test]
    async fn test_threads_share_the_budget() {
        let source = MockListingSource::new().rate_limited(Duration::from_millis(100));
        let request = PageRequest::new("/r/x/new.json", "listing_new");

        let start = Instant::now();
        let _ = source.fetch_page(&request).await;
        let _ = source.fetch_thread("p1", "/r/x/comments/p1", 200).await;

        assert!(start.elapsed() >= Duration::from_millis(90));
    }

    #[tokio::test]
    async fn test_zero_period_disables_pacing() {
        let source = MockListingSource::new().rate_limited(Duration::ZERO);
        assert!(source.limiter.is_none());
        let _ = source
            .fetch_page(&PageRequest::new("/r/x/new.json", "listing_new"))
            .await;
    }
}
