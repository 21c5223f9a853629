//! Paginated collection: walk each query source page by page and persist
//! every item found.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::crawlers::catalog::{QuerySource, Tier};
use crate::error::{Result, SourceError};
use crate::retry::RetryPolicy;
use crate::traits::{source::ListingSource, store::CheckpointStore};
use crate::types::run::{RunCounts, RunId, RunStatus};

/// Run type recorded for collection runs.
pub const COLLECTION_RUN_TYPE: &str = "initial_collection";

/// Configuration for listing walks.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Items requested per page
    pub page_size: u32,

    /// Hard cap on pages per walk
    pub max_pages: u32,

    /// Applied to every page request
    pub retry: RetryPolicy,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages: 10,
            retry: RetryPolicy::listing(),
        }
    }
}

impl CrawlConfig {
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Why a walk ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEnd {
    /// The source returned no cursor
    Exhausted,
    /// A page came back with no items
    EmptyPage,
    /// `max_pages` reached
    PageCap,
    /// A page failed; the rest of the walk was abandoned
    Abandoned(String),
}

/// Result of walking one query source.
#[derive(Debug, Clone)]
pub struct WalkResult {
    pub pages_fetched: u32,
    pub items_fetched: usize,
    pub items_inserted: usize,
    pub end: WalkEnd,
}

impl WalkResult {
    pub fn is_failure(&self) -> bool {
        matches!(self.end, WalkEnd::Abandoned(_))
    }
}

/// Result of collecting one tier.
#[derive(Debug, Clone, Default)]
pub struct CollectResult {
    pub run_id: RunId,
    pub tier: u8,
    pub sources_walked: usize,
    pub sources_failed: usize,
    pub items_fetched: usize,
    pub items_inserted: usize,
}

/// Walks query sources against a listing source and writes items to the
/// checkpoint store.
pub struct Crawler {
    source: Arc<dyn ListingSource>,
    store: Arc<dyn CheckpointStore>,
    config: CrawlConfig,
}

impl Crawler {
    pub fn new(
        source: Arc<dyn ListingSource>,
        store: Arc<dyn CheckpointStore>,
        config: CrawlConfig,
    ) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    /// Walk one query source until the cursor runs out, a page is empty,
    /// `max_pages` is reached, or a page fails.
    ///
    /// Page failures end this walk only. Store failures abort.
    pub async fn walk(&self, query: &QuerySource) -> Result<WalkResult> {
        let label = query.describe();
        let mut request = query.first_page(self.config.page_size);
        let mut result = WalkResult {
            pages_fetched: 0,
            items_fetched: 0,
            items_inserted: 0,
            end: WalkEnd::PageCap,
        };

        while result.pages_fetched < self.config.max_pages {
            let source = &self.source;
            let current = &request;
            let fetched = self
                .config
                .retry
                .run(&label, |_| source.fetch_page(current))
                .await;

            let page = match fetched {
                Ok(page) => page,
                Err(e) => {
                    match &e {
                        SourceError::RateLimited { .. } => {
                            warn!(source = %label, page = result.pages_fetched + 1, "Still rate limited after retry, abandoning walk")
                        }
                        _ => {
                            warn!(source = %label, page = result.pages_fetched + 1, error = %e, "Page fetch failed, abandoning walk")
                        }
                    }
                    result.end = WalkEnd::Abandoned(e.to_string());
                    break;
                }
            };

            result.pages_fetched += 1;
            if page.items.is_empty() {
                result.end = WalkEnd::EmptyPage;
                break;
            }

            result.items_fetched += page.items.len();
            result.items_inserted += self.store.insert_items(&page.items).await?;
            debug!(
                source = %label,
                page = result.pages_fetched,
                items = page.items.len(),
                "Stored page"
            );

            match page.after {
                Some(after) => request = request.at(Some(after)),
                None => {
                    result.end = WalkEnd::Exhausted;
                    break;
                }
            }
        }

        info!(
            source = %label,
            pages = result.pages_fetched,
            fetched = result.items_fetched,
            new = result.items_inserted,
            end = ?result.end,
            "Walk finished"
        );
        Ok(result)
    }

    /// Collect every source of a tier as one run.
    pub async fn collect_tier(&self, tier: &Tier) -> Result<CollectResult> {
        let snapshot = json!({
            "tier": tier.number,
            "sources": tier.sources.len(),
            "page_size": self.config.page_size,
            "max_pages": self.config.max_pages,
        });
        let run_id = self
            .store
            .open_run(COLLECTION_RUN_TYPE, tier.name, &snapshot)
            .await?;

        info!(tier = tier.number, name = tier.name, sources = tier.sources.len(), run_id, "Collecting tier");

        let mut result = CollectResult {
            run_id,
            tier: tier.number,
            ..Default::default()
        };
        let mut last_error = None;

        for query in &tier.sources {
            let walk = self.walk(query).await?;
            result.sources_walked += 1;
            result.items_fetched += walk.items_fetched;
            result.items_inserted += walk.items_inserted;
            if let WalkEnd::Abandoned(error) = walk.end {
                result.sources_failed += 1;
                last_error = Some(format!("{}: {error}", query.describe()));
            }
        }

        let counts = RunCounts::new(
            result.items_fetched as u64,
            result.items_inserted as u64,
            result.sources_failed as u64,
        );
        self.store
            .close_run(run_id, counts, RunStatus::Completed, last_error.as_deref())
            .await?;

        info!(
            tier = tier.number,
            fetched = result.items_fetched,
            new = result.items_inserted,
            failed_sources = result.sources_failed,
            "Tier collected"
        );
        Ok(result)
    }

    /// Collect several tiers in order.
    pub async fn collect(&self, tiers: &[Tier]) -> Result<Vec<CollectResult>> {
        let mut results = Vec::with_capacity(tiers.len());
        for tier in tiers {
            results.push(self.collect_tier(tier).await?);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::testing::{page_of, MockListingSource, ScriptedError};
    use crate::traits::store::{ItemStore, RunLog};
    use std::time::Duration;

    fn fast_config() -> CrawlConfig {
        CrawlConfig::default()
            .with_retry(RetryPolicy::listing().with_rate_limit_delay(Duration::from_millis(1)))
    }

    fn crawler(source: MockListingSource, store: Arc<MemoryStore>, config: CrawlConfig) -> (Crawler, Arc<MockListingSource>) {
        let source = Arc::new(source);
        (Crawler::new(source.clone(), store, config), source)
    }

    #[tokio::test]
    async fn test_walk_follows_cursor_until_exhausted() {
        let path = "/r/Scams/new.json";
        let source = MockListingSource::new()
            .with_page(path, None, page_of(&["a", "b"], Some("c1")))
            .with_page(path, Some("c1"), page_of(&["c"], None));
        let store = Arc::new(MemoryStore::new());
        let (crawler, source) = crawler(source, store.clone(), fast_config());

        let result = crawler.walk(&QuerySource::listing("Scams", "new")).await.unwrap();

        assert_eq!(result.pages_fetched, 2);
        assert_eq!(result.items_inserted, 3);
        assert_eq!(result.end, WalkEnd::Exhausted);
        assert_eq!(source.calls().len(), 2);

        let item = store.get_item("c").await.unwrap().unwrap();
        assert_eq!(item.collection_source, "listing_new");
    }

    #[tokio::test]
    async fn test_walk_stops_at_page_cap() {
        let path = "/r/fraud/hot.json";
        let source = MockListingSource::new().with_endless_pages(path, 3);
        let store = Arc::new(MemoryStore::new());
        let (crawler, source) = crawler(source, store, fast_config().with_max_pages(4));

        let result = crawler.walk(&QuerySource::listing("fraud", "hot")).await.unwrap();

        assert_eq!(result.end, WalkEnd::PageCap);
        assert_eq!(result.pages_fetched, 4);
        assert_eq!(result.items_inserted, 12);
        assert_eq!(source.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_walk_stops_on_empty_page() {
        let path = "/r/fraud/new.json";
        let source = MockListingSource::new()
            .with_page(path, None, page_of(&["a"], Some("c1")))
            .with_page(path, Some("c1"), page_of(&[], Some("c2")));
        let store = Arc::new(MemoryStore::new());
        let (crawler, source) = crawler(source, store, fast_config());

        let result = crawler.walk(&QuerySource::listing("fraud", "new")).await.unwrap();

        assert_eq!(result.end, WalkEnd::EmptyPage);
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_http_error_ends_walk_without_retry() {
        let path = "/r/fraud/new.json";
        let source = MockListingSource::new().with_error(path, None, ScriptedError::Http(503));
        let store = Arc::new(MemoryStore::new());
        let (crawler, source) = crawler(source, store, fast_config());

        let result = crawler.walk(&QuerySource::listing("fraud", "new")).await.unwrap();

        assert!(result.is_failure());
        assert_eq!(source.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_single_rate_limit_is_retried() {
        let path = "/r/fraud/new.json";
        let source = MockListingSource::new()
            .with_error(path, None, ScriptedError::RateLimited)
            .with_page(path, None, page_of(&["a"], None));
        let store = Arc::new(MemoryStore::new());
        let (crawler, source) = crawler(source, store, fast_config());

        let result = crawler.walk(&QuerySource::listing("fraud", "new")).await.unwrap();

        assert_eq!(result.end, WalkEnd::Exhausted);
        assert_eq!(result.items_inserted, 1);
        assert_eq!(source.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_recollecting_inserts_nothing_new() {
        let path = "/r/fraud/new.json";
        let source = MockListingSource::new().with_endless_pages(path, 2);
        let store = Arc::new(MemoryStore::new());
        let (crawler, _) = crawler(source, store.clone(), fast_config().with_max_pages(2));
        let query = QuerySource::listing("fraud", "new");

        let first = crawler.walk(&query).await.unwrap();
        let second = crawler.walk(&query).await.unwrap();

        assert_eq!(first.items_inserted, 4);
        assert_eq!(second.items_fetched, 4);
        assert_eq!(second.items_inserted, 0);
    }

    #[tokio::test]
    async fn test_collect_tier_records_run() {
        let tier = Tier {
            number: 9,
            name: "tier9_test",
            sources: vec![
                QuerySource::listing("ok", "new"),
                QuerySource::listing("broken", "new"),
            ],
        };
        let source = MockListingSource::new()
            .with_page("/r/ok/new.json", None, page_of(&["a", "b"], None))
            .with_error("/r/broken/new.json", None, ScriptedError::Network);
        let store = Arc::new(MemoryStore::new());
        let (crawler, _) = crawler(source, store.clone(), fast_config());

        let result = crawler.collect_tier(&tier).await.unwrap();
        assert_eq!(result.sources_walked, 2);
        assert_eq!(result.sources_failed, 1);

        let run = store.get_run(result.run_id).await.unwrap().unwrap();
        assert_eq!(run.run_type, COLLECTION_RUN_TYPE);
        assert_eq!(run.phase, "tier9_test");
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.counts, RunCounts::new(2, 2, 1));
        assert!(run.completed_at.is_some());
        assert!(run.last_error.is_some());
    }
}
