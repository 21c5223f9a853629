//! Enrichment: fetch the top comments for every routed item.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use reddit_client::is_tombstone;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{Result, SourceResult};
use crate::traits::{source::ListingSource, store::CheckpointStore};
use crate::types::{
    comment::{rank_comments, Comment},
    item::{Item, Order, Stage},
    run::{RunCounts, RunId, RunStatus},
};

/// Run type recorded for enrichment runs.
pub const ENRICH_RUN_TYPE: &str = "enrich";

#[derive(Debug, Clone)]
pub struct EnrichConfig {
    /// Comments kept per item after ranking
    pub max_children: usize,

    /// Comments requested from the source per thread
    pub fetch_limit: u32,

    /// Pause after a failed fetch
    pub failure_backoff: Duration,

    /// Items read from the store per query
    pub batch_size: usize,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            max_children: 20,
            fetch_limit: 200,
            failure_backoff: Duration::from_secs(5),
            batch_size: 100,
        }
    }
}

impl EnrichConfig {
    pub fn with_max_children(mut self, max_children: usize) -> Self {
        self.max_children = max_children;
        self
    }

    pub fn with_failure_backoff(mut self, backoff: Duration) -> Self {
        self.failure_backoff = backoff;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct EnrichResult {
    pub run_id: RunId,
    /// Items marked enriched without a fetch
    pub childless: usize,
    /// Items whose thread was fetched and stored
    pub enriched: usize,
    pub failed: usize,
    pub comments_inserted: usize,
}

pub struct Enricher {
    source: Arc<dyn ListingSource>,
    store: Arc<dyn CheckpointStore>,
    config: EnrichConfig,
}

impl Enricher {
    pub fn new(
        source: Arc<dyn ListingSource>,
        store: Arc<dyn CheckpointStore>,
        config: EnrichConfig,
    ) -> Self {
        Self {
            source,
            store,
            config,
        }
    }

    /// One enrichment pass over every routed, unenriched item, highest
    /// score first. Failed items stay unenriched and are left for the
    /// next pass.
    pub async fn run(&self) -> Result<EnrichResult> {
        let snapshot = json!({
            "max_children": self.config.max_children,
            "fetch_limit": self.config.fetch_limit,
            "failure_backoff_secs": self.config.failure_backoff.as_secs_f64(),
        });
        let run_id = self
            .store
            .open_run(ENRICH_RUN_TYPE, "comment_fetch", &snapshot)
            .await?;

        let mut result = EnrichResult {
            run_id,
            childless: self.store.mark_childless_enriched().await?,
            ..Default::default()
        };
        info!(childless = result.childless, "Marked items without comments as enriched");

        // Failed fetches stay eligible; leave them for the next pass
        let mut failed: HashSet<String> = HashSet::new();
        let mut last_error = None;

        loop {
            let batch: Vec<Item> = self
                .store
                .items_for_stage(
                    Stage::AwaitingEnrichment,
                    self.config.batch_size + failed.len(),
                    Order::ScoreDesc,
                )
                .await?
                .into_iter()
                .filter(|item| !failed.contains(&item.post_id))
                .take(self.config.batch_size)
                .collect();
            if batch.is_empty() {
                break;
            }

            for item in batch {
                match self.fetch_children(&item).await {
                    Ok(comments) => {
                        result.comments_inserted += self.store.insert_comments(&comments).await?;
                        self.store.mark_enriched(&item.post_id).await?;
                        result.enriched += 1;
                        debug!(post_id = %item.post_id, comments = comments.len(), "Enriched");
                    }
                    Err(e) => {
                        warn!(post_id = %item.post_id, error = %e, "Comment fetch failed, will retry next pass");
                        last_error = Some(format!("{}: {e}", item.post_id));
                        result.failed += 1;
                        failed.insert(item.post_id.clone());
                        if !self.config.failure_backoff.is_zero() {
                            tokio::time::sleep(self.config.failure_backoff).await;
                        }
                    }
                }
            }

            info!(
                enriched = result.enriched,
                failed = result.failed,
                comments = result.comments_inserted,
                "Enrichment progress"
            );
        }

        let processed = result.enriched + result.failed;
        self.store
            .close_run(
                run_id,
                RunCounts::new(processed as u64, result.enriched as u64, result.failed as u64),
                RunStatus::Completed,
                last_error.as_deref(),
            )
            .await?;

        info!(
            run_id,
            childless = result.childless,
            enriched = result.enriched,
            failed = result.failed,
            "Enrichment complete"
        );
        Ok(result)
    }

    /// Fetch, clean and rank an item's comments. An empty list is a
    /// successful fetch of a thread with no live comments.
    pub async fn fetch_children(&self, item: &Item) -> SourceResult<Vec<Comment>> {
        let mut comments: Vec<Comment> = self
            .source
            .fetch_thread(&item.post_id, &item.thread_path(), self.config.fetch_limit)
            .await?
            .into_iter()
            .filter(|c| !is_tombstone(&c.body))
            .collect();

        rank_comments(&mut comments);
        comments.truncate(self.config.max_children);
        Ok(comments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::testing::{CountingStore, MockListingSource, ScriptedError, SourceCall};
    use crate::traits::store::{ChildStore, ItemStore, RunLog};
    use crate::types::item::RouteDecision;

    fn fast_config() -> EnrichConfig {
        EnrichConfig::default().with_failure_backoff(Duration::from_millis(1))
    }

    async fn routed(store: &MemoryStore, item: Item) {
        let id = item.post_id.clone();
        store.insert_item(&item).await.unwrap();
        store
            .set_route(&id, &RouteDecision::new(true, false, 0.9))
            .await
            .unwrap();
    }

    fn enricher(source: MockListingSource, store: Arc<MemoryStore>, config: EnrichConfig) -> (Enricher, Arc<MockListingSource>) {
        let source = Arc::new(source);
        (Enricher::new(source.clone(), store, config), source)
    }

    #[tokio::test]
    async fn test_ranks_filters_and_caps_children() {
        let store = Arc::new(MemoryStore::new());
        routed(&store, Item::new("p1", "t", "b").with_num_comments(5).with_subreddit("Scams")).await;

        let source = MockListingSource::new().with_thread(
            "p1",
            vec![
                Comment::new("c1", "p1", "first", 40),
                Comment::new("c2", "p1", "[removed]", 99),
                Comment::new("c3", "p1", "op update", 1).by_submitter(),
                Comment::new("c4", "p1", "meh", 3),
            ],
        );
        let (enricher, source) = enricher(source, store.clone(), fast_config().with_max_children(2));

        let result = enricher.run().await.unwrap();
        assert_eq!(result.enriched, 1);
        assert_eq!(result.comments_inserted, 2);

        let stored = store.top_comments("p1", 10).await.unwrap();
        let ids: Vec<_> = stored.iter().map(|c| c.comment_id.as_str()).collect();
        assert_eq!(ids, vec!["c3", "c1"]);

        match &source.calls()[0] {
            SourceCall::Thread { permalink, .. } => assert_eq!(permalink, "/r/Scams/comments/p1"),
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_fetch_differs_from_empty_thread() {
        let store = Arc::new(MemoryStore::new());
        routed(&store, Item::new("empty", "t", "b").with_num_comments(4)).await;
        routed(&store, Item::new("broken", "t", "b").with_num_comments(4)).await;

        let source = MockListingSource::new()
            .with_thread("empty", vec![])
            .with_thread_error("broken", ScriptedError::Http(500));
        let (enricher, source) = enricher(source, store.clone(), fast_config());

        let result = enricher.run().await.unwrap();
        assert_eq!(result.enriched, 1);
        assert_eq!(result.failed, 1);

        assert!(store.get_item("empty").await.unwrap().unwrap().enriched);
        assert!(!store.get_item("broken").await.unwrap().unwrap().enriched);

        // one attempt per item within a pass
        assert_eq!(source.thread_calls().len(), 2);

        let run = store.get_run(result.run_id).await.unwrap().unwrap();
        assert_eq!(run.counts, RunCounts::new(2, 1, 1));
        assert!(run.last_error.unwrap().starts_with("broken"));
    }

    #[tokio::test]
    async fn test_childless_items_skip_the_network() {
        let store = Arc::new(MemoryStore::new());
        routed(&store, Item::new("quiet", "t", "b").with_num_comments(0)).await;
        store.insert_item(&Item::new("unrouted", "t", "b").with_num_comments(3)).await.unwrap();

        let (enricher, source) = enricher(MockListingSource::new(), store.clone(), fast_config());

        let result = enricher.run().await.unwrap();
        assert_eq!(result.childless, 1);
        assert_eq!(result.enriched, 0);
        assert!(source.calls().is_empty());
        assert!(!store.get_item("unrouted").await.unwrap().unwrap().enriched);
    }

    #[tokio::test]
    async fn test_highest_score_fetched_first() {
        let store = Arc::new(MemoryStore::new());
        routed(&store, Item::new("low", "t", "b").with_num_comments(1).with_score(2)).await;
        routed(&store, Item::new("high", "t", "b").with_num_comments(1).with_score(500)).await;

        let (enricher, source) = enricher(MockListingSource::new(), store, fast_config());
        enricher.run().await.unwrap();

        assert_eq!(source.thread_calls(), vec!["high", "low"]);
    }

    #[tokio::test]
    async fn test_only_failed_items_widen_the_window() {
        let memory = Arc::new(MemoryStore::new());
        for i in 0..300 {
            routed(&memory, Item::new(format!("p{i:04}"), "t", "b").with_num_comments(2)).await;
        }
        let source = Arc::new(
            MockListingSource::new()
                .with_thread_error("p0000", ScriptedError::Network)
                .with_thread_error("p0001", ScriptedError::Http(503)),
        );
        let store = Arc::new(CountingStore::new(memory.clone()));
        let enricher = Enricher::new(
            source.clone(),
            store.clone(),
            fast_config().with_batch_size(50),
        );

        let result = enricher.run().await.unwrap();
        assert_eq!(result.enriched, 298);
        assert_eq!(result.failed, 2);
        assert_eq!(source.thread_calls().len(), 300);

        // every read after the first also returns the two failed items
        assert_eq!(store.rows_read(), 300 + 6 * 2);
        assert_eq!(store.queries(), 7);
    }
}
