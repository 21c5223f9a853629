//! Storage traits for the checkpoint store.
//!
//! The store is split into focused traits:
//! - `ItemStore`: items and their monotonic stage flags
//! - `ChildStore`: comments looked up by parent key
//! - `ClassificationStore`: per-track records and failure counts
//! - `RunLog`: phase audit records
//! - `CheckpointStore`: composite trait combining all four
//!
//! Every state change is "select items whose flags are X, write flags Y"
//! with Y never undoing X, so any phase can be re-run from scratch.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    classification::{ClassificationRecord, Track},
    comment::Comment,
    item::{InsertOutcome, Item, Order, RouteDecision, Stage},
    run::{PipelineStats, Run, RunCounts, RunId, RunStatus},
};

/// Items and their stage flags.
#[async_trait]
pub trait ItemStore: Send + Sync {
    /// Insert an item unless its key already exists. Existing rows are
    /// never modified.
    async fn insert_item(&self, item: &Item) -> Result<InsertOutcome>;

    /// Insert many items; returns how many were new.
    async fn insert_items(&self, items: &[Item]) -> Result<usize> {
        let mut inserted = 0;
        for item in items {
            if self.insert_item(item).await? == InsertOutcome::Inserted {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn get_item(&self, post_id: &str) -> Result<Option<Item>>;

    /// Items in the given checkpoint state, at most `limit`.
    async fn items_for_stage(&self, stage: Stage, limit: usize, order: Order) -> Result<Vec<Item>>;

    async fn count_for_stage(&self, stage: Stage) -> Result<u64>;

    /// Set the pre-filter flag on the given keys. Returns rows changed.
    async fn mark_prefiltered(&self, post_ids: &[String]) -> Result<usize>;

    /// Record a Stage-1 decision. First write wins: returns `false` and
    /// leaves the row alone if the item was already routed.
    async fn set_route(&self, post_id: &str, decision: &RouteDecision) -> Result<bool>;

    /// Set the enrichment flag. Returns `false` if it was already set.
    async fn mark_enriched(&self, post_id: &str) -> Result<bool>;

    /// Mark routed, unenriched items that report zero children as enriched.
    async fn mark_childless_enriched(&self) -> Result<usize>;

    /// Checkpoint totals. Items with `max_item_attempts` recorded failures
    /// on a track count as unclassifiable there, not ready.
    async fn stats(&self, max_item_attempts: u32) -> Result<PipelineStats>;
}

/// Comments attached to items.
#[async_trait]
pub trait ChildStore: Send + Sync {
    /// Insert comments, skipping existing keys. Returns how many were new.
    async fn insert_comments(&self, comments: &[Comment]) -> Result<usize>;

    /// Comments for an item, submitter's first, then by score.
    async fn top_comments(&self, post_id: &str, limit: usize) -> Result<Vec<Comment>>;
}

/// Stage-2 records and failed-attempt bookkeeping.
#[async_trait]
pub trait ClassificationStore: Send + Sync {
    /// Insert or replace the record for (`post_id`, `track`).
    async fn upsert_classification(&self, record: &ClassificationRecord) -> Result<()>;

    async fn get_classification(
        &self,
        post_id: &str,
        track: Track,
    ) -> Result<Option<ClassificationRecord>>;

    /// Count one more failed classification for (`post_id`, `track`) and
    /// return the new total.
    async fn record_classification_failure(
        &self,
        post_id: &str,
        track: Track,
        error: &str,
    ) -> Result<u32>;

    async fn classification_failures(&self, post_id: &str, track: Track) -> Result<u32>;
}

/// Phase audit log.
#[async_trait]
pub trait RunLog: Send + Sync {
    /// Open a run before the phase's first unit of work.
    async fn open_run(
        &self,
        run_type: &str,
        phase: &str,
        config: &serde_json::Value,
    ) -> Result<RunId>;

    /// Close a run after the phase's last unit of work.
    async fn close_run(
        &self,
        run_id: RunId,
        counts: RunCounts,
        status: RunStatus,
        last_error: Option<&str>,
    ) -> Result<()>;

    async fn get_run(&self, run_id: RunId) -> Result<Option<Run>>;
}

/// Composite storage trait used by every phase.
pub trait CheckpointStore: ItemStore + ChildStore + ClassificationStore + RunLog {}

// Blanket implementation: anything implementing all four traits is a CheckpointStore
impl<T: ItemStore + ChildStore + ClassificationStore + RunLog> CheckpointStore for T {}
