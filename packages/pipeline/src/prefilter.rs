//! Local pre-filter: terminally exclude items that cannot be classified
//! before any remote call is spent on them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use reddit_client::is_tombstone;
use serde_json::json;
use tracing::info;

use crate::error::Result;
use crate::traits::store::CheckpointStore;
use crate::types::{
    item::{Item, Order, Stage},
    run::{RunCounts, RunStatus},
};

/// Why an item was filtered out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FilterReason {
    /// Title and body both empty or tombstoned
    DeletedContent,
    /// Score below the floor
    NegativeScore,
    /// No body and a title too short to classify
    NoTextContent,
}

impl FilterReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterReason::DeletedContent => "deleted_content",
            FilterReason::NegativeScore => "negative_score",
            FilterReason::NoTextContent => "no_text_content",
        }
    }
}

impl fmt::Display for FilterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct PrefilterConfig {
    /// Items scoring below this are dropped
    pub score_floor: i64,

    /// Minimum title length (characters) for items without a body
    pub min_title_len: usize,
}

impl Default for PrefilterConfig {
    fn default() -> Self {
        Self {
            score_floor: 0,
            min_title_len: 30,
        }
    }
}

impl PrefilterConfig {
    pub fn with_score_floor(mut self, score_floor: i64) -> Self {
        self.score_floor = score_floor;
        self
    }

    pub fn with_min_title_len(mut self, min_title_len: usize) -> Self {
        self.min_title_len = min_title_len;
        self
    }
}

fn is_blank(text: &str) -> bool {
    text.trim().is_empty() || is_tombstone(text)
}

/// Decide whether `item` should be filtered. Rules are checked in order
/// and the first match wins.
pub fn filter_reason(item: &Item, config: &PrefilterConfig) -> Option<FilterReason> {
    let title = item.title.trim();
    let body_blank = is_blank(&item.body);

    if is_blank(title) && body_blank {
        return Some(FilterReason::DeletedContent);
    }
    if item.score < config.score_floor {
        return Some(FilterReason::NegativeScore);
    }
    if body_blank && title.chars().count() < config.min_title_len {
        return Some(FilterReason::NoTextContent);
    }
    None
}

/// Result of a pre-filter pass.
#[derive(Debug, Clone, Default)]
pub struct PrefilterResult {
    pub checked: usize,
    pub filtered: usize,
    pub by_reason: BTreeMap<FilterReason, usize>,
}

/// Run the pre-filter over every unrouted item.
pub async fn run_prefilter(
    store: &Arc<dyn CheckpointStore>,
    config: &PrefilterConfig,
) -> Result<PrefilterResult> {
    let snapshot = json!({
        "score_floor": config.score_floor,
        "min_title_len": config.min_title_len,
    });
    let run_id = store.open_run("prefilter", "prefilter", &snapshot).await?;

    let pending = store.count_for_stage(Stage::Unrouted).await? as usize;
    let items = store
        .items_for_stage(Stage::Unrouted, pending, Order::Key)
        .await?;

    let mut result = PrefilterResult {
        checked: items.len(),
        ..Default::default()
    };
    let mut to_skip = Vec::new();
    for item in &items {
        if let Some(reason) = filter_reason(item, config) {
            *result.by_reason.entry(reason).or_insert(0) += 1;
            to_skip.push(item.post_id.clone());
        }
    }

    if !to_skip.is_empty() {
        result.filtered = store.mark_prefiltered(&to_skip).await?;
    }

    info!(
        checked = result.checked,
        filtered = result.filtered,
        "Pre-filter complete"
    );
    for (reason, count) in &result.by_reason {
        info!(reason = %reason, count, "Filtered");
    }

    store
        .close_run(
            run_id,
            RunCounts::new(
                result.checked as u64,
                (result.checked - result.filtered) as u64,
                result.filtered as u64,
            ),
            RunStatus::Completed,
            None,
        )
        .await?;

    Ok(result)
}
