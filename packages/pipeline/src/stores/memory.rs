//! In-memory checkpoint store for tests and dry runs.

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{PipelineError, Result};
use crate::traits::store::{ChildStore, ClassificationStore, ItemStore, RunLog};
use crate::types::{
    classification::{ClassificationRecord, Track},
    comment::{rank_comments, Comment},
    item::{InsertOutcome, Item, Order, RouteDecision, Stage},
    run::{PipelineStats, Run, RunCounts, RunId, RunStatus},
};

#[derive(Default)]
struct State {
    items: HashMap<String, Item>,
    comments: HashMap<String, Comment>,
    records: HashMap<(String, Track), ClassificationRecord>,
    failures: HashMap<(String, Track), u32>,
    runs: Vec<Run>,
}

impl State {
    fn in_stage(&self, item: &Item, stage: Stage) -> bool {
        match stage {
            Stage::Unrouted => !item.prefiltered && item.route.is_none(),
            Stage::AwaitingEnrichment => item.has_active_route() && !item.enriched,
            Stage::ReadyFor {
                track,
                max_attempts,
            } => {
                let key = (item.post_id.clone(), track);
                item.routed_to(track)
                    && item.enriched
                    && !self.records.contains_key(&key)
                    && self.failures.get(&key).copied().unwrap_or(0) < max_attempts
            }
        }
    }

    fn classified(&self, track: Track) -> u64 {
        self.records.keys().filter(|(_, t)| *t == track).count() as u64
    }

    /// (ready, unclassifiable) among routed, enriched, unclassified items.
    fn pending(&self, track: Track, max_attempts: u32) -> (u64, u64) {
        let ready = Stage::ReadyFor {
            track,
            max_attempts,
        };
        self.items
            .values()
            .filter(|i| {
                i.routed_to(track)
                    && i.enriched
                    && !self.records.contains_key(&(i.post_id.clone(), track))
            })
            .fold((0, 0), |(ready_n, stuck_n), i| {
                if self.in_stage(i, ready) {
                    (ready_n + 1, stuck_n)
                } else {
                    (ready_n, stuck_n + 1)
                }
            })
    }
}

/// In-memory storage for items, comments, records, and runs.
///
/// Not suitable for production as data is lost on exit.
pub struct MemoryStore {
    state: RwLock<State>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    pub fn item_count(&self) -> usize {
        self.read().map(|s| s.items.len()).unwrap_or(0)
    }

    pub fn comment_count(&self) -> usize {
        self.read().map(|s| s.comments.len()).unwrap_or(0)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| PipelineError::storage("memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| PipelineError::storage("memory store lock poisoned"))
    }
}

#[async_trait]
impl ItemStore for MemoryStore {
    async fn insert_item(&self, item: &Item) -> Result<InsertOutcome> {
        let mut state = self.write()?;
        if state.items.contains_key(&item.post_id) {
            return Ok(InsertOutcome::Duplicate);
        }
        state.items.insert(item.post_id.clone(), item.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get_item(&self, post_id: &str) -> Result<Option<Item>> {
        Ok(self.read()?.items.get(post_id).cloned())
    }

    async fn items_for_stage(&self, stage: Stage, limit: usize, order: Order) -> Result<Vec<Item>> {
        let state = self.read()?;
        let mut items: Vec<Item> = state
            .items
            .values()
            .filter(|item| state.in_stage(item, stage))
            .cloned()
            .collect();

        match order {
            Order::Key => items.sort_by(|a, b| a.post_id.cmp(&b.post_id)),
            Order::ScoreDesc => {
                items.sort_by(|a, b| b.score.cmp(&a.score).then(a.post_id.cmp(&b.post_id)))
            }
            Order::Random => items.shuffle(&mut rand::thread_rng()),
        }
        items.truncate(limit);
        Ok(items)
    }

    async fn count_for_stage(&self, stage: Stage) -> Result<u64> {
        let state = self.read()?;
        Ok(state
            .items
            .values()
            .filter(|item| state.in_stage(item, stage))
            .count() as u64)
    }

    async fn mark_prefiltered(&self, post_ids: &[String]) -> Result<usize> {
        let mut state = self.write()?;
        let mut changed = 0;
        for post_id in post_ids {
            if let Some(item) = state.items.get_mut(post_id) {
                if !item.prefiltered {
                    item.prefiltered = true;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn set_route(&self, post_id: &str, decision: &RouteDecision) -> Result<bool> {
        let mut state = self.write()?;
        match state.items.get_mut(post_id) {
            Some(item) if item.route.is_none() => {
                item.route = Some(decision.clone());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(PipelineError::ItemNotFound {
                post_id: post_id.to_string(),
            }),
        }
    }

    async fn mark_enriched(&self, post_id: &str) -> Result<bool> {
        let mut state = self.write()?;
        match state.items.get_mut(post_id) {
            Some(item) if !item.enriched => {
                item.enriched = true;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(PipelineError::ItemNotFound {
                post_id: post_id.to_string(),
            }),
        }
    }

    async fn mark_childless_enriched(&self) -> Result<usize> {
        let mut state = self.write()?;
        let mut changed = 0;
        for item in state.items.values_mut() {
            if item.has_active_route() && !item.enriched && item.num_comments == 0 {
                item.enriched = true;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn stats(&self, max_item_attempts: u32) -> Result<PipelineStats> {
        let state = self.read()?;
        let (fraud_ready, fraud_unclassifiable) = state.pending(Track::Fraud, max_item_attempts);
        let (idv_ready, idv_unclassifiable) = state.pending(Track::Idv, max_item_attempts);
        let mut stats = PipelineStats {
            total: state.items.len() as u64,
            comments: state.comments.len() as u64,
            fraud_classified: state.classified(Track::Fraud),
            idv_classified: state.classified(Track::Idv),
            fraud_ready,
            idv_ready,
            fraud_unclassifiable,
            idv_unclassifiable,
            ..Default::default()
        };

        for item in state.items.values() {
            if item.prefiltered {
                stats.prefiltered += 1;
            }
            if item.enriched {
                stats.enriched += 1;
            }
            match &item.route {
                None if !item.prefiltered => stats.unrouted += 1,
                None => {}
                Some(route) => {
                    stats.routed += 1;
                    if route.is_error() {
                        stats.route_errors += 1;
                        continue;
                    }
                    let fraud = route.fraud == Some(true);
                    let idv = route.idv == Some(true);
                    stats.fraud += fraud as u64;
                    stats.idv += idv as u64;
                    stats.both += (fraud && idv) as u64;
                    stats.neither += (!fraud && !idv) as u64;
                }
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl ChildStore for MemoryStore {
    async fn insert_comments(&self, comments: &[Comment]) -> Result<usize> {
        let mut state = self.write()?;
        let mut inserted = 0;
        for comment in comments {
            if !state.comments.contains_key(&comment.comment_id) {
                state
                    .comments
                    .insert(comment.comment_id.clone(), comment.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn top_comments(&self, post_id: &str, limit: usize) -> Result<Vec<Comment>> {
        let state = self.read()?;
        let mut comments: Vec<Comment> = state
            .comments
            .values()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect();
        comments.sort_by(|a, b| a.comment_id.cmp(&b.comment_id));
        rank_comments(&mut comments);
        comments.truncate(limit);
        Ok(comments)
    }
}

#[async_trait]
impl ClassificationStore for MemoryStore {
    async fn upsert_classification(&self, record: &ClassificationRecord) -> Result<()> {
        self.write()?
            .records
            .insert((record.post_id.clone(), record.track), record.clone());
        Ok(())
    }

    async fn get_classification(
        &self,
        post_id: &str,
        track: Track,
    ) -> Result<Option<ClassificationRecord>> {
        Ok(self
            .read()?
            .records
            .get(&(post_id.to_string(), track))
            .cloned())
    }

    async fn record_classification_failure(
        &self,
        post_id: &str,
        track: Track,
        _error: &str,
    ) -> Result<u32> {
        let mut state = self.write()?;
        let attempts = state
            .failures
            .entry((post_id.to_string(), track))
            .or_insert(0);
        *attempts += 1;
        Ok(*attempts)
    }

    async fn classification_failures(&self, post_id: &str, track: Track) -> Result<u32> {
        Ok(self
            .read()?
            .failures
            .get(&(post_id.to_string(), track))
            .copied()
            .unwrap_or(0))
    }
}

#[async_trait]
impl RunLog for MemoryStore {
    async fn open_run(
        &self,
        run_type: &str,
        phase: &str,
        config: &serde_json::Value,
    ) -> Result<RunId> {
        let mut state = self.write()?;
        let run_id = state.runs.len() as RunId + 1;
        state.runs.push(Run {
            run_id,
            run_type: run_type.to_string(),
            phase: phase.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Running,
            counts: RunCounts::default(),
            last_error: None,
            config_snapshot: config.clone(),
        });
        Ok(run_id)
    }

    async fn close_run(
        &self,
        run_id: RunId,
        counts: RunCounts,
        status: RunStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        let mut state = self.write()?;
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.run_id == run_id)
            .ok_or_else(|| PipelineError::storage(format!("unknown run {run_id}")))?;
        run.completed_at = Some(Utc::now());
        run.counts = counts;
        run.status = status;
        run.last_error = last_error.map(String::from);
        Ok(())
    }

    async fn get_run(&self, run_id: RunId) -> Result<Option<Run>> {
        Ok(self
            .read()?
            .runs
            .iter()
            .find(|r| r.run_id == run_id)
            .cloned())
    }
}
