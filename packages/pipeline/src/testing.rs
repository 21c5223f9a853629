//! Testing utilities including mock implementations.
//!
//! These let the pipeline phases run without real listing or completion
//! calls. Both mocks record every call for assertions. [`CountingStore`]
//! wraps any store and counts the rows each stage query hands back.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use llm_client::{CompletionOptions, LlmError};

use crate::error::{Result as StoreResult, SourceError, SourceResult};
use crate::traits::{
    completion::Completion,
    source::{ListingPage, ListingSource, PageRequest},
    store::{CheckpointStore, ChildStore, ClassificationStore, ItemStore, RunLog},
};
use crate::types::{
    classification::{ClassificationRecord, Track},
    comment::Comment,
    item::{InsertOutcome, Item, Order, RouteDecision, Stage},
    run::{PipelineStats, Run, RunCounts, RunId, RunStatus},
};

/// Failure a mock can be scripted to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedError {
    RateLimited,
    Http(u16),
    Network,
    Timeout,
    Parse,
}

impl ScriptedError {
    fn source_error(self) -> SourceError {
        match self {
            ScriptedError::RateLimited => SourceError::RateLimited { retry_after: None },
            ScriptedError::Http(status) => SourceError::Http {
                status,
                body: "scripted".into(),
            },
            ScriptedError::Network => SourceError::Network("scripted".into()),
            ScriptedError::Timeout => SourceError::Timeout,
            ScriptedError::Parse => SourceError::Parse("scripted".into()),
        }
    }

    fn llm_error(self) -> LlmError {
        match self {
            ScriptedError::RateLimited => LlmError::RateLimited { retry_after: None },
            ScriptedError::Http(status) => LlmError::Status {
                status,
                body: "scripted".into(),
            },
            ScriptedError::Network => LlmError::Network("scripted".into()),
            ScriptedError::Timeout => LlmError::Timeout(Duration::from_secs(30)),
            ScriptedError::Parse => LlmError::Parse("scripted".into()),
        }
    }
}

/// Scripted responses for one key. The last response repeats once the
/// queue is down to it.
#[derive(Debug, Clone)]
struct Script<T> {
    queue: VecDeque<Result<T, ScriptedError>>,
}

impl<T: Clone> Script<T> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    fn push(&mut self, reply: Result<T, ScriptedError>) {
        self.queue.push_back(reply);
    }

    fn next(&mut self) -> Option<Result<T, ScriptedError>> {
        if self.queue.len() > 1 {
            self.queue.pop_front()
        } else {
            self.queue.front().cloned()
        }
    }
}

/// Build a page of bare items with the given ids.
pub fn page_of(ids: &[&str], after: Option<&str>) -> ListingPage {
    ListingPage {
        items: ids
            .iter()
            .map(|id| Item::new(*id, format!("Post {id}"), format!("Body of {id}")))
            .collect(),
        after: after.map(String::from),
    }
}

// ============================================================================
// Listing source
// ============================================================================

/// A mock listing source.
///
/// Pages are scripted per (path, cursor); unscripted requests get an empty
/// page. Threads are scripted per item key; unscripted threads are empty.
#[derive(Default)]
pub struct MockListingSource {
    pages: Arc<RwLock<HashMap<(String, Option<String>), Script<ListingPage>>>>,

    /// Paths that serve an unbounded chain of pages of this size
    endless: Arc<RwLock<HashMap<String, usize>>>,

    threads: Arc<RwLock<HashMap<String, Script<Vec<Comment>>>>>,

    calls: Arc<RwLock<Vec<SourceCall>>>,
}

/// Record of a call made to the mock listing source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceCall {
    Page { path: String, after: Option<String> },
    Thread { post_id: String, permalink: String },
}

impl MockListingSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `page` for `path` at cursor `after`.
    pub fn with_page(self, path: &str, after: Option<&str>, page: ListingPage) -> Self {
        self.script_page(path, after, Ok(page));
        self
    }

    /// Fail the request for `path` at cursor `after`.
    pub fn with_error(self, path: &str, after: Option<&str>, error: ScriptedError) -> Self {
        self.script_page(path, after, Err(error));
        self
    }

    /// Serve an endless chain of pages for `path`. Page `n` holds items
    /// `e{n}_0 .. e{n}_{per_page - 1}` and points at cursor `p{n + 1}`.
    pub fn with_endless_pages(self, path: &str, per_page: usize) -> Self {
        self.endless.write().unwrap().insert(path.to_string(), per_page);
        self
    }

    pub fn with_thread(self, post_id: &str, comments: Vec<Comment>) -> Self {
        self.script_thread(post_id, Ok(comments));
        self
    }

    pub fn with_thread_error(self, post_id: &str, error: ScriptedError) -> Self {
        self.script_thread(post_id, Err(error));
        self
    }

    pub fn calls(&self) -> Vec<SourceCall> {
        self.calls.read().unwrap().clone()
    }

    /// Page requests made for `path`, in order.
    pub fn page_calls(&self, path: &str) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SourceCall::Page { path: p, after } if p == path => Some(after),
                _ => None,
            })
            .collect()
    }

    pub fn thread_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                SourceCall::Thread { post_id, .. } => Some(post_id),
                _ => None,
            })
            .collect()
    }

    fn script_page(&self, path: &str, after: Option<&str>, reply: Result<ListingPage, ScriptedError>) {
        self.pages
            .write()
            .unwrap()
            .entry((path.to_string(), after.map(String::from)))
            .or_insert_with(Script::new)
            .push(reply);
    }

    fn script_thread(&self, post_id: &str, reply: Result<Vec<Comment>, ScriptedError>) {
        self.threads
            .write()
            .unwrap()
            .entry(post_id.to_string())
            .or_insert_with(Script::new)
            .push(reply);
    }

    fn endless_page(&self, path: &str, after: Option<&str>) -> Option<ListingPage> {
        let per_page = *self.endless.read().unwrap().get(path)?;
        let n: usize = after
            .and_then(|cursor| cursor.strip_prefix('p'))
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        let ids: Vec<String> = (0..per_page).map(|i| format!("e{n}_{i}")).collect();
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        let next = format!("p{}", n + 1);
        Some(page_of(&ids, Some(&next)))
    }
}

#[async_trait]
impl ListingSource for MockListingSource {
    async fn fetch_page(&self, request: &PageRequest) -> SourceResult<ListingPage> {
        self.calls.write().unwrap().push(SourceCall::Page {
            path: request.path.clone(),
            after: request.after.clone(),
        });

        let scripted = self
            .pages
            .write()
            .unwrap()
            .get_mut(&(request.path.clone(), request.after.clone()))
            .and_then(Script::next);

        let mut page = match scripted {
            Some(Ok(page)) => page,
            Some(Err(error)) => return Err(error.source_error()),
            None => self
                .endless_page(&request.path, request.after.as_deref())
                .unwrap_or_default(),
        };

        for item in &mut page.items {
            item.collection_source = request.collection_source.clone();
            item.search_query = request.search_query.clone();
        }
        Ok(page)
    }

    async fn fetch_thread(
        &self,
        post_id: &str,
        permalink: &str,
        limit: u32,
    ) -> SourceResult<Vec<Comment>> {
        self.calls.write().unwrap().push(SourceCall::Thread {
            post_id: post_id.to_string(),
            permalink: permalink.to_string(),
        });

        let scripted = self
            .threads
            .write()
            .unwrap()
            .get_mut(post_id)
            .and_then(Script::next);

        match scripted {
            Some(Ok(mut comments)) => {
                comments.truncate(limit as usize);
                Ok(comments)
            }
            Some(Err(error)) => Err(error.source_error()),
            None => Ok(Vec::new()),
        }
    }
}

// ============================================================================
// Completion
// ============================================================================

/// A mock completion service.
///
/// Replies are scripted per needle: the first needle found in the user
/// prompt picks the script. Prompts matching no needle get the default
/// reply, or an empty-body error when there is none.
#[derive(Default)]
pub struct MockCompletion {
    scripts: Arc<RwLock<Vec<(String, Script<String>)>>>,
    default_reply: Arc<RwLock<Option<String>>>,
    calls: Arc<RwLock<Vec<CompletionCall>>>,
}

/// Record of a call made to the mock completion service.
#[derive(Debug, Clone)]
pub struct CompletionCall {
    pub system: String,
    pub user: String,
    pub model: String,
    pub strict_schema: Option<String>,
    pub json_object: bool,
    pub reasoning_effort: Option<String>,
}

impl MockCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply used when no needle matches.
    pub fn with_default(self, reply: impl Into<String>) -> Self {
        *self.default_reply.write().unwrap() = Some(reply.into());
        self
    }

    /// Queue a reply for prompts containing `needle`.
    pub fn with_reply(self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.script(needle.into(), Ok(reply.into()));
        self
    }

    /// Queue a failure for prompts containing `needle`.
    pub fn with_error(self, needle: impl Into<String>, error: ScriptedError) -> Self {
        self.script(needle.into(), Err(error));
        self
    }

    pub fn calls(&self) -> Vec<CompletionCall> {
        self.calls.read().unwrap().clone()
    }

    /// Number of calls whose user prompt contains `needle`.
    pub fn calls_matching(&self, needle: &str) -> usize {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.user.contains(needle))
            .count()
    }

    fn script(&self, needle: String, reply: Result<String, ScriptedError>) {
        let mut scripts = self.scripts.write().unwrap();
        match scripts.iter_mut().find(|(n, _)| *n == needle) {
            Some((_, script)) => script.push(reply),
            None => {
                let mut script = Script::new();
                script.push(reply);
                scripts.push((needle, script));
            }
        }
    }
}

#[async_trait]
impl Completion for MockCompletion {
    async fn complete(
        &self,
        system: &str,
        user: &str,
        options: &CompletionOptions,
    ) -> Result<String, LlmError> {
        self.calls.write().unwrap().push(CompletionCall {
            system: system.to_string(),
            user: user.to_string(),
            model: options.model.clone(),
            strict_schema: options.json_schema.as_ref().map(|s| s.name.clone()),
            json_object: options.json_object,
            reasoning_effort: options.reasoning_effort.clone(),
        });

        let scripted = self
            .scripts
            .write()
            .unwrap()
            .iter_mut()
            .find(|(needle, _)| user.contains(needle.as_str()))
            .and_then(|(_, script)| script.next());

        match scripted {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(error)) => Err(error.llm_error()),
            None => self
                .default_reply
                .read()
                .unwrap()
                .clone()
                .ok_or(LlmError::EmptyBody),
        }
    }
}

// ============================================================================
// Counting store
// ============================================================================

/// Store wrapper that counts rows returned by `items_for_stage`.
pub struct CountingStore {
    inner: Arc<dyn CheckpointStore>,
    rows_read: AtomicUsize,
    queries: AtomicUsize,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn CheckpointStore>) -> Self {
        Self {
            inner,
            rows_read: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
        }
    }

    /// Rows returned by stage queries so far.
    pub fn rows_read(&self) -> usize {
        self.rows_read.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ItemStore for CountingStore {
    async fn insert_item(&self, item: &Item) -> StoreResult<InsertOutcome> {
        self.inner.insert_item(item).await
    }

    async fn get_item(&self, post_id: &str) -> StoreResult<Option<Item>> {
        self.inner.get_item(post_id).await
    }

    async fn items_for_stage(&self, stage: Stage, limit: usize, order: Order) -> StoreResult<Vec<Item>> {
        let items = self.inner.items_for_stage(stage, limit, order).await?;
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.rows_read.fetch_add(items.len(), Ordering::SeqCst);
        Ok(items)
    }

    async fn count_for_stage(&self, stage: Stage) -> StoreResult<u64> {
        self.inner.count_for_stage(stage).await
    }

    async fn mark_prefiltered(&self, post_ids: &[String]) -> StoreResult<usize> {
        self.inner.mark_prefiltered(post_ids).await
    }

    async fn set_route(&self, post_id: &str, decision: &RouteDecision) -> StoreResult<bool> {
        self.inner.set_route(post_id, decision).await
    }

    async fn mark_enriched(&self, post_id: &str) -> StoreResult<bool> {
        self.inner.mark_enriched(post_id).await
    }

    async fn mark_childless_enriched(&self) -> StoreResult<usize> {
        self.inner.mark_childless_enriched().await
    }

    async fn stats(&self, max_item_attempts: u32) -> StoreResult<PipelineStats> {
        self.inner.stats(max_item_attempts).await
    }
}

#[async_trait]
impl ChildStore for CountingStore {
    async fn insert_comments(&self, comments: &[Comment]) -> StoreResult<usize> {
        self.inner.insert_comments(comments).await
    }

    async fn top_comments(&self, post_id: &str, limit: usize) -> StoreResult<Vec<Comment>> {
        self.inner.top_comments(post_id, limit).await
    }
}

#[async_trait]
impl ClassificationStore for CountingStore {
    async fn upsert_classification(&self, record: &ClassificationRecord) -> StoreResult<()> {
        self.inner.upsert_classification(record).await
    }

    async fn get_classification(
        &self,
        post_id: &str,
        track: Track,
    ) -> StoreResult<Option<ClassificationRecord>> {
        self.inner.get_classification(post_id, track).await
    }

    async fn record_classification_failure(
        &self,
        post_id: &str,
        track: Track,
        error: &str,
    ) -> StoreResult<u32> {
        self.inner
            .record_classification_failure(post_id, track, error)
            .await
    }

    async fn classification_failures(&self, post_id: &str, track: Track) -> StoreResult<u32> {
        self.inner.classification_failures(post_id, track).await
    }
}

#[async_trait]
impl RunLog for CountingStore {
    async fn open_run(
        &self,
        run_type: &str,
        phase: &str,
        config: &serde_json::Value,
    ) -> StoreResult<RunId> {
        self.inner.open_run(run_type, phase, config).await
    }

    async fn close_run(
        &self,
        run_id: RunId,
        counts: RunCounts,
        status: RunStatus,
        last_error: Option<&str>,
    ) -> StoreResult<()> {
        self.inner.close_run(run_id, counts, status, last_error).await
    }

    async fn get_run(&self, run_id: RunId) -> StoreResult<Option<Run>> {
        self.inner.get_run(run_id).await
    }
}
