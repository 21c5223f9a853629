//! Stage-2 deep classification.
//!
//! Each track (fraud, identity verification) has its own prompt, output
//! contract and record table. The engine pulls waves of ready items, asks
//! the model for a free-form JSON object, repairs and validates it, and
//! upserts the record. Items that exhaust their attempts get a failure
//! counted against them and drop out of eligibility after
//! `max_item_attempts` runs.

pub mod json;
pub mod normalize;
pub mod schema;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use llm_client::{CompletionOptions, ProviderPreferences};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Result};
use crate::pool::run_bounded;
use crate::prompts::{classify_system_prompt, classify_user_prompt, PROMPT_COMMENTS};
use crate::retry::RetryPolicy;
use crate::traits::{completion::Completion, store::CheckpointStore};
use crate::types::{
    classification::{ClassificationRecord, Track},
    comment::Comment,
    item::{Item, Order, Stage},
    run::{RunCounts, RunId, RunStatus},
};

use self::json::extract_object;
use self::normalize::normalize;
use self::schema::{validate, FraudOutput, IdvOutput, TrackOutput};

/// Run type recorded for Stage-2 runs.
pub const CLASSIFY_RUN_TYPE: &str = "classify";

#[derive(Debug, Clone)]
pub struct ClassifyConfig {
    /// Model requested from the service
    pub model: String,

    /// Model label stored on each record
    pub record_model: String,

    pub temperature: f32,
    pub reasoning_effort: Option<String>,
    pub provider: Option<ProviderPreferences>,
    pub timeout: Duration,

    /// Attempts per item within one run
    pub retry: RetryPolicy,

    /// Failed runs after which an item is no longer selected
    pub max_item_attempts: u32,

    pub workers: usize,

    /// Items per wave
    pub wave_size: usize,

    /// Sleep after an empty poll in continuous mode
    pub poll_interval: Duration,

    /// Consecutive empty polls before continuous mode stops
    pub max_empty_polls: u32,

    /// Comments read from the store for each prompt
    pub comments_in_prompt: usize,
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            model: "deepseek/deepseek-v3.2".to_string(),
            record_model: "deepseek-v3.2".to_string(),
            temperature: 0.1,
            reasoning_effort: None,
            provider: Some(ProviderPreferences::only("DeepSeek")),
            timeout: Duration::from_secs(120),
            retry: RetryPolicy::completion(3),
            max_item_attempts: 3,
            workers: 20,
            wave_size: 500,
            poll_interval: Duration::from_secs(300),
            max_empty_polls: 4,
            comments_in_prompt: PROMPT_COMMENTS,
        }
    }
}

impl ClassifyConfig {
    /// Defaults for `track`; fraud gets a low reasoning hint.
    pub fn for_track(track: Track) -> Self {
        let reasoning_effort = match track {
            Track::Fraud => Some("low".to_string()),
            Track::Idv => None,
        };
        Self {
            reasoning_effort,
            ..Self::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>, record_model: impl Into<String>) -> Self {
        self.model = model.into();
        self.record_model = record_model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_item_attempts(mut self, max_item_attempts: u32) -> Self {
        self.max_item_attempts = max_item_attempts.max(1);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_wave_size(mut self, wave_size: usize) -> Self {
        self.wave_size = wave_size.max(1);
        self
    }

    pub fn with_polling(mut self, poll_interval: Duration, max_empty_polls: u32) -> Self {
        self.poll_interval = poll_interval;
        self.max_empty_polls = max_empty_polls.max(1);
        self
    }

    fn completion_options(&self) -> CompletionOptions {
        let options = CompletionOptions::new(&self.model)
            .temperature(self.temperature)
            .json_object()
            .reasoning_effort(self.reasoning_effort.clone())
            .timeout(self.timeout);
        match &self.provider {
            Some(provider) => options.provider(provider.clone()),
            None => options,
        }
    }
}

/// Turn a raw model reply into a record for `track`.
pub fn parse_reply(track: Track, text: &str, post_id: &str, model: &str) -> Result<ClassificationRecord> {
    let map = extract_object(text)?;
    match track {
        Track::Fraud => parse_as::<FraudOutput>(map, post_id, model),
        Track::Idv => parse_as::<IdvOutput>(map, post_id, model),
    }
}

fn parse_as<T: TrackOutput>(
    mut map: Map<String, Value>,
    post_id: &str,
    model: &str,
) -> Result<ClassificationRecord> {
    normalize(&mut map, T::ENUM_FIELDS);
    Ok(validate::<T>(map)?.into_record(post_id, model))
}

#[derive(Debug, Clone, Default)]
pub struct ClassifyResult {
    pub run_id: RunId,
    pub waves: usize,
    pub processed: usize,
    pub classified: usize,
    /// Of `classified`, records marked relevant
    pub relevant: usize,
    pub failed: usize,
}

/// Stage-2 engine for one track.
pub struct ClassifyEngine {
    store: Arc<dyn CheckpointStore>,
    completion: Arc<dyn Completion>,
    track: Track,
    config: Arc<ClassifyConfig>,
}

impl ClassifyEngine {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        completion: Arc<dyn Completion>,
        track: Track,
        config: ClassifyConfig,
    ) -> Self {
        Self {
            store,
            completion,
            track,
            config: Arc::new(config),
        }
    }

    pub fn track(&self) -> Track {
        self.track
    }

    fn stage(&self) -> Stage {
        Stage::ReadyFor {
            track: self.track,
            max_attempts: self.config.max_item_attempts,
        }
    }

    /// Classify a single wave of ready items.
    pub async fn run_once(&self) -> Result<ClassifyResult> {
        let (run_id, mut result) = self.open("once").await?;
        let mut excluded = HashSet::new();
        self.wave(&mut excluded, &mut result).await?;
        self.close(run_id, &result).await?;
        Ok(result)
    }

    /// Keep classifying waves until `max_empty_polls` consecutive polls
    /// find nothing to do.
    pub async fn run_continuous(&self) -> Result<ClassifyResult> {
        let (run_id, mut result) = self.open("continuous").await?;
        let mut excluded = HashSet::new();
        let mut empty_polls = 0;

        loop {
            if self.wave(&mut excluded, &mut result).await? > 0 {
                empty_polls = 0;
                continue;
            }

            empty_polls += 1;
            if empty_polls >= self.config.max_empty_polls {
                info!(track = %self.track, empty_polls, "Nothing left to classify, stopping");
                break;
            }
            info!(
                track = %self.track,
                empty_polls,
                max = self.config.max_empty_polls,
                wait_secs = self.config.poll_interval.as_secs(),
                "No ready items, waiting"
            );
            tokio::time::sleep(self.config.poll_interval).await;
        }

        self.close(run_id, &result).await?;
        Ok(result)
    }

    async fn open(&self, mode: &str) -> Result<(RunId, ClassifyResult)> {
        let snapshot = json!({
            "track": self.track,
            "model": self.config.model,
            "workers": self.config.workers,
            "wave_size": self.config.wave_size,
            "reasoning": self.config.reasoning_effort,
            "max_attempts": self.config.retry.max_attempts,
            "max_item_attempts": self.config.max_item_attempts,
        });
        let phase = format!("{}_{mode}", self.track);
        let run_id = self
            .store
            .open_run(CLASSIFY_RUN_TYPE, &phase, &snapshot)
            .await?;
        info!(track = %self.track, run_id, mode, "Classification started");

        Ok((
            run_id,
            ClassifyResult {
                run_id,
                ..Default::default()
            },
        ))
    }

    async fn close(&self, run_id: RunId, result: &ClassifyResult) -> Result<()> {
        let counts = RunCounts::new(
            result.processed as u64,
            result.classified as u64,
            result.failed as u64,
        );
        self.store
            .close_run(run_id, counts, RunStatus::Completed, None)
            .await?;
        info!(
            track = %self.track,
            run_id,
            waves = result.waves,
            classified = result.classified,
            relevant = result.relevant,
            failed = result.failed,
            "Classification complete"
        );
        Ok(())
    }

    /// One wave. Items that failed earlier in this run are skipped so a
    /// failing item is not retried until the next run. Returns the number
    /// of items processed.
    async fn wave(&self, excluded: &mut HashSet<String>, result: &mut ClassifyResult) -> Result<usize> {
        let wave_size = self.config.wave_size;
        let items: Vec<Item> = self
            .store
            .items_for_stage(self.stage(), wave_size + excluded.len(), Order::Key)
            .await?
            .into_iter()
            .filter(|item| !excluded.contains(&item.post_id))
            .take(wave_size)
            .collect();
        if items.is_empty() {
            return Ok(0);
        }

        let mut inputs = Vec::with_capacity(items.len());
        for item in items {
            let comments = self
                .store
                .top_comments(&item.post_id, self.config.comments_in_prompt)
                .await?;
            inputs.push((item, comments));
        }
        let wave_len = inputs.len();
        let mut pending: HashSet<String> =
            inputs.iter().map(|(item, _)| item.post_id.clone()).collect();
        result.waves += 1;
        info!(track = %self.track, wave = result.waves, items = wave_len, "Classifying wave");

        let completion = self.completion.clone();
        let config = self.config.clone();
        let track = self.track;
        let output = run_bounded(inputs, self.config.workers, move |(item, comments)| {
            let completion = completion.clone();
            let config = config.clone();
            async move {
                let outcome = classify_item(completion.as_ref(), &config, track, &item, &comments).await;
                (item.post_id, outcome)
            }
        })
        .await?;

        result.processed += wave_len;
        result.failed += output.failed;
        for (post_id, outcome) in output.completed {
            match outcome {
                Ok(record) => {
                    pending.remove(&post_id);
                    self.store.upsert_classification(&record).await?;
                    result.classified += 1;
                    if record.is_relevant {
                        result.relevant += 1;
                    }
                    debug!(post_id = %post_id, track = %self.track, primary = %record.primary, "Classified");
                }
                Err(e) => {
                    let attempts = self
                        .store
                        .record_classification_failure(&post_id, self.track, &e.to_string())
                        .await?;
                    result.failed += 1;
                    warn!(post_id = %post_id, track = %self.track, attempts, error = %e, "Classification failed");
                }
            }
        }
        // Failed and panicked items may still be eligible
        excluded.extend(pending);

        info!(
            track = %self.track,
            processed = result.processed,
            classified = result.classified,
            failed = result.failed,
            "Wave complete"
        );
        Ok(wave_len)
    }
}

/// Classify one item on `track`, retrying the whole call-parse-validate
/// attempt per the configured policy.
pub async fn classify_item(
    completion: &dyn Completion,
    config: &ClassifyConfig,
    track: Track,
    item: &Item,
    comments: &[Comment],
) -> Result<ClassificationRecord> {
    let system = classify_system_prompt(track);
    let user = classify_user_prompt(item, comments);
    let options = config.completion_options();
    let (user, options) = (user.as_str(), &options);
    let (post_id, model) = (item.post_id.as_str(), config.record_model.as_str());

    config
        .retry
        .run(post_id, |_| async move {
            let text = completion
                .complete(system, user, options)
                .await
                .map_err(PipelineError::from)?;
            parse_reply(track, &text, post_id, model)
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::testing::{CountingStore, MockCompletion};
    use crate::traits::store::{ChildStore, ClassificationStore, ItemStore, RunLog};
    use crate::types::item::RouteDecision;

    const FRAUD_REPLY: &str = r#"Sure. ```json
{"is_relevant": "true", "fraud_type": "Romance Scam", "industry": "dating",
 "loss_bracket": "10k_to_100k", "channel": "messaging app", "notable_quote": "N/A",
 "tags": "Pig Butchering, elderly_victim",}
```"#;

    const IDV_REPLY: &str = r#"{"is_relevant": true, "verification_type": "selfie_photo",
 "friction_type": "unknown", "trigger_reason": "periodic_recheck", "platform_name": "Uber",
 "sentiment": "negative", "notable_quote": null, "tags": ["gig_worker", "account_locked"]}"#;

    fn fast_config(track: Track) -> ClassifyConfig {
        ClassifyConfig::for_track(track)
            .with_workers(4)
            .with_retry(RetryPolicy::completion(3).with_delays(Duration::from_millis(1)))
            .with_polling(Duration::from_millis(1), 2)
    }

    async fn ready(store: &MemoryStore, id: &str, title: &str, fraud: bool, idv: bool) {
        store.insert_item(&Item::new(id, title, "body")).await.unwrap();
        store
            .set_route(id, &RouteDecision::new(fraud, idv, 0.9))
            .await
            .unwrap();
        store.mark_enriched(id).await.unwrap();
    }

    #[test]
    fn test_parse_reply_repairs_and_validates() {
        let record = parse_reply(Track::Fraud, FRAUD_REPLY, "p1", "deepseek-v3.2").unwrap();
        assert!(record.is_relevant);
        assert_eq!(record.primary, "romance_scam");
        assert_eq!(record.attribute("channel"), Some("messaging_app"));
        assert_eq!(record.notable_quote, None);
        assert_eq!(record.tags, vec!["pig_butchering", "elderly_victim"]);
        assert_eq!(record.model, "deepseek-v3.2");

        let record = parse_reply(Track::Idv, IDV_REPLY, "p2", "m").unwrap();
        assert_eq!(record.attribute("friction_type"), Some("other"));
        assert_eq!(record.platform_name.as_deref(), Some("Uber"));

        // a fraud reply is not a valid idv reply
        assert!(parse_reply(Track::Idv, FRAUD_REPLY, "p1", "m").is_err());
    }

    #[tokio::test]
    async fn test_run_once_classifies_routed_items_only() {
        let store = Arc::new(MemoryStore::new());
        ready(&store, "f1", "romance story", true, false).await;
        ready(&store, "i1", "selfie story", false, true).await;
        store
            .insert_comments(&[Comment::new("c1", "f1", "I lost everything", 5).by_submitter()])
            .await
            .unwrap();

        let completion = Arc::new(MockCompletion::new().with_default(FRAUD_REPLY));
        let engine = ClassifyEngine::new(store.clone(), completion.clone(), Track::Fraud, fast_config(Track::Fraud));

        let result = engine.run_once().await.unwrap();
        assert_eq!(result.classified, 1);
        assert_eq!(result.relevant, 1);

        assert!(store.get_classification("f1", Track::Fraud).await.unwrap().is_some());
        assert!(store.get_classification("i1", Track::Fraud).await.unwrap().is_none());

        let call = &completion.calls()[0];
        assert!(call.json_object);
        assert!(call.strict_schema.is_none());
        assert_eq!(call.reasoning_effort.as_deref(), Some("low"));
        assert_eq!(call.model, "deepseek/deepseek-v3.2");
        assert!(call.user.contains("(OP)]\nI lost everything"));
        assert_eq!(call.system, classify_system_prompt(Track::Fraud));
    }

    #[tokio::test]
    async fn test_malformed_replies_exhaust_attempts_and_record_failure() {
        let store = Arc::new(MemoryStore::new());
        ready(&store, "p1", "broken output", false, true).await;

        let completion = Arc::new(MockCompletion::new().with_default("{\"is_relevant\": true"));
        let engine = ClassifyEngine::new(store.clone(), completion.clone(), Track::Idv, fast_config(Track::Idv));

        let result = engine.run_continuous().await.unwrap();
        assert_eq!(result.failed, 1);
        assert_eq!(result.classified, 0);

        // one wave's worth of attempts, never re-selected within the run
        assert_eq!(completion.calls().len(), 3);
        assert_eq!(store.classification_failures("p1", Track::Idv).await.unwrap(), 1);
        assert!(store.get_classification("p1", Track::Idv).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_item_excluded_after_max_item_attempts() {
        let store = Arc::new(MemoryStore::new());
        ready(&store, "p1", "always broken", true, false).await;

        let completion = Arc::new(MockCompletion::new().with_default("nope"));
        let config = fast_config(Track::Fraud)
            .with_retry(RetryPolicy::completion(1))
            .with_max_item_attempts(2);
        let engine = ClassifyEngine::new(store.clone(), completion.clone(), Track::Fraud, config);

        engine.run_once().await.unwrap();
        engine.run_once().await.unwrap();
        let third = engine.run_once().await.unwrap();

        assert_eq!(third.processed, 0);
        assert_eq!(completion.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_bad_reply_recovers_within_attempt_budget() {
        let store = Arc::new(MemoryStore::new());
        ready(&store, "p1", "flaky output", false, true).await;

        let completion = Arc::new(
            MockCompletion::new()
                .with_reply("flaky", "garbage")
                .with_reply("flaky", IDV_REPLY),
        );
        let engine = ClassifyEngine::new(store.clone(), completion.clone(), Track::Idv, fast_config(Track::Idv));

        let result = engine.run_once().await.unwrap();
        assert_eq!(result.classified, 1);
        assert_eq!(result.failed, 0);
        assert_eq!(completion.calls().len(), 2);
        assert_eq!(store.classification_failures("p1", Track::Idv).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_continuous_stops_after_empty_polls() {
        let store = Arc::new(MemoryStore::new());
        for i in 0..5 {
            ready(&store, &format!("p{i}"), "romance", true, false).await;
        }
        let completion = Arc::new(MockCompletion::new().with_default(FRAUD_REPLY));
        let config = fast_config(Track::Fraud).with_wave_size(2);
        let engine = ClassifyEngine::new(store.clone(), completion, Track::Fraud, config);

        let result = engine.run_continuous().await.unwrap();
        assert_eq!(result.waves, 3);
        assert_eq!(result.classified, 5);

        let run = store.get_run(result.run_id).await.unwrap().unwrap();
        assert_eq!(run.phase, "fraud_continuous");
        assert_eq!(run.counts, RunCounts::new(5, 5, 0));
    }

    #[tokio::test]
    async fn test_waves_skip_only_failed_items() {
        let memory = Arc::new(MemoryStore::new());
        ready(&memory, "p000", "qqgarbledqq", true, false).await;
        for i in 1..100 {
            ready(&memory, &format!("p{i:03}"), "romance story", true, false).await;
        }
        let completion = Arc::new(
            MockCompletion::new()
                .with_reply("qqgarbledqq", "no json here")
                .with_default(FRAUD_REPLY),
        );
        let store = Arc::new(CountingStore::new(memory.clone()));
        let engine = ClassifyEngine::new(
            store.clone(),
            completion,
            Track::Fraud,
            fast_config(Track::Fraud).with_wave_size(10),
        );

        let result = engine.run_continuous().await.unwrap();
        assert_eq!(result.waves, 10);
        assert_eq!(result.classified, 99);
        assert_eq!(result.failed, 1);

        // nine later waves and two empty polls each see the failed item again
        assert_eq!(store.rows_read(), 100 + 9 + 2);
        assert_eq!(store.queries(), 12);
        assert_eq!(memory.classification_failures("p000", Track::Fraud).await.unwrap(), 1);
    }
}
