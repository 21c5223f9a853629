//! Stage-1 router: cheap two-flag triage of every unrouted item.
//!
//! Each item gets an independent fraud flag, identity-verification flag
//! and confidence from a strict-schema completion call. Routing is
//! write-once: an item that fails every attempt is still written as routed
//! (with null flags) so no later pass picks it up again.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use llm_client::{CompletionOptions, StructuredOutput};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::classify::json::extract_object;
use crate::error::{PipelineError, Result, ValidationError};
use crate::pool::run_bounded;
use crate::prompts::{route_user_prompt, ROUTE_BODY_CHARS, ROUTE_SYSTEM_PROMPT};
use crate::retry::RetryPolicy;
use crate::traits::{completion::Completion, store::CheckpointStore};
use crate::types::{
    item::{Item, Order, RouteDecision, Stage},
    run::{RunCounts, RunId, RunStatus},
};

/// Run type recorded for routing runs.
pub const ROUTE_RUN_TYPE: &str = "route";

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub model: String,
    pub temperature: f32,

    /// Reasoning hint sent with every call
    pub reasoning_effort: Option<String>,

    /// Worker pool width; a batch is twice this
    pub concurrency: usize,

    /// Body characters kept in the prompt
    pub body_budget: usize,

    /// Per-call timeout
    pub timeout: Duration,

    pub retry: RetryPolicy,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            model: "openai/gpt-oss-120b".to_string(),
            temperature: 0.1,
            reasoning_effort: Some("medium".to_string()),
            concurrency: 20,
            body_budget: ROUTE_BODY_CHARS,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::completion(2),
        }
    }
}

impl RouterConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_reasoning_effort(mut self, effort: Option<String>) -> Self {
        self.reasoning_effort = effort;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_body_budget(mut self, body_budget: usize) -> Self {
        self.body_budget = body_budget;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.concurrency * 2
    }

    fn completion_options(&self) -> CompletionOptions {
        CompletionOptions::new(&self.model)
            .temperature(self.temperature)
            .json_schema(RouteResponse::response_format())
            .reasoning_effort(self.reasoning_effort.clone())
            .timeout(self.timeout)
    }
}

/// Structured Stage-1 answer.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
#[schemars(rename = "pass1_result")]
pub struct RouteResponse {
    pub is_fraud: bool,
    pub is_idv: bool,
    pub confidence: f64,
}

/// Parse a Stage-1 reply into a decision.
pub fn parse_route(text: &str) -> Result<RouteDecision> {
    let map = extract_object(text)?;
    let response: RouteResponse = serde_json::from_value(serde_json::Value::Object(map))
        .map_err(|e| ValidationError::Schema(e.to_string()))?;
    if !response.confidence.is_finite() {
        return Err(ValidationError::Confidence(response.confidence).into());
    }
    Ok(RouteDecision::new(
        response.is_fraud,
        response.is_idv,
        response.confidence,
    ))
}

/// Result of a routing run.
#[derive(Debug, Clone, Default)]
pub struct RouteResult {
    pub run_id: RunId,
    pub processed: usize,
    /// Fraud only
    pub fraud: usize,
    /// Identity verification only
    pub idv: usize,
    pub both: usize,
    pub neither: usize,
    pub errors: usize,
}

impl RouteResult {
    fn tally(&mut self, decision: &RouteDecision) {
        self.processed += 1;
        match (decision.fraud, decision.idv) {
            (None, None) => self.errors += 1,
            (Some(true), Some(true)) => self.both += 1,
            (Some(true), _) => self.fraud += 1,
            (_, Some(true)) => self.idv += 1,
            _ => self.neither += 1,
        }
    }
}

/// Routes unrouted items through the Stage-1 model.
pub struct Router {
    store: Arc<dyn CheckpointStore>,
    completion: Arc<dyn Completion>,
    config: Arc<RouterConfig>,
}

impl Router {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        completion: Arc<dyn Completion>,
        config: RouterConfig,
    ) -> Self {
        Self {
            store,
            completion,
            config: Arc::new(config),
        }
    }

    /// Route every eligible item.
    pub async fn run(&self) -> Result<RouteResult> {
        let total = self.store.count_for_stage(Stage::Unrouted).await?;
        let snapshot = json!({
            "model": self.config.model,
            "total": total,
            "concurrency": self.config.concurrency,
            "reasoning": self.config.reasoning_effort,
        });
        self.route_pass("full", &snapshot, Order::Key, None).await
    }

    /// Route a uniform random sample of at most `sample_size` eligible items.
    pub async fn run_sample(&self, sample_size: usize) -> Result<RouteResult> {
        let snapshot = json!({
            "model": self.config.model,
            "sample_size": sample_size,
            "concurrency": self.config.concurrency,
            "reasoning": self.config.reasoning_effort,
        });
        self.route_pass("sample", &snapshot, Order::Random, Some(sample_size))
            .await
    }

    async fn route_pass(
        &self,
        phase: &str,
        snapshot: &serde_json::Value,
        order: Order,
        limit: Option<usize>,
    ) -> Result<RouteResult> {
        let run_id = self.store.open_run(ROUTE_RUN_TYPE, phase, snapshot).await?;
        let mut result = RouteResult {
            run_id,
            ..Default::default()
        };
        // Items whose worker died stay unrouted; never hand them out twice
        let mut stuck: HashSet<String> = HashSet::new();
        let mut handed_out = 0usize;

        loop {
            let want = match limit {
                Some(limit) => limit.saturating_sub(handed_out).min(self.config.batch_size()),
                None => self.config.batch_size(),
            };
            if want == 0 {
                break;
            }

            let batch: Vec<Item> = self
                .store
                .items_for_stage(Stage::Unrouted, want + stuck.len(), order)
                .await?
                .into_iter()
                .filter(|item| !stuck.contains(&item.post_id))
                .take(want)
                .collect();
            if batch.is_empty() {
                break;
            }
            handed_out += batch.len();
            let mut pending: HashSet<String> =
                batch.iter().map(|item| item.post_id.clone()).collect();

            let completion = self.completion.clone();
            let config = self.config.clone();
            let output = run_bounded(batch, self.config.concurrency, move |item| {
                let completion = completion.clone();
                let config = config.clone();
                async move {
                    let outcome = route_item(completion.as_ref(), &config, &item).await;
                    (item.post_id, outcome)
                }
            })
            .await?;

            result.processed += output.failed;
            result.errors += output.failed;
            for (post_id, outcome) in output.completed {
                pending.remove(&post_id);
                let decision = match outcome {
                    Ok(decision) => decision,
                    Err(e) => {
                        warn!(post_id = %post_id, error = %e, "Routing failed, recording error marker");
                        RouteDecision::failed()
                    }
                };
                if !self.store.set_route(&post_id, &decision).await? {
                    debug!(post_id = %post_id, "Already routed, kept earlier decision");
                }
                result.tally(&decision);
            }
            stuck.extend(pending);

            info!(
                processed = result.processed,
                fraud = result.fraud,
                idv = result.idv,
                both = result.both,
                neither = result.neither,
                errors = result.errors,
                "Routing progress"
            );
        }

        let counts = RunCounts::new(
            result.processed as u64,
            (result.processed - result.errors) as u64,
            result.errors as u64,
        );
        self.store
            .close_run(run_id, counts, RunStatus::Completed, None)
            .await?;

        info!(
            run_id,
            processed = result.processed,
            errors = result.errors,
            "Routing complete"
        );
        Ok(result)
    }
}

/// Route one item, retrying per the configured policy.
pub async fn route_item(
    completion: &dyn Completion,
    config: &RouterConfig,
    item: &Item,
) -> Result<RouteDecision> {
    let user = route_user_prompt(item, config.body_budget);
    let options = config.completion_options();
    let (user, options) = (user.as_str(), &options);

    config
        .retry
        .run(&item.post_id, |_| async move {
            let text = completion
                .complete(ROUTE_SYSTEM_PROMPT, user, options)
                .await
                .map_err(PipelineError::from)?;
            parse_route(&text)
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryStore;
    use crate::testing::{CountingStore, MockCompletion, ScriptedError};
    use crate::traits::store::{ItemStore, RunLog};
    use crate::types::classification::Track;

    const FRAUD_ONLY: &str = r#"{"is_fraud": true, "is_idv": false, "confidence": 0.9}"#;

    fn fast_config() -> RouterConfig {
        RouterConfig::default()
            .with_concurrency(4)
            .with_retry(RetryPolicy::completion(2).with_delays(Duration::from_millis(1)))
    }

    async fn seeded_store(titles: &[(&str, &str)]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for (id, title) in titles {
            store
                .insert_item(&Item::new(*id, *title, "body").with_num_comments(3))
                .await
                .unwrap();
        }
        store
    }

    #[test]
    fn test_parse_route() {
        let decision = parse_route(FRAUD_ONLY).unwrap();
        assert_eq!(decision.fraud, Some(true));
        assert_eq!(decision.idv, Some(false));
        assert_eq!(decision.confidence, 0.9);

        let clamped = parse_route(r#"{"is_fraud": false, "is_idv": true, "confidence": 3}"#).unwrap();
        assert_eq!(clamped.confidence, 1.0);

        assert!(parse_route(r#"{"is_fraud": "maybe", "is_idv": true, "confidence": 0.2}"#).is_err());
        assert!(parse_route("not json").is_err());
    }

    #[tokio::test]
    async fn test_fraud_only_item_awaits_enrichment() {
        let store = seeded_store(&[("p1", "Lost my savings to a fake broker")]).await;
        let completion = Arc::new(MockCompletion::new().with_default(FRAUD_ONLY));
        let router = Router::new(store.clone(), completion.clone(), fast_config());

        let result = router.run().await.unwrap();
        assert_eq!(result.processed, 1);
        assert_eq!(result.fraud, 1);

        let item = store.get_item("p1").await.unwrap().unwrap();
        assert!(item.routed_to(Track::Fraud));
        assert!(!item.routed_to(Track::Idv));
        assert_eq!(store.count_for_stage(Stage::AwaitingEnrichment).await.unwrap(), 1);
        assert_eq!(store.count_for_stage(Stage::Unrouted).await.unwrap(), 0);

        let call = &completion.calls()[0];
        assert_eq!(call.strict_schema.as_deref(), Some("pass1_result"));
        assert_eq!(call.reasoning_effort.as_deref(), Some("medium"));
        assert_eq!(call.model, "openai/gpt-oss-120b");
    }

    #[tokio::test]
    async fn test_failures_are_written_as_error_markers() {
        let store = seeded_store(&[
            ("ok", "Verified with a selfie today"),
            ("bad", "Garbled response incoming"),
            ("denied", "Forbidden from the provider"),
        ])
        .await;
        let completion = Arc::new(
            MockCompletion::new()
                .with_reply("selfie", r#"{"is_fraud": false, "is_idv": true, "confidence": 0.8}"#)
                .with_reply("Garbled", "I cannot decide")
                .with_error("Forbidden", ScriptedError::Http(403)),
        );
        let router = Router::new(store.clone(), completion.clone(), fast_config());

        let result = router.run().await.unwrap();
        assert_eq!(result.processed, 3);
        assert_eq!(result.idv, 1);
        assert_eq!(result.errors, 2);

        // malformed replies are retried, fatal statuses are not
        assert_eq!(completion.calls_matching("Garbled"), 2);
        assert_eq!(completion.calls_matching("Forbidden"), 1);

        let bad = store.get_item("bad").await.unwrap().unwrap();
        let route = bad.route.unwrap();
        assert!(route.is_error());
        assert_eq!(route.confidence, 0.0);

        let run = store.get_run(result.run_id).await.unwrap().unwrap();
        assert_eq!(run.run_type, ROUTE_RUN_TYPE);
        assert_eq!(run.phase, "full");
        assert_eq!(run.counts, RunCounts::new(3, 1, 2));
    }

    #[tokio::test]
    async fn test_transient_error_recovers() {
        let store = seeded_store(&[("p1", "Phone call from fake bank")]).await;
        let completion = Arc::new(
            MockCompletion::new()
                .with_error("fake bank", ScriptedError::RateLimited)
                .with_reply("fake bank", FRAUD_ONLY),
        );
        let router = Router::new(store.clone(), completion.clone(), fast_config());

        let result = router.run().await.unwrap();
        assert_eq!(result.fraud, 1);
        assert_eq!(completion.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_routing_is_not_repeated() {
        let store = seeded_store(&[("p1", "title one"), ("p2", "title two")]).await;
        let completion = Arc::new(MockCompletion::new().with_default(FRAUD_ONLY));
        let router = Router::new(store.clone(), completion.clone(), fast_config());

        router.run().await.unwrap();
        let second = router.run().await.unwrap();

        assert_eq!(second.processed, 0);
        assert_eq!(completion.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_sample_routes_only_requested_count() {
        let ids: Vec<(String, String)> = (0..30)
            .map(|i| (format!("p{i}"), format!("post number {i}")))
            .collect();
        let titles: Vec<(&str, &str)> = ids.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        let store = seeded_store(&titles).await;
        let completion = Arc::new(
            MockCompletion::new().with_default(r#"{"is_fraud": false, "is_idv": false, "confidence": 0.7}"#),
        );
        let router = Router::new(store.clone(), completion, fast_config());

        let result = router.run_sample(5).await.unwrap();
        assert_eq!(result.processed, 5);
        assert_eq!(result.neither, 5);
        assert_eq!(store.count_for_stage(Stage::Unrouted).await.unwrap(), 25);

        let run = store.get_run(result.run_id).await.unwrap().unwrap();
        assert_eq!(run.phase, "sample");
        assert_eq!(run.config_snapshot["sample_size"], 5);
    }

    #[tokio::test]
    async fn test_batches_read_each_item_once() {
        let memory = Arc::new(MemoryStore::new());
        for i in 0..200 {
            memory
                .insert_item(&Item::new(format!("p{i:04}"), "some post", "body"))
                .await
                .unwrap();
        }
        let store = Arc::new(CountingStore::new(memory.clone()));
        let completion = Arc::new(MockCompletion::new().with_default(FRAUD_ONLY));
        let router = Router::new(store.clone(), completion, fast_config());

        let result = router.run().await.unwrap();
        assert_eq!(result.processed, 200);

        // 25 full batches of 8 plus the final empty read
        assert_eq!(store.rows_read(), 200);
        assert_eq!(store.queries(), 26);
        assert_eq!(memory.count_for_stage(Stage::Unrouted).await.unwrap(), 0);
    }
}
