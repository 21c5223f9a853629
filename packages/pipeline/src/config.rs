use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::classify::ClassifyConfig;
use crate::crawlers::CrawlConfig;
use crate::enrich::EnrichConfig;
use crate::prefilter::PrefilterConfig;
use crate::retry::RetryPolicy;
use crate::route::RouterConfig;
use crate::types::classification::Track;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://pipeline.db?mode=rwc";
pub const DEFAULT_USER_AGENT: &str = "fraud-dashboard-research:v1.0 (educational project)";

/// Pipeline configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: String,
    pub openrouter_api_key: Option<String>,
    pub openrouter_base_url: Option<String>,
    pub pass1_model: String,
    pub pass2_model: String,
    pub llm_temperature: f32,
    /// Stage-1 attempts per item
    pub llm_max_retries: u32,
    /// Stage-2 attempts per item per run
    pub pass2_max_retries: u32,
    pub max_item_attempts: u32,
    pub llm_concurrency: usize,
    pub reddit_base_url: Option<String>,
    pub reddit_user_agent: String,
    pub reddit_request_delay: Duration,
    pub max_pages: u32,
    pub max_comments_per_post: usize,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let delay_secs: f64 = parse_or(&get, "REDDIT_REQUEST_DELAY_SECS", 6.0)?;
        let reddit_request_delay = Duration::try_from_secs_f64(delay_secs)
            .context("REDDIT_REQUEST_DELAY_SECS must be a non-negative number")?;

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            openrouter_api_key: get("OPENROUTER_API_KEY"),
            openrouter_base_url: get("OPENROUTER_BASE_URL"),
            pass1_model: get("PASS1_MODEL").unwrap_or_else(|| RouterConfig::default().model),
            pass2_model: get("PASS2_MODEL").unwrap_or_else(|| ClassifyConfig::default().model),
            llm_temperature: parse_or(&get, "LLM_TEMPERATURE", 0.1)?,
            llm_max_retries: parse_or(&get, "LLM_MAX_RETRIES", 2)?,
            pass2_max_retries: parse_or(&get, "PASS2_MAX_RETRIES", 3)?,
            max_item_attempts: parse_or(&get, "MAX_ITEM_ATTEMPTS", 3)?,
            llm_concurrency: parse_or(&get, "LLM_CONCURRENCY", 20)?,
            reddit_base_url: get("REDDIT_BASE_URL"),
            reddit_user_agent: get("REDDIT_USER_AGENT")
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            reddit_request_delay,
            max_pages: parse_or(&get, "MAX_PAGES", 10)?,
            max_comments_per_post: parse_or(&get, "MAX_COMMENTS_PER_POST", 20)?,
        })
    }

    /// API key for phases that call the model.
    pub fn api_key(&self) -> Result<&str> {
        self.openrouter_api_key
            .as_deref()
            .context("OPENROUTER_API_KEY must be set")
    }

    pub fn crawl_config(&self) -> CrawlConfig {
        CrawlConfig::default().with_max_pages(self.max_pages)
    }

    pub fn prefilter_config(&self) -> PrefilterConfig {
        PrefilterConfig::default()
    }

    pub fn router_config(&self) -> RouterConfig {
        RouterConfig::default()
            .with_model(&self.pass1_model)
            .with_temperature(self.llm_temperature)
            .with_concurrency(self.llm_concurrency)
            .with_retry(RetryPolicy::completion(self.llm_max_retries))
    }

    pub fn enrich_config(&self) -> EnrichConfig {
        EnrichConfig::default().with_max_children(self.max_comments_per_post)
    }

    pub fn classify_config(&self, track: Track) -> ClassifyConfig {
        ClassifyConfig::for_track(track)
            .with_model(&self.pass2_model, model_label(&self.pass2_model))
            .with_temperature(self.llm_temperature)
            .with_workers(self.llm_concurrency)
            .with_retry(RetryPolicy::completion(self.pass2_max_retries))
            .with_max_item_attempts(self.max_item_attempts)
    }
}

/// Model id without its provider prefix (`deepseek/deepseek-v3.2` -> `deepseek-v3.2`).
fn model_label(model: &str) -> &str {
    model.rsplit('/').next().unwrap_or(model)
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
        None => Ok(default),
    }
}
