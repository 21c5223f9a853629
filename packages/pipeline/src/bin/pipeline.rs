//! Pipeline CLI: one subcommand per phase.
//!
//! Every phase is resumable; re-running a command picks up where the last
//! run stopped.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use llm_client::LlmClient;
use reddit_client::RedditClient;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pipeline::{
    catalog, run_prefilter, tier, CheckpointStore, ClassifyEngine, Completion, Crawler, Enricher,
    ListingSource, ListingSourceExt, PipelineConfig, Router, SqliteStore, Track,
};

#[derive(Parser)]
#[command(name = "pipeline")]
#[command(about = "Collect Reddit posts and classify them for fraud and identity verification")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema
    Init,

    /// Collect posts from the query catalog
    Collect {
        /// Only collect this tier
        #[arg(long)]
        tier: Option<u8>,
    },

    /// Exclude items that cannot be classified
    Prefilter,

    /// Stage-1: flag unrouted items as fraud and/or identity verification
    Route {
        /// Route a random sample of this many items instead of everything
        #[arg(long)]
        sample: Option<usize>,
    },

    /// Fetch top comments for routed items
    Enrich,

    /// Stage-2: extract structured fields for one track
    Classify {
        /// fraud or idv
        track: Track,

        /// Worker pool width
        #[arg(long)]
        workers: Option<usize>,

        /// Classify one wave and exit instead of polling
        #[arg(long)]
        once: bool,
    },

    /// Print checkpoint totals
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pipeline=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();
    let config = PipelineConfig::from_env()?;
    let store = open_store(&config).await?;

    match cli.command {
        Commands::Init => {
            info!(database = %config.database_url, "Schema ready");
        }
        Commands::Collect { tier: number } => {
            let tiers = match number {
                Some(n) => vec![tier(n).with_context(|| format!("no tier {n} in the catalog"))?],
                None => catalog(),
            };
            let crawler = Crawler::new(listing_source(&config), store, config.crawl_config());
            for result in crawler.collect(&tiers).await? {
                println!(
                    "tier {}: {} fetched, {} new, {} failed sources",
                    result.tier, result.items_fetched, result.items_inserted, result.sources_failed
                );
            }
        }
        Commands::Prefilter => {
            let result = run_prefilter(&store, &config.prefilter_config()).await?;
            println!("{} checked, {} filtered", result.checked, result.filtered);
            for (reason, count) in &result.by_reason {
                println!("  {reason}: {count}");
            }
        }
        Commands::Route { sample } => {
            let router = Router::new(store, completion(&config)?, config.router_config());
            let result = match sample {
                Some(0) => bail!("--sample must be at least 1"),
                Some(n) => router.run_sample(n).await?,
                None => router.run().await?,
            };
            println!(
                "{} routed: {} fraud, {} idv, {} both, {} neither, {} errors",
                result.processed, result.fraud, result.idv, result.both, result.neither, result.errors
            );
        }
        Commands::Enrich => {
            let enricher = Enricher::new(listing_source(&config), store, config.enrich_config());
            let result = enricher.run().await?;
            println!(
                "{} enriched ({} without comments), {} failed, {} comments stored",
                result.enriched, result.childless, result.failed, result.comments_inserted
            );
        }
        Commands::Classify {
            track,
            workers,
            once,
        } => {
            let mut classify_config = config.classify_config(track);
            if let Some(workers) = workers {
                classify_config = classify_config.with_workers(workers);
            }
            let engine = ClassifyEngine::new(store, completion(&config)?, track, classify_config);
            let result = if once {
                engine.run_once().await?
            } else {
                engine.run_continuous().await?
            };
            println!(
                "{track}: {} classified ({} relevant), {} failed over {} waves",
                result.classified, result.relevant, result.failed, result.waves
            );
        }
        Commands::Stats => {
            println!("{}", store.stats(config.max_item_attempts).await?);
        }
    }

    Ok(())
}

async fn open_store(config: &PipelineConfig) -> Result<Arc<dyn CheckpointStore>> {
    let store = SqliteStore::new(&config.database_url)
        .await
        .with_context(|| format!("failed to open {}", config.database_url))?;
    Ok(Arc::new(store))
}

/// Reddit client behind the shared request limiter.
fn listing_source(config: &PipelineConfig) -> Arc<dyn ListingSource> {
    let mut client = RedditClient::new(&config.reddit_user_agent);
    if let Some(url) = &config.reddit_base_url {
        client = client.with_base_url(url);
    }
    Arc::new(client.rate_limited(config.reddit_request_delay))
}

fn completion(config: &PipelineConfig) -> Result<Arc<dyn Completion>> {
    let mut client = LlmClient::new(config.api_key()?);
    if let Some(url) = &config.openrouter_base_url {
        client = client.with_base_url(url);
    }
    Ok(Arc::new(client))
}
