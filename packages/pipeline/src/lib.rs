//! Resumable Reddit Collection and Two-Pass Classification
//!
//! Collects posts from a tiered catalog of subreddit listings and keyword
//! searches, then labels them in two passes: a cheap Stage-1 router that
//! flags each post as fraud and/or identity-verification related, and a
//! per-track Stage-2 classifier that extracts structured fields from the
//! post and its top comments.
//!
//! # Checkpoints
//!
//! Every phase reads items whose flags say the work is pending and writes
//! flags that say it is done. Flags never move backwards, so a crashed or
//! interrupted phase is resumed by running it again.
//!
//! ```text
//! collect -> prefilter -> route -> enrich -> classify fraud
//!                                        \-> classify idv
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use pipeline::{MemoryStore, Router, RouterConfig};
//! use pipeline::testing::MockCompletion;
//!
//! let store = Arc::new(MemoryStore::new());
//! let completion = Arc::new(MockCompletion::new().with_default(
//!     r#"{"is_fraud": true, "is_idv": false, "confidence": 0.9}"#,
//! ));
//! let result = Router::new(store, completion, RouterConfig::default()).run().await?;
//! ```
//!
//! # Modules
//!
//! - [`traits`] - Core trait abstractions (CheckpointStore, ListingSource, Completion)
//! - [`types`] - Items, comments, classification records, runs
//! - [`crawlers`] - Query catalog, paginated crawler, request pacing
//! - [`prefilter`] - Local exclusion rules
//! - [`route`] - Stage-1 router
//! - [`enrich`] - Comment fetcher
//! - [`classify`] - Stage-2 classifier, JSON repair and validation
//! - [`stores`] - Storage implementations (MemoryStore, SqliteStore)
//! - [`testing`] - Mock implementations for testing

pub mod classify;
pub mod config;
pub mod crawlers;
pub mod enrich;
pub mod error;
pub mod pool;
pub mod prefilter;
pub mod prompts;
pub mod retry;
pub mod route;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{PipelineError, Result, SourceError, ValidationError};
pub use traits::{
    completion::Completion,
    source::{ListingPage, ListingSource, PageRequest},
    store::{CheckpointStore, ChildStore, ClassificationStore, ItemStore, RunLog},
};
pub use types::{
    classification::{ClassificationRecord, Track},
    comment::Comment,
    item::{InsertOutcome, Item, Order, RouteDecision, Stage},
    run::{PipelineStats, Run, RunCounts, RunId, RunStatus},
};

// Re-export phases
pub use classify::{ClassifyConfig, ClassifyEngine, ClassifyResult};
pub use config::PipelineConfig;
pub use crawlers::{
    catalog, tier, CollectResult, CrawlConfig, Crawler, ListingSourceExt, QuerySource,
    RateLimitedSource, Tier,
};
pub use enrich::{EnrichConfig, EnrichResult, Enricher};
pub use prefilter::{run_prefilter, FilterReason, PrefilterConfig, PrefilterResult};
pub use retry::{ErrorClass, RetryPolicy};
pub use route::{RouteResult, Router, RouterConfig};

// Re-export stores
pub use stores::{MemoryStore, SqliteStore};
