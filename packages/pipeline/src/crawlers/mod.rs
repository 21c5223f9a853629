//! Collection: the query catalog, the paginated crawler, and request pacing.
//!
//! - `catalog` - built-in tiers of listing and search sources
//! - `Crawler` - walks each source page by page into the checkpoint store
//! - `RateLimitedSource` - wrapper that spaces requests to a listing source

pub mod catalog;
pub mod crawl;
pub mod rate_limited;

pub use catalog::{catalog, tier, QuerySource, Tier};
pub use crawl::{CollectResult, CrawlConfig, Crawler, WalkEnd, WalkResult, COLLECTION_RUN_TYPE};
pub use rate_limited::{ListingSourceExt, RateLimitedSource};
