//! Collected posts and their per-stage checkpoint flags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::classification::Track;

/// A collected post.
///
/// Created once by the crawler (first write wins) and never deleted. The
/// stage flags only ever move from unset to set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Source id, the natural key
    pub post_id: String,

    /// Source fullname (`t3_<id>`)
    pub fullname: String,

    pub title: String,

    /// Self-text body (empty for link posts)
    pub body: String,

    pub url: String,
    pub subreddit: String,

    /// `None` when the author deleted their account
    pub author: Option<String>,

    pub score: i64,
    pub upvote_ratio: Option<f64>,
    pub num_comments: i64,
    pub created_utc: DateTime<Utc>,
    pub permalink: String,
    pub is_self: bool,
    pub over_18: bool,
    pub flair: Option<String>,
    pub stickied: bool,
    pub locked: bool,

    /// Catalog tag of the query that found this item first
    pub collection_source: String,

    /// Search term, for items found by a search
    pub search_query: Option<String>,

    /// Terminally excluded by the local pre-filter
    #[serde(default)]
    pub prefiltered: bool,

    /// Stage-1 outcome; `None` until routed
    #[serde(default)]
    pub route: Option<RouteDecision>,

    /// Children fetched (or known to be absent)
    #[serde(default)]
    pub enriched: bool,
}

impl Item {
    /// Create a bare item with default metadata. Mostly useful in tests.
    pub fn new(post_id: impl Into<String>, title: impl Into<String>, body: impl Into<String>) -> Self {
        let post_id = post_id.into();
        Self {
            fullname: format!("t3_{post_id}"),
            post_id,
            title: title.into(),
            body: body.into(),
            url: String::new(),
            subreddit: String::new(),
            author: None,
            score: 0,
            upvote_ratio: None,
            num_comments: 0,
            created_utc: DateTime::<Utc>::UNIX_EPOCH,
            permalink: String::new(),
            is_self: true,
            over_18: false,
            flair: None,
            stickied: false,
            locked: false,
            collection_source: String::new(),
            search_query: None,
            prefiltered: false,
            route: None,
            enriched: false,
        }
    }

    pub fn with_subreddit(mut self, subreddit: impl Into<String>) -> Self {
        self.subreddit = subreddit.into();
        self
    }

    pub fn with_score(mut self, score: i64) -> Self {
        self.score = score;
        self
    }

    pub fn with_num_comments(mut self, num_comments: i64) -> Self {
        self.num_comments = num_comments;
        self
    }

    pub fn with_permalink(mut self, permalink: impl Into<String>) -> Self {
        self.permalink = permalink.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>, query: Option<String>) -> Self {
        self.collection_source = source.into();
        self.search_query = query;
        self
    }

    /// Whether Stage-1 sent this item down `track`.
    pub fn routed_to(&self, track: Track) -> bool {
        self.route.as_ref().is_some_and(|r| r.flag(track) == Some(true))
    }

    /// Whether at least one route flag is set.
    pub fn has_active_route(&self) -> bool {
        Track::ALL.iter().any(|t| self.routed_to(*t))
    }

    /// Thread location used for child fetches. Falls back to the canonical
    /// `/r/{subreddit}/comments/{post_id}` when no permalink was stored.
    pub fn thread_path(&self) -> String {
        if self.permalink.trim().is_empty() {
            format!("/r/{}/comments/{}", self.subreddit, self.post_id)
        } else {
            self.permalink.clone()
        }
    }
}

/// Stage-1 routing decision.
///
/// Flags are independent: an item can belong to both tracks, one, or none.
/// `None` flags with zero confidence mark a routing attempt that failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteDecision {
    pub fraud: Option<bool>,
    pub idv: Option<bool>,
    pub confidence: f64,
    pub routed_at: DateTime<Utc>,
}

impl RouteDecision {
    pub fn new(fraud: bool, idv: bool, confidence: f64) -> Self {
        Self {
            fraud: Some(fraud),
            idv: Some(idv),
            confidence: confidence.clamp(0.0, 1.0),
            routed_at: Utc::now(),
        }
    }

    /// Marker written when routing failed; counts as routed, goes nowhere.
    pub fn failed() -> Self {
        Self {
            fraud: None,
            idv: None,
            confidence: 0.0,
            routed_at: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.fraud.is_none() && self.idv.is_none()
    }

    pub fn flag(&self, track: Track) -> Option<bool> {
        match track {
            Track::Fraud => self.fraud,
            Track::Idv => self.idv,
        }
    }
}

/// Outcome of a unique-key insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// Checkpoint state selector for stage queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Not pre-filtered and not routed: Stage-1 and pre-filter input
    Unrouted,

    /// At least one active route, children not yet fetched
    AwaitingEnrichment,

    /// Routed to the track, enriched, no record for the track yet and
    /// fewer than `max_attempts` recorded classification failures
    ReadyFor { track: Track, max_attempts: u32 },
}

/// Row order for stage queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Natural key ascending
    #[default]
    Key,
    /// Highest score first, key as tie-break
    ScoreDesc,
    /// Uniform random sample
    Random,
}
