//! Listing source seam: cursor-paginated post listings and comment threads.

use async_trait::async_trait;
use reddit_client::{epoch_to_utc, live_author, CommentData, PostData, RedditClient, RedditError};

use crate::error::{SourceError, SourceResult};
use crate::types::{comment::Comment, item::Item};

/// One page request against a listing endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    /// Endpoint path relative to the source root (`/r/Scams/new.json`)
    pub path: String,

    /// Query parameters other than the cursor
    pub params: Vec<(String, String)>,

    /// Opaque cursor from the previous page
    pub after: Option<String>,

    /// Catalog tag recorded on every item from this request
    pub collection_source: String,

    /// Search term, recorded on items found by a search
    pub search_query: Option<String>,
}

impl PageRequest {
    pub fn new(path: impl Into<String>, collection_source: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            params: Vec::new(),
            after: None,
            collection_source: collection_source.into(),
            search_query: None,
        }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.search_query = Some(query.into());
        self
    }

    /// Same request positioned at `after`.
    pub fn at(&self, after: Option<String>) -> Self {
        Self {
            after,
            ..self.clone()
        }
    }

    /// Parameters including the cursor, in wire order.
    pub fn query_pairs(&self) -> Vec<(&str, String)> {
        let mut pairs: Vec<(&str, String)> =
            self.params.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        if let Some(after) = &self.after {
            pairs.push(("after", after.clone()));
        }
        pairs
    }
}

/// A decoded listing page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListingPage {
    pub items: Vec<Item>,
    /// Cursor for the next page; `None` on the last page
    pub after: Option<String>,
}

/// Source of listing pages and comment threads.
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Fetch one page of items.
    async fn fetch_page(&self, request: &PageRequest) -> SourceResult<ListingPage>;

    /// Fetch live comments for an item, in the order the source ranks them.
    async fn fetch_thread(
        &self,
        post_id: &str,
        permalink: &str,
        limit: u32,
    ) -> SourceResult<Vec<Comment>>;
}

#[async_trait]
impl ListingSource for RedditClient {
    async fn fetch_page(&self, request: &PageRequest) -> SourceResult<ListingPage> {
        let listing = self.get_listing(&request.path, &request.query_pairs()).await?;

        Ok(ListingPage {
            items: listing
                .posts
                .into_iter()
                .map(|post| item_from_post(post, request))
                .collect(),
            after: listing.after,
        })
    }

    async fn fetch_thread(
        &self,
        post_id: &str,
        permalink: &str,
        limit: u32,
    ) -> SourceResult<Vec<Comment>> {
        let comments = self.get_thread(permalink, limit).await?;
        Ok(comments
            .into_iter()
            .map(|c| comment_from_data(c, post_id))
            .collect())
    }
}

impl From<RedditError> for SourceError {
    fn from(e: RedditError) -> Self {
        match e {
            RedditError::RateLimited { retry_after } => SourceError::RateLimited { retry_after },
            RedditError::Status { status, body } => SourceError::Http { status, body },
            RedditError::Timeout => SourceError::Timeout,
            RedditError::Network(msg) => SourceError::Network(msg),
            RedditError::Parse(msg) => SourceError::Parse(msg),
        }
    }
}

fn item_from_post(post: PostData, request: &PageRequest) -> Item {
    Item {
        author: live_author(post.author.as_deref()),
        created_utc: epoch_to_utc(post.created_utc),
        post_id: post.id,
        fullname: post.name,
        title: post.title,
        body: post.selftext,
        url: post.url,
        subreddit: post.subreddit,
        score: post.score,
        upvote_ratio: post.upvote_ratio,
        num_comments: post.num_comments,
        permalink: post.permalink,
        is_self: post.is_self,
        over_18: post.over_18,
        flair: post.link_flair_text,
        stickied: post.stickied,
        locked: post.locked,
        collection_source: request.collection_source.clone(),
        search_query: request.search_query.clone(),
        prefiltered: false,
        route: None,
        enriched: false,
    }
}

fn comment_from_data(c: CommentData, post_id: &str) -> Comment {
    Comment {
        author: live_author(c.author.as_deref()),
        created_utc: epoch_to_utc(c.created_utc),
        comment_id: c.id,
        post_id: post_id.to_string(),
        score: c.score,
        body: c.body,
        parent_id: c.parent_id,
        is_submitter: c.is_submitter,
        depth: c.depth,
        permalink: c.permalink,
        stickied: c.stickied,
        distinguished: c.distinguished,
    }
}
