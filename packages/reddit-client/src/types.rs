use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

/// Bodies Reddit substitutes for content that no longer exists.
pub const TOMBSTONES: [&str; 2] = ["[deleted]", "[removed]"];

/// True for `[deleted]` / `[removed]` (after trimming).
pub fn is_tombstone(text: &str) -> bool {
    TOMBSTONES.contains(&text.trim())
}

/// `{"kind": "Listing", "data": {...}}` envelope.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ListingEnvelope {
    pub data: ListingData,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ListingData {
    #[serde(default)]
    pub children: Vec<Thing>,
    #[serde(default)]
    pub after: Option<String>,
}

/// A listing child tagged with its kind (`t1` comment, `t3` link, `more`, ...).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Thing {
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// One decoded page of a post listing.
#[derive(Debug, Clone, Default)]
pub struct Listing {
    pub posts: Vec<PostData>,
    /// Cursor for the next page, `None` on the last page.
    pub after: Option<String>,
}

/// A `t3` (link/self post) record.
#[derive(Debug, Clone, Deserialize)]
pub struct PostData {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub subreddit: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub upvote_ratio: Option<f64>,
    #[serde(default)]
    pub num_comments: i64,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub permalink: String,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub over_18: bool,
    #[serde(default)]
    pub link_flair_text: Option<String>,
    #[serde(default)]
    pub stickied: bool,
    #[serde(default)]
    pub locked: bool,
}

/// A `t1` comment record.
#[derive(Debug, Clone, Deserialize)]
pub struct CommentData {
    pub id: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub created_utc: f64,
    #[serde(default)]
    pub parent_id: String,
    #[serde(default)]
    pub is_submitter: bool,
    #[serde(default)]
    pub depth: i64,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub stickied: bool,
    #[serde(default)]
    pub distinguished: Option<String>,
}

/// Author with `[deleted]` mapped to `None`.
pub fn live_author(author: Option<&str>) -> Option<String> {
    author.filter(|a| !is_tombstone(a)).map(str::to_string)
}

/// Reddit epoch seconds as UTC.
pub fn epoch_to_utc(secs: f64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs as i64, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tombstones() {
        assert!(is_tombstone("[deleted]"));
        assert!(is_tombstone(" [removed] "));
        assert!(!is_tombstone(""));
        assert!(!is_tombstone("deleted"));
    }

    #[test]
    fn test_live_author() {
        assert_eq!(live_author(Some("[deleted]")), None);
        assert_eq!(live_author(Some("alice")), Some("alice".into()));
        assert_eq!(live_author(None), None);
    }

    #[test]
    fn test_post_defaults_for_sparse_payload() {
        let post: PostData =
            serde_json::from_value(serde_json::json!({"id": "abc", "name": "t3_abc"})).unwrap();
        assert_eq!(post.score, 0);
        assert!(post.selftext.is_empty());
        assert!(post.upvote_ratio.is_none());
    }

    #[test]
    fn test_epoch_to_utc() {
        assert_eq!(epoch_to_utc(1_700_000_000.0).timestamp(), 1_700_000_000);
    }
}
