//! Child records (comments) attached to items by key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored comment. Items never own their children; look them up by
/// `post_id` when needed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub comment_id: String,
    pub post_id: String,
    pub author: Option<String>,
    pub score: i64,
    pub body: String,
    pub created_utc: DateTime<Utc>,
    pub parent_id: String,

    /// Written by the item's author
    pub is_submitter: bool,

    pub depth: i64,
    pub permalink: Option<String>,
    pub stickied: bool,
    pub distinguished: Option<String>,
}

impl Comment {
    pub fn new(
        comment_id: impl Into<String>,
        post_id: impl Into<String>,
        body: impl Into<String>,
        score: i64,
    ) -> Self {
        Self {
            comment_id: comment_id.into(),
            post_id: post_id.into(),
            author: None,
            score,
            body: body.into(),
            created_utc: DateTime::<Utc>::UNIX_EPOCH,
            parent_id: String::new(),
            is_submitter: false,
            depth: 0,
            permalink: None,
            stickied: false,
            distinguished: None,
        }
    }

    pub fn by_submitter(mut self) -> Self {
        self.is_submitter = true;
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

/// Rank children the way prompts and enrichment want them: the item
/// author's replies first, then by score.
pub fn rank_comments(comments: &mut [Comment]) {
    comments.sort_by(|a, b| {
        b.is_submitter
            .cmp(&a.is_submitter)
            .then(b.score.cmp(&a.score))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_submitter_first_then_score() {
        let mut comments = vec![
            Comment::new("a", "p", "x", 50),
            Comment::new("b", "p", "x", 2).by_submitter(),
            Comment::new("c", "p", "x", 90),
            Comment::new("d", "p", "x", 10).by_submitter(),
        ];
        rank_comments(&mut comments);

        let order: Vec<_> = comments.iter().map(|c| c.comment_id.as_str()).collect();
        assert_eq!(order, vec!["d", "b", "c", "a"]);
    }
}
