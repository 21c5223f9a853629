//! SQLite checkpoint store.
//!
//! The production backend: one file, WAL journal, busy timeout so the
//! worker pools can write concurrently. Every flag write is a single
//! statement guarded by the flag's current value, which keeps the stage
//! flags monotonic without explicit transactions.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;

use crate::error::{PipelineError, Result};
use crate::traits::store::{ChildStore, ClassificationStore, ItemStore, RunLog};
use crate::types::{
    classification::{ClassificationRecord, Track},
    comment::Comment,
    item::{InsertOutcome, Item, Order, RouteDecision, Stage},
    run::{PipelineStats, Run, RunCounts, RunId, RunStatus},
};

/// SQLite-based checkpoint store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `database_url` and run
    /// migrations.
    ///
    /// # Example URLs
    /// - `sqlite://pipeline.db?mode=rwc` - file database, created if missing
    /// - `sqlite::memory:` - ephemeral, see [`SqliteStore::in_memory`]
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(PipelineError::storage)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(PipelineError::storage)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    ///
    /// Uses a single connection: every connection to `:memory:` is its own
    /// database.
    pub async fn in_memory() -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(PipelineError::storage)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(PipelineError::storage)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create tables and indexes. Safe to run repeatedly.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS raw_posts (
                post_id TEXT PRIMARY KEY,
                fullname TEXT NOT NULL,
                title TEXT NOT NULL,
                selftext TEXT NOT NULL DEFAULT '',
                url TEXT NOT NULL DEFAULT '',
                subreddit TEXT NOT NULL,
                author TEXT,
                score INTEGER NOT NULL DEFAULT 0,
                upvote_ratio REAL,
                num_comments INTEGER NOT NULL DEFAULT 0,
                created_utc TEXT NOT NULL,
                permalink TEXT NOT NULL DEFAULT '',
                is_self INTEGER NOT NULL DEFAULT 0,
                over_18 INTEGER NOT NULL DEFAULT 0,
                link_flair_text TEXT,
                stickied INTEGER NOT NULL DEFAULT 0,
                locked INTEGER NOT NULL DEFAULT 0,
                collection_source TEXT NOT NULL,
                search_query TEXT,
                collected_at TEXT NOT NULL,
                prefiltered INTEGER NOT NULL DEFAULT 0,
                routed INTEGER NOT NULL DEFAULT 0,
                is_fraud INTEGER,
                is_idv INTEGER,
                route_confidence REAL,
                routed_at TEXT,
                enriched INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_raw_posts_stage ON raw_posts(prefiltered, routed, enriched);
            CREATE INDEX IF NOT EXISTS idx_raw_posts_subreddit ON raw_posts(subreddit);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS comments (
                comment_id TEXT PRIMARY KEY,
                post_id TEXT NOT NULL,
                author TEXT,
                score INTEGER NOT NULL DEFAULT 0,
                body TEXT NOT NULL,
                created_utc TEXT NOT NULL,
                parent_id TEXT NOT NULL DEFAULT '',
                is_submitter INTEGER NOT NULL DEFAULT 0,
                depth INTEGER NOT NULL DEFAULT 0,
                permalink TEXT,
                stickied INTEGER NOT NULL DEFAULT 0,
                distinguished TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_comments_post_id ON comments(post_id);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        for track in Track::ALL {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    post_id TEXT PRIMARY KEY,
                    is_relevant INTEGER NOT NULL,
                    category TEXT NOT NULL,
                    attributes TEXT NOT NULL DEFAULT '{{}}',
                    tags TEXT NOT NULL DEFAULT '[]',
                    notable_quote TEXT,
                    platform_name TEXT,
                    model TEXT NOT NULL,
                    classified_at TEXT NOT NULL
                );
                "#,
                table = classification_table(track)
            ))
            .execute(&self.pool)
            .await
            .map_err(PipelineError::storage)?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS classification_failures (
                post_id TEXT NOT NULL,
                track TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (post_id, track)
            );

            CREATE TABLE IF NOT EXISTS collection_runs (
                run_id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_type TEXT NOT NULL,
                phase TEXT NOT NULL,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                status TEXT NOT NULL,
                items_processed INTEGER NOT NULL DEFAULT 0,
                items_successful INTEGER NOT NULL DEFAULT 0,
                items_failed INTEGER NOT NULL DEFAULT 0,
                last_error TEXT,
                config_snapshot TEXT NOT NULL DEFAULT '{}'
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn item_exists(&self, post_id: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM raw_posts WHERE post_id = ?")
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PipelineError::storage)?;
        Ok(found.is_some())
    }

    async fn count(&self, sql: &str) -> Result<u64> {
        let n: i64 = sqlx::query_scalar(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(PipelineError::storage)?;
        Ok(n.max(0) as u64)
    }
}

fn classification_table(track: Track) -> &'static str {
    match track {
        Track::Fraud => "fraud_classifications",
        Track::Idv => "idv_classifications",
    }
}

fn route_column(track: Track) -> &'static str {
    match track {
        Track::Fraud => "is_fraud",
        Track::Idv => "is_idv",
    }
}

/// WHERE clause for a stage. `ReadyFor` expects two binds: track, attempts.
fn stage_filter(stage: Stage) -> String {
    match stage {
        Stage::Unrouted => "prefiltered = 0 AND routed = 0".to_string(),
        Stage::AwaitingEnrichment => {
            "routed = 1 AND (is_fraud = 1 OR is_idv = 1) AND enriched = 0".to_string()
        }
        Stage::ReadyFor { track, .. } => format!(
            "{column} = 1 AND enriched = 1 \
             AND NOT EXISTS (SELECT 1 FROM {table} c WHERE c.post_id = raw_posts.post_id) \
             AND COALESCE((SELECT f.attempts FROM classification_failures f \
                 WHERE f.post_id = raw_posts.post_id AND f.track = ?), 0) < ?",
            column = route_column(track),
            table = classification_table(track),
        ),
    }
}

fn order_clause(order: Order) -> &'static str {
    match order {
        Order::Key => "ORDER BY post_id",
        Order::ScoreDesc => "ORDER BY score DESC, post_id",
        Order::Random => "ORDER BY RANDOM()",
    }
}

// Row types for sqlx queries
#[derive(Debug, FromRow)]
struct ItemRow {
    post_id: String,
    fullname: String,
    title: String,
    selftext: String,
    url: String,
    subreddit: String,
    author: Option<String>,
    score: i64,
    upvote_ratio: Option<f64>,
    num_comments: i64,
    created_utc: DateTime<Utc>,
    permalink: String,
    is_self: bool,
    over_18: bool,
    link_flair_text: Option<String>,
    stickied: bool,
    locked: bool,
    collection_source: String,
    search_query: Option<String>,
    prefiltered: bool,
    routed: bool,
    is_fraud: Option<bool>,
    is_idv: Option<bool>,
    route_confidence: Option<f64>,
    routed_at: Option<DateTime<Utc>>,
    enriched: bool,
}

impl ItemRow {
    fn into_item(self) -> Item {
        let route = self.routed.then(|| RouteDecision {
            fraud: self.is_fraud,
            idv: self.is_idv,
            confidence: self.route_confidence.unwrap_or(0.0),
            routed_at: self.routed_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        });

        Item {
            post_id: self.post_id,
            fullname: self.fullname,
            title: self.title,
            body: self.selftext,
            url: self.url,
            subreddit: self.subreddit,
            author: self.author,
            score: self.score,
            upvote_ratio: self.upvote_ratio,
            num_comments: self.num_comments,
            created_utc: self.created_utc,
            permalink: self.permalink,
            is_self: self.is_self,
            over_18: self.over_18,
            flair: self.link_flair_text,
            stickied: self.stickied,
            locked: self.locked,
            collection_source: self.collection_source,
            search_query: self.search_query,
            prefiltered: self.prefiltered,
            route,
            enriched: self.enriched,
        }
    }
}

#[derive(Debug, FromRow)]
struct CommentRow {
    comment_id: String,
    post_id: String,
    author: Option<String>,
    score: i64,
    body: String,
    created_utc: DateTime<Utc>,
    parent_id: String,
    is_submitter: bool,
    depth: i64,
    permalink: Option<String>,
    stickied: bool,
    distinguished: Option<String>,
}

impl CommentRow {
    fn into_comment(self) -> Comment {
        Comment {
            comment_id: self.comment_id,
            post_id: self.post_id,
            author: self.author,
            score: self.score,
            body: self.body,
            created_utc: self.created_utc,
            parent_id: self.parent_id,
            is_submitter: self.is_submitter,
            depth: self.depth,
            permalink: self.permalink,
            stickied: self.stickied,
            distinguished: self.distinguished,
        }
    }
}

#[derive(Debug, FromRow)]
struct ClassificationRow {
    post_id: String,
    is_relevant: bool,
    category: String,
    attributes: String,
    tags: String,
    notable_quote: Option<String>,
    platform_name: Option<String>,
    model: String,
    classified_at: DateTime<Utc>,
}

impl ClassificationRow {
    fn into_record(self, track: Track) -> Result<ClassificationRecord> {
        Ok(ClassificationRecord {
            post_id: self.post_id,
            track,
            is_relevant: self.is_relevant,
            primary: self.category,
            attributes: serde_json::from_str(&self.attributes)?,
            tags: serde_json::from_str(&self.tags)?,
            notable_quote: self.notable_quote,
            platform_name: self.platform_name,
            model: self.model,
            classified_at: self.classified_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RunRow {
    run_id: i64,
    run_type: String,
    phase: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    status: String,
    items_processed: i64,
    items_successful: i64,
    items_failed: i64,
    last_error: Option<String>,
    config_snapshot: String,
}

impl RunRow {
    fn into_run(self) -> Run {
        Run {
            run_id: self.run_id,
            run_type: self.run_type,
            phase: self.phase,
            started_at: self.started_at,
            completed_at: self.completed_at,
            status: RunStatus::parse(&self.status),
            counts: RunCounts::new(
                self.items_processed.max(0) as u64,
                self.items_successful.max(0) as u64,
                self.items_failed.max(0) as u64,
            ),
            last_error: self.last_error,
            config_snapshot: serde_json::from_str(&self.config_snapshot)
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

#[derive(Debug, FromRow)]
struct StatsRow {
    total: i64,
    prefiltered: i64,
    routed: i64,
    unrouted: i64,
    route_errors: i64,
    fraud: i64,
    idv: i64,
    both: i64,
    neither: i64,
    enriched: i64,
}

const ITEM_COLUMNS: &str = "post_id, fullname, title, selftext, url, subreddit, author, score, \
    upvote_ratio, num_comments, created_utc, permalink, is_self, over_18, link_flair_text, \
    stickied, locked, collection_source, search_query, prefiltered, routed, is_fraud, is_idv, \
    route_confidence, routed_at, enriched";

#[async_trait]
impl ItemStore for SqliteStore {
    async fn insert_item(&self, item: &Item) -> Result<InsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO raw_posts (
                post_id, fullname, title, selftext, url, subreddit, author, score,
                upvote_ratio, num_comments, created_utc, permalink, is_self, over_18,
                link_flair_text, stickied, locked, collection_source, search_query, collected_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.post_id)
        .bind(&item.fullname)
        .bind(&item.title)
        .bind(&item.body)
        .bind(&item.url)
        .bind(&item.subreddit)
        .bind(&item.author)
        .bind(item.score)
        .bind(item.upvote_ratio)
        .bind(item.num_comments)
        .bind(item.created_utc)
        .bind(&item.permalink)
        .bind(item.is_self)
        .bind(item.over_18)
        .bind(&item.flair)
        .bind(item.stickied)
        .bind(item.locked)
        .bind(&item.collection_source)
        .bind(&item.search_query)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        Ok(if result.rows_affected() == 1 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::Duplicate
        })
    }

    async fn get_item(&self, post_id: &str) -> Result<Option<Item>> {
        let row = sqlx::query_as::<_, ItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM raw_posts WHERE post_id = ?"
        ))
        .bind(post_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        Ok(row.map(ItemRow::into_item))
    }

    async fn items_for_stage(&self, stage: Stage, limit: usize, order: Order) -> Result<Vec<Item>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM raw_posts WHERE {} {} LIMIT ?",
            stage_filter(stage),
            order_clause(order)
        );
        let mut query = sqlx::query_as::<_, ItemRow>(&sql);
        if let Stage::ReadyFor {
            track,
            max_attempts,
        } = stage
        {
            query = query.bind(track.as_str()).bind(max_attempts as i64);
        }

        let rows = query
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(PipelineError::storage)?;

        Ok(rows.into_iter().map(ItemRow::into_item).collect())
    }

    async fn count_for_stage(&self, stage: Stage) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM raw_posts WHERE {}", stage_filter(stage));
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        if let Stage::ReadyFor {
            track,
            max_attempts,
        } = stage
        {
            query = query.bind(track.as_str()).bind(max_attempts as i64);
        }

        let n = query
            .fetch_one(&self.pool)
            .await
            .map_err(PipelineError::storage)?;
        Ok(n.max(0) as u64)
    }

    async fn mark_prefiltered(&self, post_ids: &[String]) -> Result<usize> {
        let mut changed = 0;
        for post_id in post_ids {
            let result =
                sqlx::query("UPDATE raw_posts SET prefiltered = 1 WHERE post_id = ? AND prefiltered = 0")
                    .bind(post_id)
                    .execute(&self.pool)
                    .await
                    .map_err(PipelineError::storage)?;
            changed += result.rows_affected() as usize;
        }
        Ok(changed)
    }

    async fn set_route(&self, post_id: &str, decision: &RouteDecision) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE raw_posts
            SET routed = 1, is_fraud = ?, is_idv = ?, route_confidence = ?, routed_at = ?
            WHERE post_id = ? AND routed = 0
            "#,
        )
        .bind(decision.fraud)
        .bind(decision.idv)
        .bind(decision.confidence)
        .bind(decision.routed_at)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.item_exists(post_id).await? {
            Ok(false)
        } else {
            Err(PipelineError::ItemNotFound {
                post_id: post_id.to_string(),
            })
        }
    }

    async fn mark_enriched(&self, post_id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE raw_posts SET enriched = 1 WHERE post_id = ? AND enriched = 0")
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(PipelineError::storage)?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.item_exists(post_id).await? {
            Ok(false)
        } else {
            Err(PipelineError::ItemNotFound {
                post_id: post_id.to_string(),
            })
        }
    }

    async fn mark_childless_enriched(&self) -> Result<usize> {
        let result = sqlx::query(
            r#"
            UPDATE raw_posts SET enriched = 1
            WHERE routed = 1 AND (is_fraud = 1 OR is_idv = 1)
              AND enriched = 0 AND num_comments = 0
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        Ok(result.rows_affected() as usize)
    }

    async fn stats(&self, max_item_attempts: u32) -> Result<PipelineStats> {
        let row = sqlx::query_as::<_, StatsRow>(
            r#"
            SELECT
                COUNT(*) AS total,
                COALESCE(SUM(prefiltered), 0) AS prefiltered,
                COALESCE(SUM(routed), 0) AS routed,
                COALESCE(SUM(CASE WHEN routed = 0 AND prefiltered = 0 THEN 1 ELSE 0 END), 0) AS unrouted,
                COALESCE(SUM(CASE WHEN routed = 1 AND is_fraud IS NULL AND is_idv IS NULL THEN 1 ELSE 0 END), 0) AS route_errors,
                COALESCE(SUM(CASE WHEN is_fraud = 1 THEN 1 ELSE 0 END), 0) AS fraud,
                COALESCE(SUM(CASE WHEN is_idv = 1 THEN 1 ELSE 0 END), 0) AS idv,
                COALESCE(SUM(CASE WHEN is_fraud = 1 AND is_idv = 1 THEN 1 ELSE 0 END), 0) AS both,
                COALESCE(SUM(CASE WHEN is_fraud = 0 AND is_idv = 0 THEN 1 ELSE 0 END), 0) AS neither,
                COALESCE(SUM(enriched), 0) AS enriched
            FROM raw_posts
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        let pending = |track: Track| {
            format!(
                "SELECT COUNT(*) FROM raw_posts WHERE {column} = 1 AND enriched = 1 \
                 AND NOT EXISTS (SELECT 1 FROM {table} c WHERE c.post_id = raw_posts.post_id)",
                column = route_column(track),
                table = classification_table(track),
            )
        };

        let ready = |track: Track| Stage::ReadyFor {
            track,
            max_attempts: max_item_attempts,
        };
        let fraud_pending = self.count(&pending(Track::Fraud)).await?;
        let idv_pending = self.count(&pending(Track::Idv)).await?;
        let fraud_ready = self.count_for_stage(ready(Track::Fraud)).await?;
        let idv_ready = self.count_for_stage(ready(Track::Idv)).await?;

        Ok(PipelineStats {
            total: row.total.max(0) as u64,
            prefiltered: row.prefiltered.max(0) as u64,
            routed: row.routed.max(0) as u64,
            unrouted: row.unrouted.max(0) as u64,
            route_errors: row.route_errors.max(0) as u64,
            fraud: row.fraud.max(0) as u64,
            idv: row.idv.max(0) as u64,
            both: row.both.max(0) as u64,
            neither: row.neither.max(0) as u64,
            enriched: row.enriched.max(0) as u64,
            comments: self.count("SELECT COUNT(*) FROM comments").await?,
            fraud_classified: self.count("SELECT COUNT(*) FROM fraud_classifications").await?,
            idv_classified: self.count("SELECT COUNT(*) FROM idv_classifications").await?,
            fraud_ready,
            idv_ready,
            fraud_unclassifiable: fraud_pending.saturating_sub(fraud_ready),
            idv_unclassifiable: idv_pending.saturating_sub(idv_ready),
        })
    }
}

#[async_trait]
impl ChildStore for SqliteStore {
    async fn insert_comments(&self, comments: &[Comment]) -> Result<usize> {
        let mut inserted = 0;
        for comment in comments {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO comments (
                    comment_id, post_id, author, score, body, created_utc, parent_id,
                    is_submitter, depth, permalink, stickied, distinguished
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&comment.comment_id)
            .bind(&comment.post_id)
            .bind(&comment.author)
            .bind(comment.score)
            .bind(&comment.body)
            .bind(comment.created_utc)
            .bind(&comment.parent_id)
            .bind(comment.is_submitter)
            .bind(comment.depth)
            .bind(&comment.permalink)
            .bind(comment.stickied)
            .bind(&comment.distinguished)
            .execute(&self.pool)
            .await
            .map_err(PipelineError::storage)?;

            inserted += result.rows_affected() as usize;
        }
        Ok(inserted)
    }

    async fn top_comments(&self, post_id: &str, limit: usize) -> Result<Vec<Comment>> {
        let rows = sqlx::query_as::<_, CommentRow>(
            r#"
            SELECT comment_id, post_id, author, score, body, created_utc, parent_id,
                   is_submitter, depth, permalink, stickied, distinguished
            FROM comments
            WHERE post_id = ?
            ORDER BY is_submitter DESC, score DESC, comment_id
            LIMIT ?
            "#,
        )
        .bind(post_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        Ok(rows.into_iter().map(CommentRow::into_comment).collect())
    }
}

#[async_trait]
impl ClassificationStore for SqliteStore {
    async fn upsert_classification(&self, record: &ClassificationRecord) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {table} (
                post_id, is_relevant, category, attributes, tags,
                notable_quote, platform_name, model, classified_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(post_id) DO UPDATE SET
                is_relevant = excluded.is_relevant,
                category = excluded.category,
                attributes = excluded.attributes,
                tags = excluded.tags,
                notable_quote = excluded.notable_quote,
                platform_name = excluded.platform_name,
                model = excluded.model,
                classified_at = excluded.classified_at
            "#,
            table = classification_table(record.track)
        );

        sqlx::query(&sql)
            .bind(&record.post_id)
            .bind(record.is_relevant)
            .bind(&record.primary)
            .bind(serde_json::to_string(&record.attributes)?)
            .bind(serde_json::to_string(&record.tags)?)
            .bind(&record.notable_quote)
            .bind(&record.platform_name)
            .bind(&record.model)
            .bind(record.classified_at)
            .execute(&self.pool)
            .await
            .map_err(PipelineError::storage)?;

        Ok(())
    }

    async fn get_classification(
        &self,
        post_id: &str,
        track: Track,
    ) -> Result<Option<ClassificationRecord>> {
        let sql = format!(
            "SELECT post_id, is_relevant, category, attributes, tags, notable_quote, \
             platform_name, model, classified_at FROM {} WHERE post_id = ?",
            classification_table(track)
        );
        let row = sqlx::query_as::<_, ClassificationRow>(&sql)
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(PipelineError::storage)?;

        row.map(|r| r.into_record(track)).transpose()
    }

    async fn record_classification_failure(
        &self,
        post_id: &str,
        track: Track,
        error: &str,
    ) -> Result<u32> {
        let attempts: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO classification_failures (post_id, track, attempts, last_error, updated_at)
            VALUES (?, ?, 1, ?, ?)
            ON CONFLICT(post_id, track) DO UPDATE SET
                attempts = attempts + 1,
                last_error = excluded.last_error,
                updated_at = excluded.updated_at
            RETURNING attempts
            "#,
        )
        .bind(post_id)
        .bind(track.as_str())
        .bind(error)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        Ok(attempts.max(0) as u32)
    }

    async fn classification_failures(&self, post_id: &str, track: Track) -> Result<u32> {
        let attempts: Option<i64> = sqlx::query_scalar(
            "SELECT attempts FROM classification_failures WHERE post_id = ? AND track = ?",
        )
        .bind(post_id)
        .bind(track.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        Ok(attempts.unwrap_or(0).max(0) as u32)
    }
}

#[async_trait]
impl RunLog for SqliteStore {
    async fn open_run(
        &self,
        run_type: &str,
        phase: &str,
        config: &serde_json::Value,
    ) -> Result<RunId> {
        let result = sqlx::query(
            r#"
            INSERT INTO collection_runs (run_type, phase, started_at, status, config_snapshot)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(run_type)
        .bind(phase)
        .bind(Utc::now())
        .bind(RunStatus::Running.as_str())
        .bind(serde_json::to_string(config)?)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        Ok(result.last_insert_rowid())
    }

    async fn close_run(
        &self,
        run_id: RunId,
        counts: RunCounts,
        status: RunStatus,
        last_error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE collection_runs
            SET completed_at = ?, status = ?, items_processed = ?, items_successful = ?,
                items_failed = ?, last_error = ?
            WHERE run_id = ?
            "#,
        )
        .bind(Utc::now())
        .bind(status.as_str())
        .bind(counts.processed as i64)
        .bind(counts.successful as i64)
        .bind(counts.failed as i64)
        .bind(last_error)
        .bind(run_id)
        .execute(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        if result.rows_affected() == 0 {
            return Err(PipelineError::storage(format!("unknown run {run_id}")));
        }
        Ok(())
    }

    async fn get_run(&self, run_id: RunId) -> Result<Option<Run>> {
        let row = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT run_id, run_type, phase, started_at, completed_at, status,
                   items_processed, items_successful, items_failed, last_error, config_snapshot
            FROM collection_runs
            WHERE run_id = ?
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(PipelineError::storage)?;

        Ok(row.map(RunRow::into_run))
    }
}
