//! The community scanner component (spec §4.3), ported from
//! `subreddit_rescanner.SubredditRescanner`.
//!
//! Consumes `community.rescan` messages, pages through the community's
//! newest posts via [`post_collector::PostCollector`] until it hits a
//! post already seen on a prior scan, then writes one `CommunityRescan`
//! row, one `InitialPost` row per new post, and one `PostRescan` row
//! per new post (scheduled for when the post turns mature) — all in a
//! single transaction, matching `TransactionalDatabase` in the
//! original.

mod post_collector;

pub use post_collector::PostCollector;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use crate::config::PipelineConfig;
use crate::db::TxDb;
use crate::domain::{maturity_time, CommunityRescanMessage};
use crate::error::{DbError, PipelineError};
use crate::http::TokenRotatingClient;
use crate::worker::{Component, ConsumerPass};

pub struct CommunityScanner {
    pool: PgPool,
    http: Arc<TokenRotatingClient>,
    config: PipelineConfig,
}

impl CommunityScanner {
    pub fn new(pool: PgPool, http: Arc<TokenRotatingClient>, config: PipelineConfig) -> Self {
        Self { pool, http, config }
    }

    async fn last_seen_post_ids(&self, community: &str) -> Result<Vec<String>, PipelineError> {
        let rescans_table = &self.config.tables.community_rescans;
        let posts_table = &self.config.tables.initial_posts;

        let rows: Vec<(String,)> = sqlx::query_as(&format!(
            "WITH latest_rescan_with_posts AS ( \
                SELECT cr.id AS rescan_id \
                FROM {rescans_table} cr \
                JOIN {posts_table} ip ON cr.id = ip.rescan_id \
                WHERE cr.community_name = $1 \
                GROUP BY cr.id \
                ORDER BY MAX(cr.ran_at) DESC \
                LIMIT 1 \
            ) \
            SELECT ip.id AS post_id \
            FROM latest_rescan_with_posts \
            JOIN {posts_table} ip ON latest_rescan_with_posts.rescan_id = ip.rescan_id"
        ))
        .bind(community)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn persist_rescan(
        &self,
        community: &str,
        posts: Vec<Value>,
    ) -> Result<(), PipelineError> {
        let mut tx = TxDb::begin(&self.pool).await?;
        let now = chrono::Utc::now();

        let rescans_table = &self.config.tables.community_rescans;
        let (rescan_id,): (i64,) = sqlx::query_as(&format!(
            "INSERT INTO {rescans_table} (community_name, ran_at) VALUES ($1, $2) RETURNING id"
        ))
        .bind(community)
        .bind(now)
        .fetch_one(tx.as_mut()?)
        .await
        .map_err(DbError::from)?;

        let posts_table = &self.config.tables.initial_posts;
        let post_rescans_table = &self.config.tables.post_rescans;

        for post in &posts {
            let post_id = post
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| PipelineError::Fatal("post missing 'id' field".to_string()))?
                .to_string();

            sqlx::query(&format!(
                "INSERT INTO {posts_table} (id, metadata, rescan_id) VALUES ($1, $2, $3)"
            ))
            .bind(&post_id)
            .bind(post)
            .bind(rescan_id)
            .execute(tx.as_mut()?)
            .await
            .map_err(DbError::from)?;

            let created_at = post
                .get("createdAt")
                .and_then(Value::as_str)
                .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or(now);
            let scheduled_start_at = maturity_time(created_at, now);

            sqlx::query(&format!(
                "INSERT INTO {post_rescans_table} (scheduled_start_at, post_id, began_processing) \
                 VALUES ($1, $2, false)"
            ))
            .bind(scheduled_start_at)
            .bind(&post_id)
            .execute(tx.as_mut()?)
            .await
            .map_err(DbError::from)?;
        }

        let subscriptions_table = &self.config.tables.subscriptions;
        sqlx::query(&format!(
            "UPDATE {subscriptions_table} SET is_currently_queued = false, last_scanned_at = $1 \
             WHERE community_name = $2"
        ))
        .bind(now)
        .bind(community)
        .execute(tx.as_mut()?)
        .await
        .map_err(DbError::from)?;

        tx.commit().await?;

        tracing::info!(
            community,
            rescan_id,
            posts = posts.len(),
            "community rescan complete"
        );
        Ok(())
    }
}

#[async_trait]
impl Component for CommunityScanner {
    fn name(&self) -> &str {
        "community_scanner"
    }

    fn retry_attempts(&self) -> u32 {
        self.config.retry_attempts
    }

    fn retry_interval(&self) -> std::time::Duration {
        self.config.retry_interval
    }
}

#[async_trait]
impl ConsumerPass for CommunityScanner {
    async fn handle_message(&self, payload: &[u8]) -> Result<(), PipelineError> {
        let message: CommunityRescanMessage = serde_json::from_slice(payload)
            .map_err(|e| PipelineError::Fatal(format!("malformed community.rescan message: {e}")))?;

        tracing::info!(community = %message.community, "received rescan request");

        let stopping_ids = self.last_seen_post_ids(&message.community).await?;
        let posts = PostCollector::new(
            message.community.clone(),
            stopping_ids,
            self.http.clone(),
            self.config.api_base_url.clone(),
            self.config.max_posts_per_request,
        )
        .collect_unseen_posts()
        .await?;

        let post_count = posts.len();
        self.persist_rescan(&message.community, posts).await?;

        tracing::info!(
            community = %message.community,
            posts = post_count,
            "completed rescan"
        );
        Ok(())
    }
}
