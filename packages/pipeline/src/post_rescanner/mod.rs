//! The post rescanner component (spec §4.4), ported from
//! `post_rescanner.PostRescanner`.
//!
//! Consumes `post.rescan` messages (three flavors: `base`, `more`,
//! `continue`), executes the carried API request, and walks the
//! comment tree in the response via
//! [`comment_collector::CommentCollector`]. A `base` message's
//! response additionally carries the updated post metadata, which is
//! written to `updated_posts` and marks the rescan started. A
//! `continue` message's response repeats the thread root, which is
//! stripped before insertion. Any nested `moreComments`/
//! `continueThreads` found are requeued as follow-up messages.

mod comment_collector;

pub use comment_collector::CommentCollector;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use crate::config::PipelineConfig;
use crate::db::TxDb;
use crate::domain::{ApiRequest, PostRescanMessage, PostRescanMessageType, QueuedMethod};
use crate::error::{DbError, PipelineError};
use crate::http::TokenRotatingClient;
use crate::queue::MessageBroker;
use crate::worker::{Component, ConsumerPass};

pub struct PostRescanner {
    pool: PgPool,
    http: Arc<TokenRotatingClient>,
    broker: Arc<dyn MessageBroker>,
    config: PipelineConfig,
}

impl PostRescanner {
    pub fn new(
        pool: PgPool,
        http: Arc<TokenRotatingClient>,
        broker: Arc<dyn MessageBroker>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            pool,
            http,
            broker,
            config,
        }
    }

    async fn handle_base_layer(
        &self,
        response: &Value,
        post_id: &str,
        post_rescan_id: i64,
    ) -> Result<(), PipelineError> {
        let post = response
            .pointer(&format!("/posts/{post_id}"))
            .ok_or_else(|| {
                PipelineError::Fatal(format!("base response missing posts.{post_id}"))
            })?;

        let mut tx = TxDb::begin(&self.pool).await?;
        let updated_posts_table = &self.config.tables.updated_posts;
        let post_rescans_table = &self.config.tables.post_rescans;

        sqlx::query(&format!(
            "INSERT INTO {updated_posts_table} (updated_metadata, post_scan_id) VALUES ($1, $2)"
        ))
        .bind(post)
        .bind(post_rescan_id)
        .execute(tx.as_mut()?)
        .await
        .map_err(DbError::from)?;

        sqlx::query(&format!(
            "UPDATE {post_rescans_table} SET started_at = NOW() WHERE id = $1"
        ))
        .bind(post_rescan_id)
        .execute(tx.as_mut()?)
        .await
        .map_err(DbError::from)?;

        tx.commit().await?;

        Ok(())
    }

    async fn process_found_comments(
        &self,
        mut raw_comments: Vec<Value>,
        more_comments: Vec<Value>,
        continue_threads: Vec<Value>,
        post_rescan_id: i64,
        strip_duplicate_root: bool,
    ) -> Result<(usize, usize), PipelineError> {
        if strip_duplicate_root && !raw_comments.is_empty() {
            raw_comments.remove(0);
        }

        let table = &self.config.tables.scraped_comments;
        let mut tx = TxDb::begin(&self.pool).await?;
        for comment in &raw_comments {
            let id = comment
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| PipelineError::Fatal("comment missing 'id'".to_string()))?;
            let parent_id = comment.get("parentId").and_then(Value::as_str);

            sqlx::query(&format!(
                "INSERT INTO {table} (id, parent_id, comment_data, post_scan_id) \
                 VALUES ($1, $2, $3, $4) ON CONFLICT (id, post_scan_id) DO NOTHING"
            ))
            .bind(id)
            .bind(parent_id)
            .bind(comment)
            .bind(post_rescan_id)
            .execute(tx.as_mut()?)
            .await
            .map_err(DbError::from)?;
        }
        tx.commit().await?;

        let follow_up = more_comments.len() + continue_threads.len();

        for comment in &more_comments {
            let post_id = comment
                .get("postId")
                .and_then(Value::as_str)
                .ok_or_else(|| PipelineError::Fatal("moreComment missing 'postId'".to_string()))?;
            let comment_id = comment
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| PipelineError::Fatal("moreComment missing 'id'".to_string()))?;
            let token = comment.get("token").cloned().unwrap_or(Value::Null);

            let message = PostRescanMessage {
                post_id: post_id.to_string(),
                post_rescans_id: post_rescan_id,
                kind: PostRescanMessageType::More,
                api_request: ApiRequest {
                    url: format!("{}/morecomments/{}", self.config.api_base_url, comment_id),
                    method: QueuedMethod::Post,
                    body: Some(serde_json::json!({ "token": token })),
                },
            };
            self.publish(message).await?;
        }

        for comment in &continue_threads {
            let post_id = comment
                .get("postId")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    PipelineError::Fatal("continueThread missing 'postId'".to_string())
                })?;
            let parent_id = comment
                .get("parentId")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    PipelineError::Fatal("continueThread missing 'parentId'".to_string())
                })?;

            let message = PostRescanMessage {
                post_id: post_id.to_string(),
                post_rescans_id: post_rescan_id,
                kind: PostRescanMessageType::Continue,
                api_request: ApiRequest {
                    url: format!(
                        "{}/postcomments/{}/{}",
                        self.config.api_base_url, post_id, parent_id
                    ),
                    method: QueuedMethod::Get,
                    body: None,
                },
            };
            self.publish(message).await?;
        }

        Ok((raw_comments.len(), follow_up))
    }

    async fn publish(&self, message: PostRescanMessage) -> Result<(), PipelineError> {
        let payload = serde_json::to_vec(&message)
            .map_err(|e| PipelineError::Fatal(format!("failed to serialize message: {e}")))?;
        self.broker
            .publish(&self.config.queues.post_rescan, payload)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Component for PostRescanner {
    fn name(&self) -> &str {
        "post_rescanner"
    }

    fn retry_attempts(&self) -> u32 {
        self.config.retry_attempts
    }

    fn retry_interval(&self) -> std::time::Duration {
        self.config.retry_interval
    }
}

#[async_trait]
impl ConsumerPass for PostRescanner {
    async fn handle_message(&self, payload: &[u8]) -> Result<(), PipelineError> {
        let message: PostRescanMessage = serde_json::from_slice(payload)
            .map_err(|e| PipelineError::Fatal(format!("malformed post.rescan message: {e}")))?;

        tracing::info!(
            post_id = %message.post_id,
            post_rescan_id = message.post_rescans_id,
            kind = ?message.kind,
            "processing post rescan"
        );

        let response = self.http.send_from_message(&message.api_request).await?;
        let (raw_comments, more_comments, continue_threads) =
            CommentCollector::new(&response).collect_comments();

        if matches!(message.kind, PostRescanMessageType::Base) {
            self.handle_base_layer(&response, &message.post_id, message.post_rescans_id)
                .await?;
        }

        let strip_duplicate_root = matches!(message.kind, PostRescanMessageType::Continue);
        let (inserted, queued) = self
            .process_found_comments(
                raw_comments,
                more_comments,
                continue_threads,
                message.post_rescans_id,
                strip_duplicate_root,
            )
            .await?;

        tracing::info!(
            post_id = %message.post_id,
            inserted,
            queued,
            "completed post rescan pass; sleeping before next message"
        );
        tokio::time::sleep(self.config.time_between_post_rescans).await;

        Ok(())
    }
}
