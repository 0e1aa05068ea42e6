//! The scheduler component (spec §4.2), ported from
//! `rescan_producer.RescanProducer`.
//!
//! Runs two sub-passes every tick:
//!
//! - **Sub-pass A** — scans `subscriptions` for communities due a
//!   rescan, publishes `community.rescan`, and flags them queued so a
//!   second tick doesn't double-schedule while the scan is in flight.
//! - **Sub-pass B** — scans `post_rescans` for posts whose scheduled
//!   maturity time has passed, publishes the base `post.rescan`
//!   request, and marks them as begun — all inside one transaction, so
//!   a crash between publish and mark-queued can't happen (the original
//!   accepted that race; we close it because `TxDb` makes it cheap to).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;

use crate::config::PipelineConfig;
use crate::db::TxDb;
use crate::domain::{
    ApiRequest, CommunityRescanMessage, PostRescanMessage, PostRescanMessageType, QueuedMethod,
    Subscription,
};
use crate::error::{DbError, PipelineError};
use crate::queue::MessageBroker;
use crate::worker::{Component, ProducerPass};

pub struct Scheduler {
    pool: PgPool,
    broker: Arc<dyn MessageBroker>,
    config: PipelineConfig,
}

impl Scheduler {
    pub fn new(pool: PgPool, broker: Arc<dyn MessageBroker>, config: PipelineConfig) -> Self {
        Self {
            pool,
            broker,
            config,
        }
    }

    async fn produce_community_rescans(&self) -> Result<(), PipelineError> {
        tracing::info!("checking for due community rescans");

        let table = &self.config.tables.subscriptions;
        let subscriptions: Vec<Subscription> =
            sqlx::query_as(&format!("SELECT * FROM {table}"))
                .fetch_all(&self.pool)
                .await
                .map_err(DbError::from)?;

        let now = Utc::now();
        for subscription in subscriptions {
            if !subscription.rescan_required(now) {
                continue;
            }

            let message = CommunityRescanMessage {
                community: subscription.community_name.clone(),
            };
            let payload = serde_json::to_vec(&message)
                .map_err(|e| PipelineError::Fatal(format!("failed to serialize message: {e}")))?;

            self.broker
                .publish(&self.config.queues.community_rescan, payload)
                .await?;

            sqlx::query(&format!(
                "UPDATE {table} SET is_currently_queued = true WHERE community_name = $1"
            ))
            .bind(&subscription.community_name)
            .execute(&self.pool)
            .await
            .map_err(DbError::from)?;

            tracing::debug!(community = %subscription.community_name, "queued community rescan");
        }

        Ok(())
    }

    async fn produce_post_rescans(&self) -> Result<(), PipelineError> {
        tracing::info!("checking for due post rescans");

        let table = &self.config.tables.post_rescans;
        let now = Utc::now();

        let due: Vec<(i64, String)> = sqlx::query_as(&format!(
            "SELECT id, post_id FROM {table} WHERE began_processing = false \
             AND scheduled_start_at <= $1"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::from)?;

        if due.is_empty() {
            return Ok(());
        }

        let mut tx = TxDb::begin(&self.pool).await?;

        for (post_rescan_id, post_id) in due {
            let message = PostRescanMessage {
                post_id: post_id.clone(),
                post_rescans_id: post_rescan_id,
                kind: PostRescanMessageType::Base,
                api_request: ApiRequest::builder()
                    .url(format!("{}/postcomments/{}", self.config.api_base_url, post_id))
                    .method(QueuedMethod::Get)
                    .build(),
            };
            let payload = serde_json::to_vec(&message)
                .map_err(|e| PipelineError::Fatal(format!("failed to serialize message: {e}")))?;

            self.broker
                .publish(&self.config.queues.post_rescan, payload)
                .await?;

            sqlx::query(&format!(
                "UPDATE {table} SET began_processing = true, last_seen = $1 WHERE id = $2"
            ))
            .bind(now)
            .bind(post_rescan_id)
            .execute(tx.as_mut()?)
            .await
            .map_err(DbError::from)?;

            tracing::debug!(post_id = %post_id, post_rescan_id, "queued post rescan");
        }

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl Component for Scheduler {
    fn name(&self) -> &str {
        "scheduler"
    }

    fn retry_attempts(&self) -> u32 {
        self.config.retry_attempts
    }

    fn retry_interval(&self) -> std::time::Duration {
        self.config.retry_interval
    }
}

#[async_trait]
impl ProducerPass for Scheduler {
    async fn handle_one_pass(&self) -> Result<(), PipelineError> {
        self.produce_community_rescans().await?;
        self.produce_post_rescans().await?;
        Ok(())
    }
}
