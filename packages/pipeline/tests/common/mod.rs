//! Shared test infrastructure: one Postgres container for the whole
//! integration test binary, migrated once and reused (mirrors the
//! `SharedTestInfra`/`OnceCell` pattern used elsewhere in this codebase
//! for testcontainers-backed tests).

use anyhow::{Context, Result};
use sqlx::PgPool;
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

use talos_core::config::{Environment, LogFormat, PipelineConfig, QueueNames, TableNames};

struct SharedTestInfra {
    db_url: String,
    _postgres: ContainerAsync<Postgres>,
}

static SHARED_INFRA: OnceCell<SharedTestInfra> = OnceCell::const_new();

impl SharedTestInfra {
    async fn init() -> Result<Self> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();

        let postgres = Postgres::default()
            .start()
            .await
            .context("failed to start postgres container")?;

        let host = postgres.get_host().await?;
        let port = postgres.get_host_port_ipv4(5432).await?;
        let db_url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

        let pool = PgPool::connect(&db_url)
            .await
            .context("failed to connect to postgres for migrations")?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run migrations")?;
        pool.close().await;

        Ok(Self {
            db_url,
            _postgres: postgres,
        })
    }
}

/// Returns a fresh connection pool against the shared, already-migrated
/// database. Each test is responsible for truncating the rows it
/// touches before asserting, since the schema itself is shared.
pub async fn test_pool() -> PgPool {
    let infra = SHARED_INFRA
        .get_or_try_init(SharedTestInfra::init)
        .await
        .expect("failed to initialize shared test infrastructure");

    PgPool::connect(&infra.db_url)
        .await
        .expect("failed to connect to shared test database")
}

/// Drops every row from the pipeline's tables. Call this at the start
/// of a test, not the end, so a failed previous test doesn't leave the
/// database dirty for the next one.
pub async fn truncate_all(pool: &PgPool) {
    sqlx::query(
        "TRUNCATE subscriptions, community_rescans, initial_posts, post_rescans, \
         updated_posts, scraped_comments RESTART IDENTITY CASCADE",
    )
    .execute(pool)
    .await
    .expect("failed to truncate tables");
}

/// A minimal, valid [`PipelineConfig`] for tests, with table/queue
/// names matching the default migration and a fast retry/sleep profile
/// so tests don't spend wall-clock time waiting on them.
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        database_url: String::new(),
        amqp_url: String::new(),
        amqp_exchange: "test-exchange".into(),
        queues: QueueNames {
            community_rescan: "community.rescan".into(),
            post_rescan: "post.rescan".into(),
        },
        tables: TableNames {
            subscriptions: "subscriptions".into(),
            community_rescans: "community_rescans".into(),
            initial_posts: "initial_posts".into(),
            post_rescans: "post_rescans".into(),
            updated_posts: "updated_posts".into(),
            scraped_comments: "scraped_comments".into(),
        },
        startup_sleep: std::time::Duration::from_secs(0),
        rescan_producer_sleep: std::time::Duration::from_secs(0),
        time_between_post_rescans: std::time::Duration::from_millis(0),
        requests_per_token: 100,
        max_posts_per_request: 25,
        user_agent: "talos-pipeline-tests/1.0".into(),
        homepage_url: "http://unused.invalid".into(),
        api_base_url: "http://unused.invalid".into(),
        retry_attempts: 1,
        retry_interval: std::time::Duration::from_millis(1),
        environment: Environment::Development,
        component_name: "test".into(),
        log_format: LogFormat::Pretty,
    }
}

/// Inserts a subscription row ready to be picked up by the scheduler.
pub async fn insert_subscription(pool: &PgPool, community: &str, is_currently_queued: bool) {
    sqlx::query(
        "INSERT INTO subscriptions (community_name, is_subscribed, scan_interval_seconds, \
         last_scanned_at, is_currently_queued) VALUES ($1, true, 60, NULL, $2)",
    )
    .bind(community)
    .bind(is_currently_queued)
    .execute(pool)
    .await
    .expect("failed to insert subscription");
}
