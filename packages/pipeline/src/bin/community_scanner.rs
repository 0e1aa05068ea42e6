//! The community scanner binary: consumes `community.rescan` messages.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use talos_core::community_scanner::CommunityScanner;
use talos_core::config::{LogFormat, PipelineConfig};
use talos_core::http::TokenRotatingClient;
use talos_core::queue::AmqpBroker;
use talos_core::worker::ConsumerLoop;

#[tokio::main]
async fn main() -> Result<()> {
    let config = PipelineConfig::from_env().context("failed to load configuration")?;
    init_tracing(&config);

    tracing::info!(component = %config.component_name, "starting community scanner");

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("failed to connect to database")?;

    let queues = [
        config.queues.community_rescan.clone(),
        config.queues.post_rescan.clone(),
    ];
    let broker = AmqpBroker::connect(&config.amqp_url, &config.amqp_exchange, &queues)
        .await
        .context("failed to connect to broker")?;

    let http = Arc::new(TokenRotatingClient::new(
        config.user_agent.clone(),
        config.homepage_url.clone(),
        config.requests_per_token,
    ));

    let startup_sleep = config.startup_sleep;
    let queue_name = config.queues.community_rescan.clone();
    let scanner = Arc::new(CommunityScanner::new(pool, http, config));

    ConsumerLoop::new(scanner, Arc::new(broker), queue_name, startup_sleep)
        .run()
        .await
}

fn init_tracing(config: &PipelineConfig) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,talos_core=debug".into());

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init(),
    }
}
