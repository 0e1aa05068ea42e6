//! Pipeline configuration loaded from environment variables.
//!
//! Every recognized key is validated non-empty at startup; there is no
//! implicit default for anything operationally load-bearing (queue
//! names, table names, tunables) because a silently-wrong value here
//! would misroute messages or target the wrong table.

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Table names are passed in rather than hardcoded so the same binary
/// can run against differently-prefixed schemas per environment.
#[derive(Debug, Clone)]
pub struct TableNames {
    pub subscriptions: String,
    pub community_rescans: String,
    pub initial_posts: String,
    pub post_rescans: String,
    pub updated_posts: String,
    pub scraped_comments: String,
}

#[derive(Debug, Clone)]
pub struct QueueNames {
    pub community_rescan: String,
    pub post_rescan: String,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: String,
    pub amqp_url: String,
    pub amqp_exchange: String,
    pub queues: QueueNames,
    pub tables: TableNames,

    pub startup_sleep: Duration,
    pub rescan_producer_sleep: Duration,
    pub time_between_post_rescans: Duration,

    pub requests_per_token: u32,
    pub max_posts_per_request: u32,
    pub user_agent: String,
    pub homepage_url: String,
    pub api_base_url: String,

    pub retry_attempts: u32,
    pub retry_interval: Duration,

    pub environment: Environment,
    pub component_name: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    ///
    /// Loads a `.env` file if present (development convenience only;
    /// absence is not an error).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            amqp_url: required("AMQP_URL")?,
            amqp_exchange: required("AMQP_EXCHANGE")?,
            queues: QueueNames {
                community_rescan: required("COMMUNITY_RESCAN_QUEUE")?,
                post_rescan: required("POST_RESCAN_QUEUE")?,
            },
            tables: TableNames {
                subscriptions: required("SUBSCRIPTIONS_TABLE")?,
                community_rescans: required("COMMUNITY_RESCANS_TABLE")?,
                initial_posts: required("INITIAL_POSTS_TABLE")?,
                post_rescans: required("POST_RESCANS_TABLE")?,
                updated_posts: required("UPDATED_POSTS_TABLE")?,
                scraped_comments: required("SCRAPED_COMMENTS_TABLE")?,
            },
            startup_sleep: Duration::from_secs(required_parse("STARTUP_SLEEP_TIME_SECS")?),
            rescan_producer_sleep: Duration::from_secs(required_parse(
                "RESCAN_PRODUCER_SLEEP_TIME_SECS",
            )?),
            time_between_post_rescans: Duration::from_secs(required_parse(
                "TIME_BETWEEN_POST_RESCANS_SECS",
            )?),
            requests_per_token: required_parse("REQUESTS_PER_TOKEN")?,
            max_posts_per_request: required_parse("MAX_POSTS_PER_REQUEST")?,
            user_agent: required("USER_AGENT")?,
            homepage_url: required("HOMEPAGE_URL")?,
            api_base_url: required("API_BASE_URL")?,
            retry_attempts: required_parse("RETRY_ATTEMPTS")?,
            retry_interval: Duration::from_secs(required_parse("RETRY_INTERVAL_SECS")?),
            environment: match required("ENVIRONMENT")?.as_str() {
                "production" => Environment::Production,
                _ => Environment::Development,
            },
            component_name: required("COMPONENT_NAME")?,
            log_format: match env::var("LOG_FORMAT").as_deref() {
                Ok("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        })
    }
}

fn required(key: &str) -> Result<String> {
    let value = env::var(key).with_context(|| format!("{key} must be set"))?;
    if value.trim().is_empty() {
        anyhow::bail!("{key} must not be empty");
    }
    Ok(value)
}

fn required_parse<T: std::str::FromStr>(key: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    let raw = required(key)?;
    raw.parse::<T>()
        .map_err(|e| anyhow::anyhow!("{key} must be a valid value: {e}"))
}
