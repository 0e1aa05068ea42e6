//! Error taxonomy shared across the HTTP, database, and queue subsystems.
//!
//! Every leaf error maps to one of two roots, `Retryable` or `Fatal`
//! (spec §4.1.2 / §7). The base worker loop only ever inspects that
//! root via [`PipelineError::is_retryable`] — subsystems are free to
//! grow new leaf variants without touching the retry plumbing.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("TLS handshake failed: {0}")]
    Tls(String),
    #[error("failed to decode response body: {0}")]
    Decode(String),
    #[error("redirect loop detected")]
    RedirectLoop,
    #[error("access token not found in homepage response")]
    TokenNotFound,
    #[error("malformed URL: {0}")]
    MalformedUrl(String),
    #[error("unknown request verb")]
    InvalidRequestType,
    #[error("response did not contain the expected shape: {0}")]
    UnexpectedShape(String),
}

impl HttpError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HttpError::Transport(_)
                | HttpError::Timeout
                | HttpError::Tls(_)
                | HttpError::Decode(_)
                | HttpError::RedirectLoop
                | HttpError::TokenNotFound
                | HttpError::UnexpectedShape(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("transient database error: {0}")]
    Operational(String),
    #[error("database driver error: {0}")]
    Driver(String),
    #[error("database handle used after commit/rollback")]
    NotInitialised,
}

impl DbError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DbError::Operational(_))
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                DbError::Operational(err.to_string())
            }
            sqlx::Error::Database(db_err) if is_transient_postgres_error(db_err.code().as_deref()) => {
                DbError::Operational(err.to_string())
            }
            other => DbError::Driver(other.to_string()),
        }
    }
}

/// PostgreSQL error class 08 (connection exception) and 40001/40P01
/// (serialization/deadlock failure) are transient; everything else is
/// treated as a driver-level fatal error.
fn is_transient_postgres_error(code: Option<&str>) -> bool {
    matches!(code, Some(c) if c.starts_with("08") || c == "40001" || c == "40P01")
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("broker connection error: {0}")]
    Connection(String),
    #[error("broker heartbeat failed: {0}")]
    Heartbeat(String),
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("queue '{0}' was not declared for this scope")]
    UnknownQueue(String),
    #[error("duplicate consumer registration for queue '{0}'")]
    DuplicateConsumer(String),
    #[error("failed to route message: {0}")]
    Routing(String),
}

impl QueueError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::Connection(_) | QueueError::Heartbeat(_))
    }
}

impl From<lapin::Error> for QueueError {
    fn from(err: lapin::Error) -> Self {
        QueueError::Connection(err.to_string())
    }
}

/// Crate-wide error used at worker-loop boundaries, unifying the three
/// subsystem taxonomies so `handle_one_pass` can return one type.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Http(#[from] HttpError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error("fatal: {0}")]
    Fatal(String),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Http(e) => e.is_retryable(),
            PipelineError::Db(e) => e.is_retryable(),
            PipelineError::Queue(e) => e.is_retryable(),
            PipelineError::Fatal(_) => false,
        }
    }
}

/// The wrap-and-rethrow pattern from spec §4.1.2: log the original
/// error, then rewrap it as `K` — unless it's already one of the
/// excluded kinds, in which case it propagates unchanged (via `Into`)
/// so a higher-level wrapper can't double-rewrap a retryable as fatal.
pub fn wrap_and_rethrow<T, E, K>(
    result: Result<T, E>,
    context: &'static str,
    wrap: impl FnOnce(String) -> K,
    is_excluded: impl FnOnce(&E) -> bool,
) -> Result<T, K>
where
    E: std::fmt::Display + Into<K>,
{
    match result {
        Ok(value) => Ok(value),
        Err(err) if is_excluded(&err) => {
            tracing::debug!(context, error = %err, "propagating pre-classified error");
            Err(err.into())
        }
        Err(err) => {
            tracing::error!(context, error = %err, "wrapping error");
            Err(wrap(err.to_string()))
        }
    }
}
