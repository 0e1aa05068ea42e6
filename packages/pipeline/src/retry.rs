//! Retry policies, ported from `talos.util.decorators` (fixed and
//! exponential retry decorators wrapping `tenacity` in the original).
//!
//! Rust has no decorator syntax, so both policies are plain async
//! functions taking the operation as a closure (spec §9 Design Notes).

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

/// Retries `op` up to `attempts` times with a fixed delay between
/// attempts, retrying only errors for which `is_retryable` returns
/// true. Re-raises the terminal error unchanged once exhausted.
pub async fn retry_fixed<F, Fut, T, E>(
    attempts: u32,
    delay: Duration,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts && is_retryable(&err) => {
                tracing::warn!(
                    attempt,
                    max_attempts = attempts,
                    delay_secs = delay.as_secs(),
                    error = %err,
                    "retrying with fixed duration"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Retries `op` with exponential backoff (doubling from `min_delay`,
/// capped at `max_delay`) until `deadline` has elapsed since the first
/// attempt, retrying only errors for which `is_retryable` returns
/// true. Re-raises the terminal error unchanged once exhausted.
pub async fn retry_exponential<F, Fut, T, E>(
    min_delay: Duration,
    max_delay: Duration,
    deadline: Duration,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) => {
                let elapsed = start.elapsed();
                let next_delay = min_delay
                    .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
                    .min(max_delay);

                if elapsed + next_delay >= deadline {
                    return Err(err);
                }

                tracing::warn!(
                    attempt = attempt + 1,
                    delay_secs = next_delay.as_secs(),
                    elapsed_secs = elapsed.as_secs(),
                    error = %err,
                    "retrying with exponential duration"
                );
                tokio::time::sleep(next_delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
