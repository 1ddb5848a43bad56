//! # Conflict Retry
//!
//! Reruns a whole transactional operation when it failed for a reason that
//! a rerun can fix: SQLite reported busy, or a compare-and-swap balance
//! write found the row moved.
//!
//! ```text
//! attempt 1 ──► Err(retryable) ──► sleep(backoff) ──► attempt 2 ──► ...
//!     │                                                    │
//!     └── Ok / Err(not retryable) ──► return               └── max_attempts ──► last error
//! ```
//!
//! The closure must open its own transaction, so every attempt starts from
//! a clean read.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoffBuilder;
use tracing::warn;

use crate::error::EngineResult;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(20),
            max_backoff: Duration::from_millis(500),
        }
    }
}

/// Runs `op` until it succeeds, fails for good, or runs out of attempts.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> EngineResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = EngineResult<T>>,
{
    let mut backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial_backoff)
        .with_max_interval(policy.max_backoff)
        .with_multiplier(2.0)
        .with_max_elapsed_time(None)
        .build();

    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                let delay = backoff.next_backoff().unwrap_or(policy.max_backoff);
                warn!(attempt, ?delay, error = %err, "Retrying after conflict");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}
