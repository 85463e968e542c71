//! # Lock Retry
//!
//! Bounded retry of a whole write transaction when SQLite reports the
//! database locked.
//!
//! ## Retry Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  attempt ──► BEGIN IMMEDIATE ... COMMIT                                 │
//! │     │                                                                   │
//! │     ├── Ok / business error ───────────────────────────► return        │
//! │     │                                                                   │
//! │     └── DbError::Busy (waited busy_timeout already)                    │
//! │            │                                                            │
//! │            ▼                                                            │
//! │        next_backoff()                                                   │
//! │            ├── Some(d) → sleep(d) → attempt again                       │
//! │            └── None    → ServiceError::LockTimeout (retryable)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each attempt is a fresh transaction, so nothing from a failed attempt
//! survives into the next one.

use std::future::Future;
use std::time::Instant;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::{debug, warn};

use crate::config::LockRetry;
use crate::error::{ServiceError, ServiceResult};

impl LockRetry {
    /// Creates the exponential backoff configuration.
    fn create_backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            initial_interval: self.initial_backoff,
            max_interval: self.max_backoff,
            multiplier: 2.0,
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        }
    }
}

/// Runs `attempt` until it succeeds, fails with a non-lock error, or the
/// retry budget is spent.
pub async fn with_lock_retry<T, F, Fut>(
    policy: LockRetry,
    operation: &'static str,
    mut attempt: F,
) -> ServiceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ServiceResult<T>>,
{
    let started = Instant::now();
    let mut backoff = policy.create_backoff();
    backoff.reset();
    let mut retries = 0u32;

    loop {
        match attempt().await {
            Err(ServiceError::Db(err)) if err.is_busy() => {
                retries += 1;
                match backoff.next_backoff() {
                    Some(duration) => {
                        warn!(operation, retries, ?duration, error = %err, "Write lock busy, retrying");
                        tokio::time::sleep(duration).await;
                    }
                    None => {
                        let waited = started.elapsed();
                        warn!(operation, retries, ?waited, "Write lock retry budget exhausted");
                        return Err(ServiceError::LockTimeout { operation, waited });
                    }
                }
            }
            other => {
                if retries > 0 {
                    debug!(operation, retries, "Write lock acquired after retry");
                }
                return other;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DbError;
    use fiscal_core::CoreError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast_policy() -> LockRetry {
        LockRetry {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            max_elapsed: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_retries_busy_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_lock_retry(fast_policy(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(DbError::Busy("database is locked".into()).into())
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_business_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: ServiceResult<()> = with_lock_retry(fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::EmptySale("s-1".into()).into()) }
        })
        .await;

        assert!(matches!(result, Err(ServiceError::Core(CoreError::EmptySale(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_is_lock_timeout() {
        let result: ServiceResult<()> = with_lock_retry(fast_policy(), "finalize", || async {
            Err(DbError::Busy("database is locked".into()).into())
        })
        .await;

        match result {
            Err(ServiceError::LockTimeout { operation, .. }) => assert_eq!(operation, "finalize"),
            other => panic!("expected LockTimeout, got {:?}", other),
        }
    }
}
