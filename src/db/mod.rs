//! Database connection management and transaction retry policy.

pub mod schema;

pub use schema::init_schema;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::future::Future;
use std::time::Duration;

/// PostgreSQL database connection pool
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        tracing::info!("PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check database health
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// Retry budget for transactions that can deadlock.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    /// Initial backoff, doubled per attempt with jitter.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, backoff: Duration) -> Self {
        Self { retries, backoff }
    }
}

/// Errors that can carry a PostgreSQL deadlock/serialization failure.
pub trait DeadlockAware {
    fn is_deadlock(&self) -> bool;
}

impl DeadlockAware for sqlx::Error {
    fn is_deadlock(&self) -> bool {
        match self.as_database_error().and_then(|e| e.code()) {
            // 40P01 deadlock_detected, 40001 serialization_failure
            Some(code) => code == "40P01" || code == "40001",
            None => false,
        }
    }
}

/// Run `f` until it succeeds, fails with a non-deadlock error, or the retry
/// budget is exhausted. Backoff is exponential from `policy.backoff` with
/// randomized jitter.
pub async fn retry_on_deadlock<T, E, F, Fut>(
    policy: RetryPolicy,
    op: &str,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: DeadlockAware + std::fmt::Display,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_deadlock() && attempt < policy.retries => {
                let backoff = backoff_with_jitter(policy.backoff, attempt);
                tracing::warn!(
                    operation = op,
                    attempt = attempt + 1,
                    backoff_ms = backoff.as_millis() as u64,
                    "deadlock detected, retrying: {err}"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

fn backoff_with_jitter(base: Duration, attempt: u32) -> Duration {
    use rand::Rng;

    let scaled = base.saturating_mul(1u32 << attempt.min(8));
    let jitter_ms = rand::thread_rng().gen_range(0..=scaled.as_millis().max(1) as u64 / 2);
    scaled + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("boom (deadlock={deadlock})")]
    struct FakeError {
        deadlock: bool,
    }

    impl DeadlockAware for FakeError {
        fn is_deadlock(&self) -> bool {
            self.deadlock
        }
    }

    #[tokio::test]
    async fn retries_deadlocks_then_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let result: Result<u32, FakeError> = retry_on_deadlock(policy, "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(FakeError { deadlock: true })
                } else {
                    Ok(n)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(1));

        let result: Result<(), FakeError> = retry_on_deadlock(policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FakeError { deadlock: true }) }
        })
        .await;

        assert!(result.is_err());
        // 1 initial + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_deadlock_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));

        let result: Result<(), FakeError> = retry_on_deadlock(policy, "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(FakeError { deadlock: false }) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_with_attempts() {
        let base = Duration::from_millis(100);
        let first = backoff_with_jitter(base, 0);
        let third = backoff_with_jitter(base, 2);
        assert!(first >= Duration::from_millis(100));
        assert!(third >= Duration::from_millis(400));
    }
}
