//! Database lock retry
//!
//! The SQLite backend is shared by the request handlers and the background
//! poller, so writes occasionally hit `database is locked`. Those are retried
//! with exponential backoff; every other error is returned at once.

use stagelab_common::{Error, Result};
use std::time::{Duration, Instant};

/// Upper bound on time spent retrying one operation
pub const DEFAULT_MAX_LOCK_WAIT: Duration = Duration::from_millis(5000);

const INITIAL_BACKOFF_MS: u64 = 10;
const MAX_BACKOFF_MS: u64 = 1000;

/// True for SQLite busy/locked errors
pub fn is_lock_error(err: &Error) -> bool {
    match err {
        Error::Database(db_err) => {
            let message = db_err.to_string();
            message.contains("database is locked") || message.contains("database table is locked")
        }
        _ => false,
    }
}

/// Retry a database operation with exponential backoff until `max_wait` elapses
///
/// **Algorithm:**
/// 1. Attempt operation
/// 2. Success → return result
/// 3. Lock error within `max_wait` → warn, sleep (10ms doubling to 1s), retry
/// 4. Lock error past `max_wait` → [`Error::Internal`]
/// 5. Any other error → return immediately
pub async fn retry_on_lock<F, Fut, T>(
    operation_name: &str,
    max_wait: Duration,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let start_time = Instant::now();
    let mut attempt = 0u32;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::debug!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Database operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(err) if !is_lock_error(&err) => return Err(err),
            Err(_) => {
                let elapsed = start_time.elapsed();
                if elapsed >= max_wait {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Database still locked; giving up"
                    );
                    return Err(Error::Internal(format!(
                        "{}: database locked after {} attempts ({} ms)",
                        operation_name,
                        attempt,
                        elapsed.as_millis()
                    )));
                }

                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    backoff_ms,
                    "Database locked, will retry after backoff"
                );
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let result = retry_on_lock("insert_logs", DEFAULT_MAX_LOCK_WAIT, || async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_non_lock_error_fails_immediately() {
        let mut attempts = 0;
        let result = retry_on_lock("update_item", DEFAULT_MAX_LOCK_WAIT, || {
            attempts += 1;
            async { Err::<(), _>(Error::NotFound("item".into())) }
        })
        .await;

        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_only_database_errors_count_as_locks() {
        assert!(!is_lock_error(&Error::Internal("database is locked".into())));
        assert!(!is_lock_error(&Error::Database(sqlx::Error::RowNotFound)));
    }
}
