//! Bounded retry with exponential backoff.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry policy for transient failures: a fixed number of attempts with
/// exponential backoff between them. Backoff waits are cancellable and abort
/// promptly on shutdown.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        assert!(max_attempts > 0, "max_attempts must be greater than 0");
        assert!(
            max_backoff >= initial_backoff,
            "max_backoff must be >= initial_backoff"
        );
        Self {
            max_attempts,
            initial_backoff,
            max_backoff,
        }
    }

    /// Three attempts starting at 100 ms, the envelope used for history
    /// appends and stream sends.
    pub fn standard() -> Self {
        Self::new(3, Duration::from_millis(100), Duration::from_secs(5))
    }

    /// Execute an operation, retrying on any error until attempts are
    /// exhausted or the token is cancelled. Returns the last error on
    /// failure.
    pub async fn run<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        mut operation: F,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 1;

        loop {
            match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        debug!("Operation succeeded on attempt {}", attempt);
                    }
                    return Ok(result);
                }
                Err(err) => {
                    if attempt >= self.max_attempts || cancel.is_cancelled() {
                        warn!("Operation failed after {} attempts: {}", attempt, err);
                        return Err(err);
                    }

                    let backoff = self.backoff_for(attempt);
                    warn!(
                        "Attempt {} failed: {}. Retrying in {:?}",
                        attempt, err, backoff
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => return Err(err),
                        _ = sleep(backoff) => {}
                    }
                    attempt += 1;
                }
            }
        }
    }

    /// Backoff before the attempt following `attempt`:
    /// min(initial * 2^(attempt-1), max).
    fn backoff_for(&self, attempt: u32) -> Duration {
        let millis = (self.initial_backoff.as_millis() as u64)
            .saturating_mul(2_u64.saturating_pow(attempt - 1));
        Duration::from_millis(millis).min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn succeeds_first_try_without_retrying() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(10));
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let result: Result<u32, String> = policy
            .run(&token, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(10));
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let result: Result<u32, String> = policy
            .run(&token, || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(10));
        let calls = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let result: Result<u32, String> = policy
            .run(&token, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("still broken".to_string())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_retrying() {
        let policy = RetryPolicy::new(5, Duration::from_secs(30), Duration::from_secs(60));
        let token = CancellationToken::new();
        token.cancel();

        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<u32, String> = policy
            .run(&token, || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("nope".to_string())
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
