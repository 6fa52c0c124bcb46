//! Bounded retry with exponential backoff for remote calls.
//!
//! Every remote call the engine makes (staged loads, direct submissions,
//! queue replay) goes through [`with_retry`]. The engine cannot tell a
//! transient failure from a permanent one, so all failures are retried up
//! to the cap and the final error is propagated to the caller.

use std::future::Future;

use tracing::{debug, warn};

use crate::config::RetryPolicy;

/// Run `operation` up to `policy.max_attempts` times, sleeping
/// `initial_delay * 2^i` between attempt `i` and `i+1`.
///
/// The last attempt's error is returned as-is; intermediate errors are
/// logged at debug level. Callers that abandon the returned future simply
/// stop the retry loop at its next suspension point; in-flight calls are
/// not forcibly aborted.
pub async fn with_retry<T, E, F, Fut>(mut operation: F, policy: &RetryPolicy) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    warn!(attempt, error = %err, "Remote operation failed; retries exhausted");
                    return Err(err);
                }
                let delay = policy.delay_after(attempt - 1);
                debug!(attempt, ?delay, error = %err, "Remote operation failed; backing off");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::Instant;

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
        }
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<u32, String> = with_retry(
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                }
            },
            &fast_policy(),
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let result: Result<&str, String> = with_retry(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("connection reset".to_string())
                    } else {
                        Ok("loaded")
                    }
                }
            },
            &fast_policy(),
        )
        .await;

        assert_eq!(result.unwrap(), "loaded");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_propagate_final_error() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();

        let start = Instant::now();
        let result: Result<(), String> = with_retry(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("failure {}", n)) }
            },
            &fast_policy(),
        )
        .await;

        // Exactly 3 attempts, final error surfaced
        assert_eq!(result.unwrap_err(), "failure 2");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        // Backoff schedule: 1s after attempt 0, 2s after attempt 1
        assert_eq!(start.elapsed(), Duration::from_millis(3000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_double_each_attempt() {
        let timestamps: Arc<parking_lot::Mutex<Vec<Instant>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorder = timestamps.clone();

        let _: Result<(), &str> = with_retry(
            move || {
                recorder.lock().push(Instant::now());
                async { Err("nope") }
            },
            &RetryPolicy {
                max_attempts: 4,
                initial_delay: Duration::from_millis(100),
            },
        )
        .await;

        let stamps = timestamps.lock();
        assert_eq!(stamps.len(), 4);
        assert_eq!(stamps[1] - stamps[0], Duration::from_millis(100));
        assert_eq!(stamps[2] - stamps[1], Duration::from_millis(200));
        assert_eq!(stamps[3] - stamps[2], Duration::from_millis(400));
    }
}
