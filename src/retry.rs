use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Converts a transient-error-prone async call into a bounded-retry one.
/// Unlike the reference implementation's retry decorator, this never
/// silently substitutes a default value on exhaustion — callers receive
/// the last error and decide for themselves whether skipping the
/// iteration or failing the resync path is correct (§9 "Retry decorator").
pub async fn with_retry<T, E, F, Fut>(attempts: usize, delay: Duration, mut f: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_err = None;
    for attempt in 0..attempts {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                warn!(attempt = attempt + 1, attempts, error = %e, "retryable call failed");
                last_err = Some(e);
                if attempt + 1 < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(last_err.expect("attempts > 0"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicUsize::new(0);
        let result: Result<i32, &str> = with_retry(3, Duration::from_millis(1), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err("transient")
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_budget_and_returns_last_error() {
        let result: Result<i32, &str> = with_retry(2, Duration::from_millis(1), || async { Err("still failing") }).await;
        assert_eq!(result, Err("still failing"));
    }
}
