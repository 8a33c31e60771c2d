use crate::{Error, Result};
use core::{future::Future, time::Duration};

/// A fixed-count, fixed-delay retry policy for remote calls.
///
/// The same policy type is used for startup connection attempts, for batch
/// fetches during a refill and for the allocation fallback. Only errors
/// accepted by `retryable` are retried; everything else is returned
/// immediately.
///
/// # Example
///
/// ```
/// use core::time::Duration;
/// use pastid::RetryPolicy;
///
/// let policy = RetryPolicy::new(5, Duration::from_secs(1));
/// assert_eq!(policy.max_attempts, 5);
/// ```
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero behaves like one.
    pub max_attempts: u32,
    /// Pause between consecutive attempts.
    pub delay: Duration,
    /// Decides whether an error is worth another attempt.
    pub retryable: fn(&Error) -> bool,
}

impl RetryPolicy {
    /// Creates a policy that retries transient errors (see
    /// [`Error::is_transient`]).
    pub const fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            retryable: Error::is_transient,
        }
    }

    /// A policy that never retries.
    pub const fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Replaces the retry predicate.
    #[must_use]
    pub const fn with_predicate(mut self, retryable: fn(&Error) -> bool) -> Self {
        self.retryable = retryable;
        self
    }

    /// Runs `op` until it succeeds, returns a non-retryable error, or the
    /// attempt budget is spent. The last error is returned in the latter
    /// case.
    ///
    /// `what` names the operation in log output.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && (self.retryable)(&e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("{what}: attempt {attempt}/{attempts} failed: {e}");
                    #[cfg(not(feature = "tracing"))]
                    let _ = what;
                    attempt += 1;
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_secs(2));
        let started = tokio::time::Instant::now();

        let value = policy
            .run("flaky", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::source_unavailable("connection refused"))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10));

        let err = policy
            .run("down", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::pool_unavailable("timeout"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::PoolUnavailable { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_secs(60));

        let err = policy
            .run("encode", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::IdentifierSpaceExhausted { value: 1, max: 0 })
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::IdentifierSpaceExhausted { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn custom_predicate_overrides_default() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(4, Duration::ZERO).with_predicate(|_| false);

        let _ = policy
            .run("no-retry", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::source_unavailable("down"))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
