//! Bounded retry with exponential backoff
//!
//! One policy shape is shared by connection establishment and publish
//! confirmation so both paths back off identically: the wait after the n-th
//! failed attempt (0-indexed) is `base_delay * 2^n`, optionally capped.
//!
//! The caller supplies the retryability classification and an observability
//! hook; the policy itself carries no state beyond its configuration.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Outcome of a retried operation that did not succeed.
#[derive(Error, Debug)]
pub enum RetryError<E: std::error::Error + 'static> {
    /// Every attempt failed; `last` is the final attempt's error.
    #[error("retries exhausted after {attempts} attempts")]
    Exhausted {
        attempts: u32,
        #[source]
        last: E,
    },

    /// A non-retryable error surfaced immediately, without waiting.
    #[error("operation aborted: {0}")]
    Aborted(#[source] E),

    /// The caller cancelled at a retry boundary; remaining attempts skipped.
    #[error("operation cancelled at a retry boundary")]
    Cancelled,
}

/// Exponential-backoff retry policy.
///
/// `max_attempts` counts total operation invocations: a policy with
/// `max_attempts = 5` against an always-failing operation runs it exactly
/// five times. Values below 1 are clamped to 1.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Option<Duration>,
}

impl RetryPolicy {
    /// Create a policy with the given attempt budget and 1s base delay.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs(1),
            max_delay: None,
        }
    }

    /// Set the base delay multiplied by `2^attempt`.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Cap each backoff wait at `max_delay`.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Get the attempt budget.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Backoff wait inserted after the failed attempt number `attempt`
    /// (0-indexed): `base_delay * 2^attempt`, saturating, capped by
    /// `max_delay` when configured. Monotonically non-decreasing.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let wait = self.base_delay.saturating_mul(factor);
        match self.max_delay {
            Some(cap) => wait.min(cap),
            None => wait,
        }
    }

    /// Run `operation` under this policy.
    ///
    /// On failure, `is_retryable` decides whether to retry: non-retryable
    /// errors return [`RetryError::Aborted`] immediately without waiting.
    /// Before each backoff wait, `on_retry` is invoked with the error and the
    /// wait duration. When the attempt budget runs out, the final error is
    /// surfaced as [`RetryError::Exhausted`].
    pub async fn execute<T, E>(
        &self,
        operation: impl AsyncFnMut() -> Result<T, E>,
        is_retryable: impl Fn(&E) -> bool,
        on_retry: impl FnMut(&E, Duration),
    ) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
    {
        self.run(operation, is_retryable, on_retry, None).await
    }

    /// Like [`execute`](Self::execute), but the backoff wait races a
    /// cancellation signal. Cancellation is only observed between attempts;
    /// an in-flight operation is never interrupted.
    pub async fn execute_cancellable<T, E>(
        &self,
        operation: impl AsyncFnMut() -> Result<T, E>,
        is_retryable: impl Fn(&E) -> bool,
        on_retry: impl FnMut(&E, Duration),
        cancel: watch::Receiver<bool>,
    ) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
    {
        self.run(operation, is_retryable, on_retry, Some(cancel)).await
    }

    async fn run<T, E>(
        &self,
        mut operation: impl AsyncFnMut() -> Result<T, E>,
        is_retryable: impl Fn(&E) -> bool,
        mut on_retry: impl FnMut(&E, Duration),
        mut cancel: Option<watch::Receiver<bool>>,
    ) -> Result<T, RetryError<E>>
    where
        E: std::error::Error + 'static,
    {
        if let Some(rx) = cancel.as_ref()
            && *rx.borrow()
        {
            return Err(RetryError::Cancelled);
        }

        let max_attempts = self.max_attempts;
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if !is_retryable(&err) {
                        return Err(RetryError::Aborted(err));
                    }
                    if attempt + 1 >= max_attempts {
                        return Err(RetryError::Exhausted {
                            attempts: max_attempts,
                            last: err,
                        });
                    }

                    let wait = self.backoff(attempt);
                    on_retry(&err, wait);

                    match cancel.as_mut() {
                        None => tokio::time::sleep(wait).await,
                        Some(rx) => {
                            if Self::wait_or_cancel(wait, rx).await {
                                return Err(RetryError::Cancelled);
                            }
                        }
                    }

                    attempt += 1;
                }
            }
        }
    }

    /// Sleep for `wait`, returning true if the cancel signal fired first.
    async fn wait_or_cancel(wait: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
        if *cancel.borrow() {
            return true;
        }

        let sleep = tokio::time::sleep(wait);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return false,
                changed = cancel.changed() => match changed {
                    Ok(()) if *cancel.borrow() => return true,
                    Ok(()) => continue,
                    Err(_) => {
                        // Sender dropped: cancellation can no longer fire.
                        sleep.as_mut().await;
                        return false;
                    }
                },
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_RETRY_COUNT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PublishError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_backoff_is_exponential_in_seconds() {
        let policy = RetryPolicy::new(5);
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(10), Duration::from_secs(1024));
    }

    #[test]
    fn test_backoff_never_decreases() {
        let policy = RetryPolicy::new(5);
        let mut previous = Duration::ZERO;
        for attempt in 0..64 {
            let wait = policy.backoff(attempt);
            assert!(wait >= previous, "backoff decreased at attempt {attempt}");
            previous = wait;
        }
    }

    #[test]
    fn test_backoff_cap() {
        let policy = RetryPolicy::new(5).with_max_delay(Duration::from_secs(4));
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(5), Duration::from_secs(4)); // Capped
    }

    #[test]
    fn test_zero_attempts_clamped_to_one() {
        assert_eq!(RetryPolicy::new(0).max_attempts(), 1);
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::new(5)
            .execute(
                async || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, PublishError>(42)
                },
                PublishError::is_transient,
                |_, _| {},
            )
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_then_succeeds() {
        let calls = AtomicU32::new(0);
        let mut retries = Vec::new();
        let start = Instant::now();

        let result = RetryPolicy::new(5)
            .execute(
                async || {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err(PublishError::socket("reset"))
                    } else {
                        Ok(n)
                    }
                },
                PublishError::is_transient,
                |_, wait| retries.push(wait),
            )
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            retries,
            vec![Duration::from_secs(1), Duration::from_secs(2)]
        );
        // Cumulative wait is the sum of the backoffs before each retry.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_aborts_without_waiting() {
        let calls = AtomicU32::new(0);
        let start = Instant::now();

        let result = RetryPolicy::new(5)
            .execute(
                async || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(PublishError::NotConnected)
                },
                PublishError::is_transient,
                |_, _| {},
            )
            .await;

        assert!(matches!(result, Err(RetryError::Aborted(PublishError::NotConnected))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_surfaces_last_error() {
        let calls = AtomicU32::new(0);

        let result = RetryPolicy::new(3)
            .execute(
                async || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(PublishError::nacked("no route"))
                },
                PublishError::is_retryable_publish,
                |_, _| {},
            )
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 3);
                assert!(matches!(last, PublishError::Nacked(_)));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_at_retry_boundary() {
        let calls = AtomicU32::new(0);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let policy = RetryPolicy::new(5);
        let run = policy.execute_cancellable(
            async || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(PublishError::socket("reset"))
            },
            PublishError::is_transient,
            |_, _| {},
            cancel_rx,
        );
        tokio::pin!(run);

        // Let the first attempt fail and the backoff begin, then cancel.
        tokio::select! {
            biased;
            _ = &mut run => panic!("should still be backing off"),
            _ = tokio::time::sleep(Duration::from_millis(500)) => {}
        }
        cancel_tx.send(true).unwrap();

        let result = run.await;
        assert!(matches!(result, Err(RetryError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_operation() {
        let (_cancel_tx, cancel_rx) = watch::channel(true);

        let result = RetryPolicy::new(5)
            .execute_cancellable(
                async || Ok::<_, PublishError>(()),
                PublishError::is_transient,
                |_, _| {},
                cancel_rx,
            )
            .await;

        assert!(matches!(result, Err(RetryError::Cancelled)));
    }
}
