//! Exponential backoff with jitter, and the retry and poll loops built on it.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::ProviderError;
use crate::graph::{FailureCause, NodeFailure};

/// Exponential backoff schedule.
///
/// Delay for attempt `n` (zero-based) is `base * 2^n`, capped at `max`, then
/// moved by up to `jitter_percent` in either direction and capped again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    jitter_percent: u8,
}

impl Backoff {
    /// Creates a backoff schedule.
    #[must_use]
    pub const fn new(base: Duration, max: Duration, jitter_percent: u8) -> Self {
        Self {
            base,
            max,
            jitter_percent,
        }
    }

    /// Schedule used between retries of a failed call.
    #[must_use]
    pub const fn for_retries(config: &EngineConfig) -> Self {
        Self::new(
            Duration::from_millis(config.retry_base_ms),
            Duration::from_millis(config.retry_max_ms),
            config.jitter_percent,
        )
    }

    /// Schedule used between polls of an accepted operation.
    #[must_use]
    pub const fn for_polling(config: &EngineConfig) -> Self {
        Self::new(
            Duration::from_millis(config.poll_interval_ms),
            Duration::from_millis(config.poll_max_interval_ms),
            config.jitter_percent,
        )
    }

    /// Returns the un-jittered delay for an attempt.
    #[must_use]
    pub fn nominal(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(31));
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Returns the jittered delay for an attempt.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let nominal = self.nominal(attempt);
        let nominal_ms = u64::try_from(nominal.as_millis()).unwrap_or(u64::MAX);
        let spread = nominal_ms.saturating_mul(u64::from(self.jitter_percent.min(100))) / 100;

        if spread == 0 {
            return nominal;
        }

        let offset = rand::thread_rng().gen_range(0..=spread.saturating_mul(2));
        let jittered = nominal_ms.saturating_sub(spread).saturating_add(offset);
        Duration::from_millis(jittered).min(self.max)
    }

    /// Returns the jittered delay, never below `floor`.
    #[must_use]
    pub fn delay_with_floor(&self, attempt: u32, floor: Option<Duration>) -> Duration {
        let delay = self.delay(attempt);
        floor.map_or(delay, |floor| delay.max(floor))
    }
}

/// Runs provider calls under the retry policy and drives poll loops.
///
/// Every sleep and every in-flight call is abandoned when the token is
/// cancelled.
#[derive(Debug, Clone)]
pub struct Retrier {
    retry: Backoff,
    poll: Backoff,
    max_attempts: u32,
    poll_timeout: Duration,
    cancel: CancellationToken,
}

impl Retrier {
    /// Creates a retrier from engine settings.
    #[must_use]
    pub fn new(config: &EngineConfig, cancel: CancellationToken) -> Self {
        Self {
            retry: Backoff::for_retries(config),
            poll: Backoff::for_polling(config),
            max_attempts: config.max_attempts.max(1),
            poll_timeout: Duration::from_secs(config.poll_timeout_secs),
            cancel,
        }
    }

    /// Sleeps unless cancelled first.
    ///
    /// # Errors
    ///
    /// Returns a `Cancelled` failure if the token fires.
    pub async fn sleep(&self, duration: Duration) -> Result<(), NodeFailure> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(cancelled()),
            () = tokio::time::sleep(duration) => Ok(()),
        }
    }

    /// Calls `op` until it succeeds, fails permanently or runs out of attempts.
    ///
    /// `calls` is incremented once per invocation of `op`.
    ///
    /// # Errors
    ///
    /// Returns the failure to record on the node.
    pub async fn call<T, F, Fut>(&self, label: &str, calls: &mut u32, mut op: F) -> Result<T, NodeFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut attempt = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(cancelled());
            }

            attempt += 1;
            *calls += 1;

            let result = tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(cancelled()),
                result = op() => result,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.retry.delay_with_floor(attempt - 1, e.retry_after());
                    warn!(
                        "{} failed ({}), retrying in {:?} (attempt {}/{})",
                        label, e, delay, attempt, self.max_attempts
                    );
                    self.sleep(delay).await?;
                }
                Err(e) if e.is_retryable() => {
                    return Err(NodeFailure::new(
                        FailureCause::RetriesExhausted,
                        e.kind_name(),
                        format!("{e} (after {attempt} attempts)"),
                    ));
                }
                Err(e) => {
                    return Err(NodeFailure::new(FailureCause::Permanent, e.kind_name(), e.to_string()));
                }
            }
        }
    }

    /// Polls `check` with backoff until it yields a value or the deadline passes.
    ///
    /// `check` returns `Ok(None)` while the operation is still in progress.
    ///
    /// # Errors
    ///
    /// Returns the failure from `check`, or `Cancelled` on cancellation or
    /// deadline.
    pub async fn poll<T, F, Fut>(&self, label: &str, mut check: F) -> Result<T, NodeFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, NodeFailure>>,
    {
        let deadline = Instant::now() + self.poll_timeout;
        let mut round = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(NodeFailure::new(
                    FailureCause::Cancelled,
                    "poll_timeout",
                    format!("{label} did not finish within {:?}", self.poll_timeout),
                ));
            }

            self.sleep(self.poll.delay(round).min(remaining)).await?;
            round += 1;

            if let Some(value) = check().await? {
                return Ok(value);
            }
            debug!("{} still in progress after {} polls", label, round);
        }
    }
}

fn cancelled() -> NodeFailure {
    NodeFailure::new(FailureCause::Cancelled, "cancelled", "Run was cancelled")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorClass;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_config(max_attempts: u32) -> EngineConfig {
        EngineConfig {
            max_attempts,
            retry_base_ms: 1,
            retry_max_ms: 2,
            poll_interval_ms: 1,
            poll_max_interval_ms: 2,
            poll_timeout_secs: 5,
            jitter_percent: 0,
        }
    }

    #[tokio::test]
    async fn test_call_retries_transient_then_succeeds() {
        let retrier = Retrier::new(&fast_config(3), CancellationToken::new());
        let seen = AtomicU32::new(0);
        let mut calls = 0;

        let value = retrier
            .call("op", &mut calls, || {
                let seen = &seen;
                async move {
                    if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(ProviderError::network("reset"))
                    } else {
                        Ok(5)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 5);
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_call_exhausts_retries() {
        let retrier = Retrier::new(&fast_config(3), CancellationToken::new());
        let mut calls = 0;

        let failure = retrier
            .call::<(), _, _>("op", &mut calls, || async {
                Err(ProviderError::Conflict { message: String::from("busy") })
            })
            .await
            .unwrap_err();

        assert_eq!(failure.cause, FailureCause::RetriesExhausted);
        assert_eq!(failure.error_kind, "conflict");
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn test_call_permanent_fails_immediately() {
        let retrier = Retrier::new(&fast_config(5), CancellationToken::new());
        let mut calls = 0;
        let error = ProviderError::QuotaExceeded { message: String::from("cores") };
        assert_eq!(error.class(), ErrorClass::Permanent);

        let failure = retrier
            .call::<(), _, _>("op", &mut calls, || {
                let error = error.clone();
                async move { Err(error) }
            })
            .await
            .unwrap_err();

        assert_eq!(failure.cause, FailureCause::Permanent);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_call() {
        let token = CancellationToken::new();
        token.cancel();
        let retrier = Retrier::new(&fast_config(3), token);
        let mut calls = 0;

        let failure = retrier
            .call("op", &mut calls, || async { Ok::<_, ProviderError>(1) })
            .await
            .unwrap_err();

        assert_eq!(failure.cause, FailureCause::Cancelled);
        assert_eq!(calls, 0);
    }

    #[tokio::test]
    async fn test_poll_until_ready() {
        let retrier = Retrier::new(&fast_config(3), CancellationToken::new());
        let rounds = AtomicU32::new(0);

        let value = retrier
            .poll("op", || {
                let rounds = &rounds;
                async move {
                    let round = rounds.fetch_add(1, Ordering::SeqCst);
                    Ok((round >= 2).then_some(round))
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
    }

    #[tokio::test]
    async fn test_poll_deadline() {
        let mut config = fast_config(3);
        config.poll_timeout_secs = 1;
        config.poll_interval_ms = 400;
        config.poll_max_interval_ms = 400;
        let retrier = Retrier::new(&config, CancellationToken::new());

        let failure = retrier
            .poll::<(), _, _>("op", || async { Ok(None) })
            .await
            .unwrap_err();

        assert_eq!(failure.cause, FailureCause::Cancelled);
        assert_eq!(failure.error_kind, "poll_timeout");
    }

    #[test]
    fn test_nominal_doubles_and_caps() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(500), 0);
        assert_eq!(backoff.nominal(0), Duration::from_millis(100));
        assert_eq!(backoff.nominal(1), Duration::from_millis(200));
        assert_eq!(backoff.nominal(2), Duration::from_millis(400));
        assert_eq!(backoff.nominal(3), Duration::from_millis(500));
        assert_eq!(backoff.nominal(60), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let backoff = Backoff::new(Duration::from_millis(1_000), Duration::from_secs(60), 20);
        for _ in 0..100 {
            let delay = backoff.delay(0);
            assert!(delay >= Duration::from_millis(800), "{delay:?}");
            assert!(delay <= Duration::from_millis(1_200), "{delay:?}");
        }
    }

    #[test]
    fn test_jitter_never_exceeds_cap() {
        let backoff = Backoff::new(Duration::from_millis(1_000), Duration::from_millis(1_000), 50);
        for _ in 0..100 {
            assert!(backoff.delay(5) <= Duration::from_millis(1_000));
        }
    }

    #[test]
    fn test_floor() {
        let backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(100), 0);
        assert_eq!(
            backoff.delay_with_floor(0, Some(Duration::from_secs(2))),
            Duration::from_secs(2)
        );
        assert_eq!(backoff.delay_with_floor(0, None), Duration::from_millis(10));
    }
}
