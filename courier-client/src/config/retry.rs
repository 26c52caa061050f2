//! Opt-in retry with exponential backoff.
//!
//! The channel never retries on its own: a call that failed mid-flight is
//! never resumed. Callers that want retries wrap the whole call in
//! [`retry_with_policy`], which starts a fresh call after each error for
//! which [`ClientError::is_retryable`] holds. Those are transport failures
//! (including connection loss, after which the channel reconnects on the
//! next call) and `Unavailable`, `ResourceExhausted` or `Aborted` statuses.
//!
//! ```ignore
//! use courier_client::{CallOptions, RetryPolicy, retry_with_policy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new().base_delay(Duration::from_millis(100));
//! let response = retry_with_policy(&policy, || {
//!     client.unary(&SEND, &request, CallOptions::new())
//! })
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use crate::ClientError;

/// Default values, following the gRPC connection backoff document.
pub mod defaults {
    use std::time::Duration;

    pub const BASE_DELAY: Duration = Duration::from_secs(1);
    pub const MULTIPLIER: f64 = 1.6;
    /// 0.2 means +/- 20%.
    pub const JITTER: f64 = 0.2;
    pub const MAX_DELAY: Duration = Duration::from_secs(120);
    pub const MAX_RETRIES: u32 = 3;
}

/// How often and how patiently a failed call is started again.
///
/// ```
/// use courier_client::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::new()
///     .max_retries(5)
///     .base_delay(Duration::from_millis(100))
///     .max_delay(Duration::from_secs(30));
/// assert!(policy.validate().is_ok());
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Growth factor between delays. Must be >= 1.0.
    pub multiplier: f64,
    /// Relative jitter between 0.0 and 1.0.
    pub jitter: f64,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Calls started after the first one.
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: defaults::BASE_DELAY,
            multiplier: defaults::MULTIPLIER,
            jitter: defaults::JITTER,
            max_delay: defaults::MAX_DELAY,
            max_retries: defaults::MAX_RETRIES,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that runs the call once.
    pub fn no_retry() -> Self {
        Self::new().max_retries(0)
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Checked by [`validate`](Self::validate).
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Checked by [`validate`](Self::validate).
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.base_delay > self.max_delay {
            Err("base_delay must not exceed max_delay")
        } else if self.multiplier < 1.0 {
            Err("multiplier must be >= 1.0")
        } else if !(0.0..=1.0).contains(&self.jitter) {
            Err("jitter must be between 0.0 and 1.0")
        } else {
            Ok(())
        }
    }

    /// The delays between attempts, one per allowed retry.
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            next: self.base_delay,
            remaining: self.max_retries,
            policy: self.clone(),
        }
    }
}

/// Iterator over retry delays: `base * multiplier^n` capped at `max_delay`,
/// each spread by the policy's jitter. Ends once the retries are used up.
#[derive(Clone, Debug)]
pub struct ExponentialBackoff {
    policy: RetryPolicy,
    next: Duration,
    remaining: u32,
}

impl ExponentialBackoff {
    /// Retries still allowed.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = self.policy.jitter;
        if jitter == 0.0 {
            return delay;
        }
        let factor = 1.0 + rand::random_range(-jitter..=jitter);
        delay.mul_f64(factor).min(self.policy.max_delay)
    }
}

impl Iterator for ExponentialBackoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.remaining = self.remaining.checked_sub(1)?;
        let delay = self.jittered(self.next);
        let max = self.policy.max_delay;
        self.next = Duration::try_from_secs_f64(self.next.as_secs_f64() * self.policy.multiplier)
            .map_or(max, |grown| grown.min(max));
        Some(delay)
    }
}

/// Start `call` until it succeeds, fails with an error that is not
/// retryable, or the policy's retries are used up. The last error is
/// returned.
///
/// An invalid policy fails with [`ClientError::InvalidState`] before the
/// first attempt.
pub async fn retry_with_policy<F, Fut, T>(policy: &RetryPolicy, call: F) -> Result<T, ClientError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    policy.validate().map_err(ClientError::invalid_state)?;

    let mut delays = policy.backoff();
    let mut attempt = 1u32;
    loop {
        let error = match call().await {
            Ok(value) => return Ok(value),
            Err(error) if error.is_retryable() => error,
            Err(error) => return Err(error),
        };
        let Some(delay) = delays.next() else {
            tracing::debug!(error = %error, attempt, "retries exhausted");
            return Err(error);
        };
        tracing::debug!(
            error = %error,
            attempt,
            connection_lost = error.is_connection_lost(),
            delay_ms = delay.as_millis() as u64,
            "call failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_core::Code;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(120));
        assert_eq!(policy.max_retries, 3);
        assert!(policy.validate().is_ok());
        assert_eq!(RetryPolicy::no_retry().backoff().count(), 0);
    }

    #[test]
    fn test_invalid_policies() {
        assert!(RetryPolicy::new().multiplier(0.5).validate().is_err());
        assert!(RetryPolicy::new().jitter(1.5).validate().is_err());
        assert_eq!(
            RetryPolicy::new()
                .base_delay(Duration::from_secs(10))
                .max_delay(Duration::from_secs(1))
                .validate(),
            Err("base_delay must not exceed max_delay")
        );
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let delays: Vec<Duration> = RetryPolicy::new()
            .base_delay(Duration::from_secs(10))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(25))
            .jitter(0.0)
            .max_retries(4)
            .backoff()
            .collect();
        assert_eq!(delays, [10, 20, 25, 25].map(Duration::from_secs));
    }

    #[test]
    fn test_backoff_jitter_stays_in_range() {
        let policy = RetryPolicy::new()
            .base_delay(Duration::from_secs(1))
            .jitter(0.2);
        for _ in 0..50 {
            let delay = policy.backoff().next().unwrap();
            assert!(delay >= Duration::from_millis(800), "{delay:?}");
            assert!(delay <= Duration::from_millis(1200), "{delay:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let attempts = &AtomicU32::new(0);
        let policy = RetryPolicy::new()
            .base_delay(Duration::from_millis(10))
            .jitter(0.0);

        let result = retry_with_policy(&policy, || async move {
            if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(ClientError::connection_lost("connection reset"))
            } else {
                Ok("sent")
            }
        })
        .await;

        assert_eq!(result.unwrap(), "sent");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_error_after_exhaustion() {
        let attempts = &AtomicU32::new(0);
        let policy = RetryPolicy::new()
            .max_retries(2)
            .base_delay(Duration::from_millis(1))
            .jitter(0.0);

        let result = retry_with_policy(&policy, || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(ClientError::application(Code::Unavailable, "down"))
        })
        .await;

        assert_eq!(result.unwrap_err().code(), Code::Unavailable);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_terminal_errors_are_returned_at_once() {
        for error in [
            ClientError::DeadlineExceeded,
            ClientError::Cancelled,
            ClientError::protocol("bad frame"),
            ClientError::application(Code::NotFound, "no such room"),
        ] {
            let attempts = &AtomicU32::new(0);
            let error = &error;
            let result = retry_with_policy(&RetryPolicy::new(), || async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(error.clone())
            })
            .await;
            assert_eq!(result.unwrap_err().code(), error.code());
            assert_eq!(attempts.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn test_invalid_policy_fails_before_first_attempt() {
        let attempts = &AtomicU32::new(0);
        let policy = RetryPolicy::new().jitter(2.0);
        let result = retry_with_policy(&policy, || async move {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ClientError::InvalidState(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }
}
