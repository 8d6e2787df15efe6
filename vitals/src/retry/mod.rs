//! Retry-with-backoff execution for fallible async operations.
//!
//! Persistence-facing code composes this executor explicitly around its
//! storage calls: there is no interception layer, every retried call site
//! reads as `executor.run("op", ...)`. Errors are classified through
//! [`Error::is_transient`]; transient failures are retried under an
//! exponential backoff with jitter, everything else surfaces immediately.

use std::future::Future;
use std::time::Duration;

use rand::RngExt;
use tracing::warn;

use crate::{Error, Result};

/// Backoff configuration for retried operations.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Total invocation cap, counting the initial attempt.
    pub max_attempts: u32,
    /// Base delay between attempts. Actual delay = base * 2^attempt + jitter.
    pub base_delay: Duration,
    /// Hard cap on the computed delay to prevent unbounded growth.
    pub max_delay: Duration,
    /// When true, adds random jitter of [0, base_delay/2) to spread out
    /// concurrent writers hitting the same busy backend.
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Compute the delay to sleep after a failed attempt (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // 2^attempt is computed with a checked shift so attempts >= 32 saturate
        // instead of overflowing.
        let multiplier = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        let exp_delay = self
            .base_delay
            .checked_mul(multiplier)
            .unwrap_or(self.max_delay);
        let capped = exp_delay.min(self.max_delay);

        if !self.jitter {
            return capped;
        }

        // Jitter is limited so the final delay never exceeds `max_delay`.
        let jitter_range_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX) / 2;
        if jitter_range_ms == 0 {
            return capped;
        }

        let remaining_ms =
            u64::try_from(self.max_delay.saturating_sub(capped).as_millis()).unwrap_or(0);
        let jitter_limit_ms = jitter_range_ms.min(remaining_ms);
        if jitter_limit_ms == 0 {
            return capped;
        }

        let jitter_ms = rand::rng().random_range(0..jitter_limit_ms);
        (capped + Duration::from_millis(jitter_ms)).min(self.max_delay)
    }
}

/// Executes operations under a transient-failure retry policy.
///
/// Each attempt is bounded by `attempt_timeout`; elapsing it counts as a
/// transient failure and feeds the same backoff policy. The wrapped operation
/// must be safe to re-invoke — callers here are append-only inserts, where a
/// rare duplicate after a lost acknowledgement is an accepted trade-off.
#[derive(Debug, Clone)]
pub struct BackoffRetryExecutor {
    policy: BackoffPolicy,
    attempt_timeout: Duration,
}

impl BackoffRetryExecutor {
    /// Create a new executor.
    ///
    /// Returns a configuration error when the policy cannot make a single
    /// attempt or the delay bounds are inverted.
    pub fn new(policy: BackoffPolicy, attempt_timeout: Duration) -> Result<Self> {
        if policy.max_attempts == 0 {
            return Err(Error::config("max_attempts must be at least 1"));
        }
        if policy.base_delay > policy.max_delay {
            return Err(Error::config(format!(
                "backoff base delay {:?} exceeds max delay {:?}",
                policy.base_delay, policy.max_delay
            )));
        }
        if attempt_timeout.is_zero() {
            return Err(Error::config("attempt timeout must be positive"));
        }
        Ok(Self {
            policy,
            attempt_timeout,
        })
    }

    /// The configured backoff policy.
    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, fails permanently, or the attempt cap is hit.
    ///
    /// The closure receives the current attempt number (0-indexed). On a
    /// permanent error the operation is invoked exactly once more than the
    /// number of preceding transient failures — never retried. Exhausting the
    /// cap on transient errors yields [`Error::RetryExhausted`] wrapping the
    /// last transient error.
    pub async fn run<T, F, Fut>(&self, op_name: &'static str, op: F) -> Result<T>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_err: Option<Error> = None;

        for attempt in 0..self.policy.max_attempts {
            let outcome = match tokio::time::timeout(self.attempt_timeout, op(attempt)).await {
                Ok(result) => result,
                Err(_) => Err(Error::StorageTimeout {
                    op: op_name,
                    elapsed: self.attempt_timeout,
                }),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_transient() => return Err(err),
                Err(err) => {
                    if attempt + 1 < self.policy.max_attempts {
                        let delay = self.policy.delay_for_attempt(attempt);
                        warn!(
                            attempt = attempt + 1,
                            max = self.policy.max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Retrying '{}' after transient error",
                            op_name
                        );
                        tokio::time::sleep(delay).await;
                    }
                    last_err = Some(err);
                }
            }
        }

        match last_err {
            Some(source) => Err(Error::RetryExhausted {
                attempts: self.policy.max_attempts,
                source: Box::new(source),
            }),
            // Unreachable: max_attempts >= 1 is enforced in `new`.
            None => Err(Error::config("retry loop made no attempts")),
        }
    }
}
