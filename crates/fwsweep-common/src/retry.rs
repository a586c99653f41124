//! Bounded retry with backoff for transient connection errors.
//!
//! Only errors reporting [`FirewallError::is_retryable`] are retried;
//! logical errors (not found, permission, malformed payloads) propagate on
//! the first attempt.

use std::time::Duration;

/// Retry policy for individual client calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Base delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Returns the backoff delay before retry number `attempt` (1-based),
    /// exponential with jitter, capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(1u32 << attempt.saturating_sub(1).min(16));
        let capped = exp.min(self.max_delay);
        // Up to 25% jitter so concurrent runs do not retry in lockstep.
        let jitter = capped.mul_f64(rand::random::<f64>() * 0.25);
        capped + jitter
    }
}

/// Retries an awaited client call under a [`RetryPolicy`].
///
/// The call expression is re-evaluated on every attempt:
///
/// ```ignore
/// let object = retry_op!(policy, client.find_object(&id).await)?;
/// ```
#[macro_export]
macro_rules! retry_op {
    ($policy:expr, $call:expr) => {{
        let policy: &$crate::RetryPolicy = &$policy;
        let mut attempt: u32 = 1;
        loop {
            match $call {
                Ok(value) => break Ok(value),
                Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                    let delay = policy.delay_for(attempt);
                    tracing::warn!(
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => break Err(err),
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FirewallError, FirewallResult};

    #[test]
    fn test_delay_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };

        // Jitter adds at most 25%, so bounds are checked loosely.
        assert!(policy.delay_for(1) >= Duration::from_millis(100));
        assert!(policy.delay_for(1) <= Duration::from_millis(125));
        assert!(policy.delay_for(2) >= Duration::from_millis(200));
        assert!(policy.delay_for(4) <= Duration::from_millis(438));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_then_succeeds() {
        let policy = RetryPolicy::default();
        let mut calls = 0u32;

        let result: FirewallResult<u32> = retry_op!(policy, {
            calls += 1;
            if calls < 3 {
                Err(FirewallError::connection("reset"))
            } else {
                Ok(calls)
            }
        });

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 2,
            ..Default::default()
        };
        let mut calls = 0u32;

        let result: FirewallResult<()> = retry_op!(policy, {
            calls += 1;
            Err(FirewallError::connection("reset"))
        });

        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[tokio::test]
    async fn test_logical_errors_never_retried() {
        let policy = RetryPolicy::default();
        let mut calls = 0u32;

        let result: FirewallResult<()> = retry_op!(policy, {
            calls += 1;
            Err(FirewallError::object_not_found("x"))
        });

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
