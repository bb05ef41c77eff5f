//! Bounded exponential backoff for rate-limited LLM calls.
//!
//! The retry loop is a small state machine: every call starts in
//! [`RetryStep::Attempt`], a retryable failure moves to
//! [`RetryStep::Backoff`], and a terminal failure or an exhausted attempt
//! budget moves to [`RetryStep::GiveUp`].

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use super::LlmError;
use crate::config::LlmConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial one).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Backoff is capped here.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

#[derive(Debug)]
pub enum RetryStep {
    /// Issue attempt number `n` (1-based).
    Attempt(u32),
    /// Sleep, then issue `next_attempt`.
    Backoff { next_attempt: u32, delay: Duration },
    /// Stop and surface the error.
    GiveUp(LlmError),
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }

    /// Backoff after the `attempt`-th failure: base × 2^(attempt−1), capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Transition taken when attempt `attempt` failed with `err`.
    pub fn after_failure(&self, attempt: u32, err: LlmError) -> RetryStep {
        if !err.is_retryable() || attempt >= self.max_attempts {
            return RetryStep::GiveUp(err);
        }
        let mut delay = self.delay_for(attempt);
        if let LlmError::RateLimited {
            retry_after_secs: Some(secs),
        } = err
        {
            delay = delay.max(Duration::from_secs(secs)).min(self.max_delay);
        }
        RetryStep::Backoff {
            next_attempt: attempt + 1,
            delay,
        }
    }

    /// Drive `op` through the state machine until it succeeds or gives up.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, LlmError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let mut step = RetryStep::Attempt(1);
        loop {
            step = match step {
                RetryStep::Attempt(attempt) => match op(attempt).await {
                    Ok(value) => return Ok(value),
                    Err(err) => self.after_failure(attempt, err),
                },
                RetryStep::Backoff {
                    next_attempt,
                    delay,
                } => {
                    warn!(
                        attempt = next_attempt,
                        delay_ms = delay.as_millis() as u64,
                        "LLM rate limited, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    RetryStep::Attempt(next_attempt)
                }
                RetryStep::GiveUp(err) => return Err(err),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn rate_limited() -> LlmError {
        LlmError::RateLimited {
            retry_after_secs: None,
        }
    }

    #[test]
    fn test_delay_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(800));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(1_000));
    }

    #[test]
    fn test_gives_up_at_attempt_ceiling() {
        let policy = fast_policy(3);
        assert!(matches!(
            policy.after_failure(2, rate_limited()),
            RetryStep::Backoff { next_attempt: 3, .. }
        ));
        assert!(matches!(
            policy.after_failure(3, rate_limited()),
            RetryStep::GiveUp(LlmError::RateLimited { .. })
        ));
    }

    #[test]
    fn test_terminal_errors_give_up_immediately() {
        let policy = fast_policy(5);
        assert!(matches!(
            policy.after_failure(1, LlmError::EmptyResponse),
            RetryStep::GiveUp(LlmError::EmptyResponse)
        ));
    }

    #[test]
    fn test_retry_after_is_capped() {
        let policy = fast_policy(5);
        let step = policy.after_failure(
            1,
            LlmError::RateLimited {
                retry_after_secs: Some(60),
            },
        );
        match step {
            RetryStep::Backoff { delay, .. } => assert_eq!(delay, Duration::from_millis(4)),
            other => panic!("expected backoff, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = fast_policy(5)
            .run(|attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(rate_limited())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_stops_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = fast_policy(4)
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(rate_limited()) }
            })
            .await;
        assert!(matches!(result, Err(LlmError::RateLimited { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
