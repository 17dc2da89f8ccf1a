//! Retry with exponential backoff for conflicting writes

use crate::error::Result;
use std::time::Duration;

/// Backoff policy for retryable store errors
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retries
    pub max_retries: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,

    /// Whether to add jitter to delays
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay.as_secs_f64());

        let final_delay = if self.jitter {
            // Add up to 25% jitter
            let jitter = rand::random::<f64>() * 0.25 * capped_delay;
            capped_delay + jitter
        } else {
            capped_delay
        };

        Duration::from_secs_f64(final_delay)
    }
}

/// Run `op`, retrying while it fails with a retryable error
pub fn with_retry<T, F>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 0;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "Retrying store write");
                std::thread::sleep(delay);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkflowError;

    #[test]
    fn test_delay_calculation() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(500),
            jitter: false,
            ..Default::default()
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(100),
            jitter: true,
            ..Default::default()
        };
        let delay = policy.delay_for_attempt(0);
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(125));
    }

    #[test]
    fn test_retries_conflicts_then_succeeds() {
        let policy = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        };
        let mut calls = 0;
        let result = with_retry(&policy, || {
            calls += 1;
            if calls < 3 {
                Err(WorkflowError::Concurrency { id: "x".into() })
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn test_does_not_retry_other_errors() {
        let policy = RetryPolicy::default();
        let mut calls = 0;
        let result: Result<()> = with_retry(&policy, || {
            calls += 1;
            Err(WorkflowError::not_found("workflow"))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_gives_up_after_max_retries() {
        let policy = RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            jitter: false,
            ..Default::default()
        };
        let mut calls = 0;
        let result: Result<()> = with_retry(&policy, || {
            calls += 1;
            Err(WorkflowError::Concurrency { id: "x".into() })
        });
        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls, 3);
    }
}
