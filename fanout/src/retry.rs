use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Step-level retry and backoff configuration.
///
/// Every durable step gets at most `max_attempts` executions per
/// invocation attempt. Between failed executions the step sleeps for an
/// exponentially growing delay capped at `max_backoff_ms`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum executions of one step before it is reported as failed.
    pub max_attempts: u16,
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,
    /// Maximum backoff delay in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_backoff_ms: 60_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that executes each step exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// A policy with `max_attempts` executions and no delay between them.
    pub fn immediate(max_attempts: u16) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Whether another execution is allowed after `attempts` failures.
    pub fn should_retry(&self, attempts: u16) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the next execution after `attempts` failed ones.
    pub fn backoff(&self, attempts: u16) -> Duration {
        compute_backoff_delay(attempts, self)
    }
}

/// Computes the delay before retrying a step using exponential backoff.
///
/// Formula: delay = min(base_delay * 2^(attempts-1), max_backoff)
pub fn compute_backoff_delay(attempts: u16, policy: &RetryPolicy) -> Duration {
    if attempts == 0 {
        return Duration::ZERO;
    }

    let exp = attempts.saturating_sub(1) as i32;
    let scaled = (policy.base_delay_ms as f64) * 2f64.powi(exp);
    let capped = scaled.min(policy.max_backoff_ms as f64);

    Duration::from_millis(capped.max(0.0) as u64)
}
