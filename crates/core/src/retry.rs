//! Upload retry policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Bounded retry with a fixed delay between attempts.
///
/// `max_attempts` counts every attempt including the first one, so a policy
/// with `max_attempts == 1` never retries. No backoff and no jitter: the
/// delay is the same between every pair of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration) -> CoreResult<Self> {
        if max_attempts == 0 {
            return Err(CoreError::validation("max_attempts must be at least 1"));
        }
        Ok(Self {
            max_attempts,
            delay,
        })
    }

    /// Create a policy with a single attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Check if another attempt is allowed after `attempt` (1-indexed) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Total time spent waiting when every attempt fails.
    pub fn worst_case_wait(&self) -> Duration {
        self.delay
            .saturating_mul(self.max_attempts.saturating_sub(1))
    }
}
