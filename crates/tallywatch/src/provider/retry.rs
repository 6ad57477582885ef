use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ProviderError;

/// Bounded exponential backoff for transient provider failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total calls per job attempt, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0 for the first retry).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u64.saturating_pow(attempt.min(32));
        let delay_ms = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }

    /// Whether a failure on call number `attempt` (1-based) should be retried.
    /// Circuit-open rejections are left to the job queue.
    pub fn should_retry(&self, error: &ProviderError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_attempts
    }

    /// Honors a provider-supplied retry-after when it is longer than the
    /// computed backoff, still within the cap.
    pub fn delay_for(&self, error: &ProviderError, attempt: u32) -> Duration {
        let backoff = self.backoff(attempt);
        match error {
            ProviderError::RateLimited {
                retry_after: Some(after),
            } => (*after)
                .max(backoff)
                .min(Duration::from_millis(self.max_delay_ms)),
            _ => backoff,
        }
    }
}
