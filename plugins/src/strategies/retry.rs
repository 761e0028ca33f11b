use std::time::Duration;

use harvest_core::config::RetryConfig;
use harvest_core::scheduler::RetryStrategy;

/// `base * 2^(attempt - 1)`, capped at `max_delay_ms`.
pub struct ExponentialBackoff {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

/// `base * attempt`, capped at `max_delay_ms`.
pub struct LinearBackoff {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl ExponentialBackoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

impl LinearBackoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn name(&self) -> &str {
        "exponential-backoff"
    }

    fn next_delay(&self, attempt: u32, _error: &str) -> Option<Duration> {
        let exp = 1u64 << attempt.saturating_sub(1).min(30);
        let delay = self.base_delay_ms.saturating_mul(exp);
        let delay = delay.min(self.max_delay_ms);
        Some(Duration::from_millis(delay))
    }
}

impl RetryStrategy for LinearBackoff {
    fn name(&self) -> &str {
        "linear"
    }

    fn next_delay(&self, attempt: u32, _error: &str) -> Option<Duration> {
        let multiplier = attempt.max(1) as u64;
        let delay = self.base_delay_ms.saturating_mul(multiplier);
        let delay = delay.min(self.max_delay_ms);
        Some(Duration::from_millis(delay))
    }
}
