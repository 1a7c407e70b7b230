//! Retry policy for model endpoint calls.
//!
//! Only transport failures (network, timeout, 429, 5xx) are retried.
//! The loop owns the retry so that backoff sleeps can be cancelled.

use servechat_config::AgentConfig;
use servechat_core::error::ProviderError;
use std::time::Duration;

/// Exponential backoff settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (default 2).
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds (default 1000).
    pub base_delay_ms: u64,
    /// Upper bound on any single delay in milliseconds (default 30000).
    pub max_delay_ms: u64,
    /// Backoff multiplier (default 2.0).
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.retry_base_delay_ms,
            max_delay_ms: config.retry_max_delay_ms,
            ..Self::default()
        }
    }

    /// The delay for a given retry (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let clamped = delay_ms.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(clamped)
    }

    /// The delay before retrying after `error`, honouring a rate-limit hint.
    pub fn delay_after(&self, attempt: u32, error: &ProviderError) -> Duration {
        let backoff = self.delay_for_attempt(attempt);
        match error {
            ProviderError::RateLimited { retry_after_secs } => backoff
                .max(Duration::from_secs(*retry_after_secs))
                .min(Duration::from_millis(self.max_delay_ms)),
            _ => backoff,
        }
    }
}
