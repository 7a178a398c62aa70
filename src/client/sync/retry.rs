//! # Retry Policy
//!
//! Backoff used when fetching authoritative state fails.
//!
//! ## Features
//!
//! - **Exponential Backoff**: `base * 2^attempt`, optionally capped
//! - **Fixed Backoff**: constant interval, mostly useful in tests
//! - **Max Retries**: the first attempt plus at most `max_retries` retries
//!
//! ## Usage
//!
//! ```rust
//! use std::time::Duration;
//! use xfcollab::client::sync::retry::RetryPolicy;
//!
//! let policy = RetryPolicy::exponential(3, Duration::from_millis(1000));
//! assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
//! assert!(policy.should_retry(2));
//! assert!(!policy.should_retry(3));
//! ```

use std::time::Duration;

use crate::shared::config::SyncConfig;

/// Backoff strategy configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffStrategy {
    /// Fixed interval between retries
    Fixed { interval: Duration },
    /// `base * 2^attempt`, never above `max_interval` when set
    Exponential {
        base: Duration,
        max_interval: Option<Duration>,
    },
}

impl BackoffStrategy {
    fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            BackoffStrategy::Fixed { interval } => *interval,
            BackoffStrategy::Exponential { base, max_interval } => {
                let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
                let delay = base.saturating_mul(factor);
                match max_interval {
                    Some(max) => delay.min(*max),
                    None => delay,
                }
            }
        }
    }
}

/// How many times to retry and how long to wait in between
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub strategy: BackoffStrategy,
}

impl RetryPolicy {
    pub fn exponential(max_retries: u32, base: Duration) -> Self {
        Self {
            max_retries,
            strategy: BackoffStrategy::Exponential {
                base,
                max_interval: None,
            },
        }
    }

    pub fn fixed(max_retries: u32, interval: Duration) -> Self {
        Self {
            max_retries,
            strategy: BackoffStrategy::Fixed { interval },
        }
    }

    /// Resync policy derived from configuration
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::exponential(config.resync_max_retries, config.resync_retry_delay)
    }

    /// Delay to wait after the failed attempt with index `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.strategy.delay_for(attempt)
    }

    /// Whether another try is allowed after attempt `attempt` failed
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
