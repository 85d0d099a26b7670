//! Retry policies and backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What the caller should do once every attempt has failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnExhaust {
    /// The owning agent stops its loop for good (other agents keep running).
    AbortAgent,
    /// Log it, abandon what depended on the call, and carry on next cycle.
    LogAndSkip,
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first (minimum 1).
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub delay: Duration,
    pub on_exhaust: OnExhaust,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::write_back()
    }
}

impl RetryPolicy {
    /// Profile for obtaining the queue handle: effectively unbounded, a few
    /// seconds apart, fatal to the agent when it finally runs out.
    pub fn connection() -> Self {
        Self::fixed(999, Duration::from_secs(3), OnExhaust::AbortAgent)
    }

    /// Profile for write-back edits and bulk actions: three tries, a second apart.
    pub fn write_back() -> Self {
        Self::fixed(3, Duration::from_secs(1), OnExhaust::LogAndSkip)
    }

    /// A policy with fixed delays.
    pub fn fixed(max_attempts: u32, delay: Duration, on_exhaust: OnExhaust) -> Self {
        Self {
            max_attempts,
            delay,
            on_exhaust,
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            Duration::ZERO
        } else {
            self.delay
        }
    }

    /// Whether another attempt is allowed after `attempt` attempts have been made.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts.max(1)
    }
}
