//! # Reconnect backoff.
//!
//! [`ReconnectPolicy`] turns an attempt number into a delay: `base × 2^attempt`,
//! clamped to `max`. [`RetryState`] is the per-channel attempt counter that
//! decides, on every close, whether another attempt is scheduled at all.
//!
//! ```rust
//! use std::time::Duration;
//! use livewire_client::{ReconnectPolicy, RetryState};
//!
//! let mut retry = RetryState::new(ReconnectPolicy::default());
//!
//! assert_eq!(retry.on_close(1006), Some(Duration::from_millis(1000)));
//! assert_eq!(retry.on_close(1006), Some(Duration::from_millis(2000)));
//! assert_eq!(retry.on_close(1000), None);
//! ```

use std::time::Duration;

use livewire_core::NORMAL_CLOSURE;
use serde::Deserialize;

/// Reconnect schedule parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect, in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_delay_ms: u64,
    /// Consecutive unexpected closes tolerated before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    /// 1s doubling up to 30s, five attempts.
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay for the given attempt number (0-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
        let millis = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(millis)
    }
}

/// Attempt counter for one channel.
#[derive(Clone, Debug)]
pub struct RetryState {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl RetryState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Reconnects scheduled since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// True once no further reconnect will be scheduled.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    /// A connection opened.
    pub fn on_open(&mut self) {
        self.attempts = 0;
    }

    /// Start over, as on a fresh `connect`.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// A connection closed with `code`.
    ///
    /// Returns the delay before the next attempt, or `None` when the close was
    /// deliberate or the attempt budget is spent.
    pub fn on_close(&mut self, code: u16) -> Option<Duration> {
        if code == NORMAL_CLOSURE || self.is_exhausted() {
            return None;
        }
        let delay = self.policy.delay(self.attempts);
        self.attempts += 1;
        Some(delay)
    }
}
