//! Bounded exponential backoff for re-subscribing.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub initial: Duration,
    pub max_delay: Duration,
    pub multiplier: u32,
    /// Attempts after the first failure; `0` means give up immediately.
    pub max_attempts: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2,
            max_attempts: 8,
        }
    }
}

impl Backoff {
    pub fn new(initial: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max_delay,
            multiplier: 2,
            max_attempts,
        }
    }

    /// Never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before retry `attempt` (1-based), or `None` once exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = self.multiplier.max(1).saturating_pow(attempt - 1);
        let delay = self.initial.saturating_mul(factor);
        Some(delay.min(self.max_delay))
    }
}
