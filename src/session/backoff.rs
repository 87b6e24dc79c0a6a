//! Reconnect delay schedule.

use std::time::Duration;

use crate::config::BackoffConfig;

/// Doubling delay, capped at a maximum and optionally jittered by ±25%.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
    jitter: bool,
}

impl Backoff {
    pub fn new(config: &BackoffConfig) -> Self {
        Self {
            initial: config.initial(),
            max: config.max(),
            current: config.initial(),
            jitter: config.jitter,
        }
    }

    /// Returns the delay before the next attempt and doubles the base.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.current;
        self.current = (self.current * 2).min(self.max);

        let delay = if self.jitter {
            let factor = 0.75 + rand::random::<f64>() * 0.5;
            base.mul_f64(factor)
        } else {
            base
        };
        delay.min(self.max)
    }

    /// Back to the initial delay after a successful connection.
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Whole milliseconds in `delay`, saturating at `u64::MAX`.
pub(crate) fn whole_millis(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}
