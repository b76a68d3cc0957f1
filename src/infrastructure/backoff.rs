//! Exponential Backoff
//!
//! Retry delays for transient failures. The ceiling doubles on every
//! consecutive failure, capped at `max`; each delay is drawn uniformly
//! between `min` and the current ceiling.

use rand::Rng;
use std::time::Duration;

/// Growth factor between consecutive ceilings.
const FACTOR: u32 = 2;

/// Default upper bound on a single retry delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(15 * 60);

/// Exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    /// Create a new backoff. `max` is raised to `min` if smaller.
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            attempt: 0,
        }
    }

    /// Number of delays handed out since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Upper bound for the next delay.
    pub fn ceiling(&self) -> Duration {
        let growth = FACTOR.checked_pow(self.attempt).unwrap_or(u32::MAX);
        self.min
            .checked_mul(growth)
            .map_or(self.max, |d| d.min(self.max))
    }

    /// Draw the next delay and grow the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);

        if ceiling <= self.min {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=ceiling)
    }

    /// Forget previous failures.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}
