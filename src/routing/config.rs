//! Router Configuration
//!
//! Timing knobs for heartbeat emission and table maintenance.

use crate::domain::entities::DEFAULT_TTL;
use crate::infrastructure::backoff::DEFAULT_MAX_BACKOFF;
use std::time::Duration;

/// Default interval between clock ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for a [`Router`](crate::routing::Router).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterConfig {
    /// Lifetime advertised in our heartbeats (default: 10s)
    pub ttl: Duration,

    /// Tick interval of the default system clock (default: 1s)
    pub tick_interval: Duration,

    /// Upper bound on the publish retry delay (default: 15min)
    pub max_backoff: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the heartbeat TTL.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the clock tick interval.
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    /// Set the maximum publish backoff.
    pub fn max_backoff(mut self, max: Duration) -> Self {
        self.max_backoff = max;
        self
    }

    /// Smallest publish retry delay.
    pub fn min_backoff(&self) -> Duration {
        self.ttl / 2
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl.is_zero() {
            return Err(ConfigError::ZeroTtl);
        }
        // Heartbeats carry the ttl in whole milliseconds.
        if self.ttl < Duration::from_millis(1) {
            return Err(ConfigError::SubMillisecondTtl(self.ttl));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTickInterval);
        }
        if self.max_backoff < self.min_backoff() {
            return Err(ConfigError::BackoffTooSmall {
                max: self.max_backoff,
                min: self.min_backoff(),
            });
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("ttl must be non-zero")]
    ZeroTtl,
    #[error("ttl {0:?} is below one millisecond")]
    SubMillisecondTtl(Duration),
    #[error("tick_interval must be non-zero")]
    ZeroTickInterval,
    #[error("max_backoff {max:?} is below ttl/2 ({min:?})")]
    BackoffTooSmall { max: Duration, min: Duration },
}
