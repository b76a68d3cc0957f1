//! Manual Clock
//!
//! Deterministic clock for tests and simulations. Time only moves when
//! the owner calls [`ManualClock::advance`] or [`ManualClock::set`], and
//! every move is broadcast as a tick.

use crate::domain::ports::Clock;
use crate::infrastructure::shutdown::ShutdownController;
use parking_lot::Mutex;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;

const TICK_CAPACITY: usize = 64;

pub struct ManualClock {
    now: Mutex<SystemTime>,
    ticks: broadcast::Sender<SystemTime>,
    done: ShutdownController,
}

impl ManualClock {
    pub fn new(start: SystemTime) -> Self {
        let (ticks, _) = broadcast::channel(TICK_CAPACITY);
        Self {
            now: Mutex::new(start),
            ticks,
            done: ShutdownController::new(),
        }
    }

    /// Move time forward by `by` and tick. Returns the new time.
    pub fn advance(&self, by: Duration) -> SystemTime {
        let mut now = self.now.lock();
        *now += by;
        self.tick(*now);
        *now
    }

    /// Jump to `t` and tick.
    pub fn set(&self, t: SystemTime) {
        *self.now.lock() = t;
        self.tick(t);
    }

    fn tick(&self, t: SystemTime) {
        if !self.done.is_shutdown() {
            let _ = self.ticks.send(t);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock()
    }

    fn subscribe(&self) -> broadcast::Receiver<SystemTime> {
        self.ticks.subscribe()
    }

    fn done(&self) -> ShutdownController {
        self.done.clone()
    }

    fn stop(&self) {
        self.done.shutdown();
    }
}

impl std::fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualClock")
            .field("now", &self.now())
            .field("stopped", &self.done.is_shutdown())
            .finish()
    }
}
