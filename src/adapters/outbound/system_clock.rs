//! System Clock
//!
//! Wall-clock ticker. A background task broadcasts `SystemTime::now()`
//! every interval until the clock is stopped.

use crate::domain::ports::Clock;
use crate::infrastructure::shutdown::ShutdownController;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

const TICK_CAPACITY: usize = 16;

/// Clock backed by the operating system's wall clock.
///
/// The ticker starts on the first [`Clock::subscribe`], which must be
/// called from within a Tokio runtime.
pub struct SystemClock {
    interval: Duration,
    ticks: broadcast::Sender<SystemTime>,
    done: ShutdownController,
    started: AtomicBool,
}

impl SystemClock {
    pub fn new(interval: Duration) -> Self {
        let (ticks, _) = broadcast::channel(TICK_CAPACITY);
        Self {
            interval,
            ticks,
            done: ShutdownController::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) || self.done.is_shutdown() {
            return;
        }
        let ticks = self.ticks.clone();
        let done = self.done.clone();
        let period = self.interval;
        tokio::spawn(async move { run_ticker(period, ticks, done).await });
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
async fn run_ticker(period: Duration, ticks: broadcast::Sender<SystemTime>, done: ShutdownController) {
    let _guard = done.task_guard();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = interval.tick() => {
                // No subscribers is fine.
                let _ = ticks.send(SystemTime::now());
            }
        }
    }
    tracing::debug!("system clock stopped");
}

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn subscribe(&self) -> broadcast::Receiver<SystemTime> {
        let rx = self.ticks.subscribe();
        self.start();
        rx
    }

    fn done(&self) -> ShutdownController {
        self.done.clone()
    }

    fn stop(&self) {
        self.done.shutdown();
    }
}

impl std::fmt::Debug for SystemClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemClock")
            .field("interval", &self.interval)
            .field("stopped", &self.done.is_shutdown())
            .finish()
    }
}
