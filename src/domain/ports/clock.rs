//! Clock Port
//!
//! Abstracts wall-clock ticking so the router and routing table can be
//! driven deterministically in tests and shut down cleanly.

use crate::infrastructure::shutdown::ShutdownController;
use std::time::SystemTime;
use tokio::sync::broadcast;

/// A ticking clock with an explicit lifetime.
pub trait Clock: Send + Sync {
    /// Current time as seen by this clock.
    fn now(&self) -> SystemTime;

    /// Receive every subsequent tick.
    fn subscribe(&self) -> broadcast::Receiver<SystemTime>;

    /// Lifetime signal; closed once the clock is stopped.
    fn done(&self) -> ShutdownController;

    /// Stop ticking. The lifetime signal is closed before this returns.
    fn stop(&self);
}
