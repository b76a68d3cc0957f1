//! Preparer Port
//!
//! Hook that stamps deployment-specific data into each heartbeat right
//! before it is emitted.

use crate::domain::entities::Heartbeat;

/// Errors raised by a preparer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("prepare heartbeat: {0}")]
pub struct PrepareError(pub String);

/// Fills in hostname, tags and other metadata before emission.
pub trait Preparer: Send + Sync {
    fn prepare(&self, heartbeat: &mut Heartbeat) -> Result<(), PrepareError>;
}

/// Leaves the heartbeat untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPreparer;

impl Preparer for NoopPreparer {
    fn prepare(&self, _heartbeat: &mut Heartbeat) -> Result<(), PrepareError> {
        Ok(())
    }
}

impl<F> Preparer for F
where
    F: Fn(&mut Heartbeat) -> Result<(), PrepareError> + Send + Sync,
{
    fn prepare(&self, heartbeat: &mut Heartbeat) -> Result<(), PrepareError> {
        self(heartbeat)
    }
}
