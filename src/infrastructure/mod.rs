//! Infrastructure Layer
//!
//! Cross-cutting concerns and infrastructure components.

pub mod backoff;
pub mod shutdown;

pub use backoff::{Backoff, DEFAULT_MAX_BACKOFF};
pub use shutdown::{shutdown_signal, ShutdownController, TaskGuard};
