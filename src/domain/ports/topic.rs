//! Topic Port
//!
//! Defines the interface the router needs from the pub/sub layer.
//! Topic join, relaying, message authentication and signing all live
//! behind this trait.

use crate::domain::value_objects::PeerId;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// A message delivered by the pub/sub layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Authenticated sender identity
    pub from: PeerId,
    /// Sender's per-subscription counter, 8 bytes big-endian
    pub seqno: Bytes,
    /// Opaque payload
    pub data: Bytes,
}

/// Outcome of validating a message.
///
/// `Ignore` is distinct from `Reject`: the message was well formed but
/// lost a conflict, so it is dropped without penalising the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationResult {
    /// Deliver and propagate
    Accept,
    /// Drop silently
    Ignore,
    /// Drop and report as invalid
    Reject,
}

/// Hook run by the pub/sub layer on every message before delivery.
pub trait MessageValidator: Send + Sync {
    fn validate(&self, msg: &Message) -> ValidationResult;
}

/// Errors raised by a topic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopicError {
    /// The topic (or its owner) has been closed; treated as cancellation.
    #[error("topic closed")]
    Closed,
    #[error("publish failed: {0}")]
    Publish(String),
    #[error("topic is already relaying")]
    AlreadyRelaying,
    #[error("a validator is already registered")]
    ValidatorRegistered,
}

/// Handle to an active relay. Relaying stops when the handle is
/// cancelled or dropped.
pub struct RelayHandle {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl RelayHandle {
    pub fn new<F>(cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stop relaying. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for RelayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayHandle")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// A joined pub/sub topic.
#[async_trait]
pub trait Topic: Send + Sync {
    /// Topic name.
    fn name(&self) -> &str;

    /// Publish a payload to all subscribers.
    async fn publish(&self, data: Bytes) -> Result<(), TopicError>;

    /// Start forwarding gossip on this topic.
    fn relay(&self) -> Result<RelayHandle, TopicError>;

    /// Install the validator run on every incoming message.
    fn register_validator(&self, validator: Arc<dyn MessageValidator>) -> Result<(), TopicError>;

    /// Remove the installed validator, if any.
    fn unregister_validator(&self);
}
