//! Domain Entities - Core business objects
//!
//! The liveness record and the heartbeat it is built from.
//! They have no external dependencies and contain only business logic.

use crate::domain::value_objects::{InstanceId, Meta, PeerId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default record TTL, substituted when a heartbeat carries a zero TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10);

/// Errors raised when a record cannot produce one of its fields.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    #[error("record has no {0} field")]
    MissingField(&'static str),
    #[error("malformed {field}: {reason}")]
    Malformed { field: &'static str, reason: String },
}

/// A unit of liveness information.
///
/// Records are immutable once constructed. The routing table stores them
/// behind `Arc` and never calls back into them after indexing, except to
/// hand them to readers.
///
/// The `*_bytes` methods are optional fast paths for index key
/// derivation. Implementations that return `None` are indexed from the
/// regular accessors instead.
pub trait Record: fmt::Debug + Send + Sync {
    fn server(&self) -> InstanceId;
    fn peer(&self) -> PeerId;
    fn seq(&self) -> u64;
    fn ttl(&self) -> Duration;
    /// Hostname; an empty string means the record carries none.
    fn host(&self) -> Result<String, RecordError>;
    fn meta(&self) -> Result<Meta, RecordError>;

    fn peer_bytes(&self) -> Option<Vec<u8>> {
        None
    }

    fn server_bytes(&self) -> Option<[u8; 8]> {
        None
    }

    fn host_bytes(&self) -> Option<Vec<u8>> {
        None
    }

    fn meta_bytes(&self) -> Option<Vec<Vec<u8>>> {
        None
    }
}

/// Shared handle to a stored record.
pub type RecordRef = Arc<dyn Record>;

/// Heartbeat payload emitted by a router.
///
/// Carries everything a peer needs to build a [`Record`] except the
/// sender identity and sequence number, which the transport supplies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    ttl: Duration,
    server: InstanceId,
    host: String,
    meta: Meta,
}

impl Heartbeat {
    /// Create a heartbeat with no host and no meta.
    pub fn new(ttl: Duration, server: InstanceId) -> Self {
        Self {
            ttl,
            server,
            host: String::new(),
            meta: Meta::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn server(&self) -> InstanceId {
        self.server
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }

    pub fn set_host(&mut self, host: impl Into<String>) {
        self.host = host.into();
    }

    pub fn set_meta(&mut self, meta: Meta) {
        self.meta = meta;
    }

    /// Bind the heartbeat to its sender, producing a storable record.
    pub fn into_record(self, peer: PeerId, seq: u64) -> GossipRecord {
        GossipRecord {
            peer,
            seq,
            heartbeat: self,
        }
    }
}

/// A heartbeat bound to the transport-level sender and sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GossipRecord {
    peer: PeerId,
    seq: u64,
    heartbeat: Heartbeat,
}

impl GossipRecord {
    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }
}

impl Record for GossipRecord {
    fn server(&self) -> InstanceId {
        self.heartbeat.server
    }

    fn peer(&self) -> PeerId {
        self.peer.clone()
    }

    fn seq(&self) -> u64 {
        self.seq
    }

    fn ttl(&self) -> Duration {
        self.heartbeat.ttl
    }

    fn host(&self) -> Result<String, RecordError> {
        Ok(self.heartbeat.host.clone())
    }

    fn meta(&self) -> Result<Meta, RecordError> {
        Ok(self.heartbeat.meta.clone())
    }

    fn peer_bytes(&self) -> Option<Vec<u8>> {
        Some(self.peer.as_bytes().to_vec())
    }

    fn server_bytes(&self) -> Option<[u8; 8]> {
        Some(self.heartbeat.server.to_be_bytes())
    }

    fn host_bytes(&self) -> Option<Vec<u8>> {
        Some(self.heartbeat.host.as_bytes().to_vec())
    }
}
