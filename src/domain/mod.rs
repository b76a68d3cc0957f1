//! Domain Layer
//!
//! Liveness records, identities and the ports the routing core talks to.

pub mod entities;
pub mod ports;
pub mod value_objects;

pub use entities::{GossipRecord, Heartbeat, Record, RecordError, RecordRef, DEFAULT_TTL};
pub use value_objects::{InstanceId, Meta, PeerId};
