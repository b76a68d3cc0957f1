//! Heartbeat Wire Format
//!
//! Gossip payload carried by every announcement. Encoded with bincode;
//! decoders ignore trailing bytes so newer senders may append fields.

use crate::domain::entities::{Heartbeat, DEFAULT_TTL};
use crate::domain::value_objects::{InstanceId, Meta};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Heartbeat codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode heartbeat: {0}")]
    Encode(#[source] bincode::Error),
    #[error("decode heartbeat: {0}")]
    Decode(#[source] bincode::Error),
}

/// Logical schema of the gossip payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    /// Milliseconds; zero means "use the default"
    pub ttl_ms: u32,
    pub server: u64,
    pub host: Option<String>,
    pub meta: Vec<String>,
}

impl From<&Heartbeat> for HeartbeatPayload {
    fn from(hb: &Heartbeat) -> Self {
        Self {
            ttl_ms: u32::try_from(hb.ttl().as_millis()).unwrap_or(u32::MAX),
            server: hb.server().get(),
            host: (!hb.host().is_empty()).then(|| hb.host().to_string()),
            meta: hb.meta().fields().to_vec(),
        }
    }
}

impl From<HeartbeatPayload> for Heartbeat {
    fn from(payload: HeartbeatPayload) -> Self {
        let ttl = match payload.ttl_ms {
            0 => DEFAULT_TTL,
            ms => Duration::from_millis(u64::from(ms)),
        };
        let mut hb = Heartbeat::new(ttl, InstanceId::new(payload.server));
        if let Some(host) = payload.host {
            hb.set_host(host);
        }
        hb.set_meta(Meta::from(payload.meta));
        hb
    }
}

/// Serialize a heartbeat for publication.
pub fn encode(hb: &Heartbeat) -> Result<Bytes, CodecError> {
    bincode::serialize(&HeartbeatPayload::from(hb))
        .map(Bytes::from)
        .map_err(CodecError::Encode)
}

/// Parse a gossip payload. A zero TTL is replaced by [`DEFAULT_TTL`].
pub fn decode(data: &[u8]) -> Result<Heartbeat, CodecError> {
    bincode::deserialize::<HeartbeatPayload>(data)
        .map(Heartbeat::from)
        .map_err(CodecError::Decode)
}
