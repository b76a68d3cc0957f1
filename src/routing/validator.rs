//! Gossip Validator
//!
//! Classifies every inbound heartbeat and feeds accepted ones into the
//! routing table:
//!
//! - `Reject`: malformed envelope or payload
//! - `Ignore`: well-formed but stale (lost the conflict-resolution race)
//! - `Accept`: stored in the table

use crate::domain::entities::RecordRef;
use crate::domain::ports::{Message, MessageValidator, ValidationResult};
use crate::routing::codec;
use crate::routing::table::RoutingTable;
use std::sync::Arc;

/// Width of the transport's sequence counter.
const SEQNO_LEN: usize = 8;

/// Topic validator backed by a routing table.
#[derive(Debug, Clone)]
pub struct Validator {
    table: Arc<RoutingTable>,
}

impl Validator {
    pub fn new(table: Arc<RoutingTable>) -> Self {
        Self { table }
    }
}

impl MessageValidator for Validator {
    fn validate(&self, msg: &Message) -> ValidationResult {
        let seq = match <[u8; SEQNO_LEN]>::try_from(msg.seqno.as_ref()) {
            Ok(raw) => u64::from_be_bytes(raw),
            Err(_) => {
                tracing::debug!(
                    "reject heartbeat from {}: seqno is {} bytes",
                    msg.from,
                    msg.seqno.len()
                );
                return ValidationResult::Reject;
            }
        };

        let heartbeat = match codec::decode(&msg.data) {
            Ok(hb) => hb,
            Err(e) => {
                tracing::debug!("reject heartbeat from {}: {}", msg.from, e);
                return ValidationResult::Reject;
            }
        };

        let record: RecordRef = Arc::new(heartbeat.into_record(msg.from.clone(), seq));
        if self.table.upsert(record) {
            ValidationResult::Accept
        } else {
            tracing::debug!("ignore stale heartbeat from {} seq={}", msg.from, seq);
            ValidationResult::Ignore
        }
    }
}
