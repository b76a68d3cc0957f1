//! cluster-router Library
//!
//! Gossip-based cluster membership: every node announces itself with
//! periodic heartbeats and keeps a TTL-evicting, multi-index routing
//! table of its peers.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod routing;

// Re-export commonly used types
pub use config::load_config;
pub use domain::entities::{GossipRecord, Heartbeat, Record, RecordRef, DEFAULT_TTL};
pub use domain::ports::{Clock, Preparer, Topic};
pub use domain::value_objects::{InstanceId, Meta, PeerId};
pub use routing::{
    Constraint, Index, Query, QueryError, Router, RouterConfig, RouterError, RoutingTable, Selector, View,
};
