//! Routing
//!
//! Cluster membership core: the routing table, its query DSL, the
//! heartbeat codec and validator, and the router that drives them.

pub mod codec;
pub mod config;
pub mod index;
pub mod query;
pub mod router;
pub mod table;
pub mod validator;

pub use codec::{CodecError, HeartbeatPayload};
pub use config::{ConfigError, RouterConfig, DEFAULT_TICK_INTERVAL};
pub use index::Index;
pub use query::{Constraint, Iter, Query, QueryError, Selector, Snapshot};
pub use router::{Router, RouterBuilder, RouterError, View};
pub use table::{RoutingTable, TableSnapshot};
pub use validator::Validator;
