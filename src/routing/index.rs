//! Routing Table Indexes
//!
//! Each index maps an order-preserving byte key to table entries:
//!
//! | Index    | Key                      | Unique | Prefix queries |
//! |----------|--------------------------|--------|----------------|
//! | `id`     | peer ID bytes            | yes    | yes            |
//! | `server` | instance ID, 8 bytes BE  | yes    | no             |
//! | `host`   | hostname bytes           | no     | yes            |
//! | `meta`   | one `key=value` per key  | no     | yes            |
//! | `ttl`    | deadline, 8 bytes BE     | no     | internal only  |

use crate::domain::entities::Record;
use crate::domain::value_objects::{split_field, InstanceId, Meta, PeerId};
use crate::routing::query::QueryError;

/// A query argument naming one index and the value to look for.
///
/// Indexes are plain values; malformed arguments (a meta field without
/// `=`) are only reported when a query evaluates them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Index {
    Id { peer: String, prefix: bool },
    Server(InstanceId),
    Host { host: String, prefix: bool },
    Meta { meta: Meta, prefix: bool },
}

impl Index {
    /// Exact match on peer ID.
    pub fn peer(peer: &PeerId) -> Self {
        Self::Id {
            peer: peer.as_str().to_string(),
            prefix: false,
        }
    }

    /// Prefix match on peer ID. The empty prefix selects every record.
    pub fn peer_prefix(prefix: impl Into<String>) -> Self {
        Self::Id {
            peer: prefix.into(),
            prefix: true,
        }
    }

    pub fn server(id: InstanceId) -> Self {
        Self::Server(id)
    }

    pub fn host(host: impl Into<String>) -> Self {
        Self::Host {
            host: host.into(),
            prefix: false,
        }
    }

    pub fn host_prefix(prefix: impl Into<String>) -> Self {
        Self::Host {
            host: prefix.into(),
            prefix: true,
        }
    }

    /// Exact match on every listed field. An empty `Meta` matches only
    /// records without metadata.
    pub fn meta(meta: Meta) -> Self {
        Self::Meta {
            meta,
            prefix: false,
        }
    }

    /// Prefix match on each listed field's value.
    pub fn meta_prefix(meta: Meta) -> Self {
        Self::Meta { meta, prefix: true }
    }

    /// Name of the index this argument targets.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Id { .. } => "id",
            Self::Server(_) => "server",
            Self::Host { .. } => "host",
            Self::Meta { .. } => "meta",
        }
    }

    /// Whether scans treat the key as a prefix.
    pub fn prefix(&self) -> bool {
        match self {
            Self::Id { prefix, .. } | Self::Host { prefix, .. } => *prefix,
            Self::Server(_) => false,
            // An explicitly empty meta constraint is always exact.
            Self::Meta { meta, prefix } => *prefix && !meta.is_empty(),
        }
    }

    /// Encoded scan key.
    ///
    /// For meta, the scan runs on the first field; the remaining fields
    /// are checked by [`Index::matches`].
    pub fn key(&self) -> Result<Vec<u8>, QueryError> {
        match self {
            Self::Id { peer, .. } => Ok(peer.as_bytes().to_vec()),
            Self::Server(id) => Ok(id.to_be_bytes().to_vec()),
            Self::Host { host, .. } => Ok(host.as_bytes().to_vec()),
            Self::Meta { meta, .. } => {
                if let Some(bad) = meta.iter().find(|f| split_field(f).is_none()) {
                    return Err(QueryError::MalformedIndex {
                        index: "meta",
                        reason: format!("field {:?} is not key=value", bad),
                    });
                }
                Ok(meta
                    .iter()
                    .next()
                    .map(|f| f.as_bytes().to_vec())
                    .unwrap_or_default())
            }
        }
    }

    /// Whether the scan key alone does not decide a match.
    pub(crate) fn is_compound(&self) -> bool {
        matches!(self, Self::Meta { meta, .. } if meta.len() > 1)
    }

    /// Whether a record satisfies this argument.
    pub fn matches(&self, record: &dyn Record) -> bool {
        match self {
            Self::Id { peer, prefix } => compare(record.peer().as_str(), peer, *prefix),
            Self::Server(id) => record.server() == *id,
            Self::Host { host, prefix } => match record.host() {
                Ok(h) => compare(&h, host, *prefix),
                Err(_) => false,
            },
            Self::Meta { meta, prefix } => match record.meta() {
                Ok(have) if meta.is_empty() => have.is_empty(),
                Ok(have) => meta.iter().all(|field| match split_field(field) {
                    Some((key, want)) => have
                        .get(key)
                        .is_some_and(|value| compare(value, want, *prefix)),
                    None => false,
                }),
                Err(_) => false,
            },
        }
    }
}

fn compare(have: &str, want: &str, prefix: bool) -> bool {
    if prefix {
        have.starts_with(want)
    } else {
        have == want
    }
}

/// Key bytes of the meta index for one record: the first field of every
/// distinct key, or a single empty key when the record has no metadata.
pub(crate) fn meta_keys(fields: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    if fields.is_empty() {
        return vec![Vec::new()];
    }

    let mut seen: Vec<Vec<u8>> = Vec::with_capacity(fields.len());
    let mut keys = Vec::with_capacity(fields.len());
    for field in fields {
        let name = match field.iter().position(|b| *b == b'=') {
            Some(at) => field[..at].to_vec(),
            None => field.clone(),
        };
        if !seen.contains(&name) {
            seen.push(name);
            keys.push(field);
        }
    }
    keys
}

/// Smallest byte string greater than every string starting with `prefix`.
/// `None` when no such bound exists (empty or all-`0xff` prefix).
pub(crate) fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut succ = prefix.to_vec();
    while let Some(last) = succ.pop() {
        if last < u8::MAX {
            succ.push(last + 1);
            return Some(succ);
        }
    }
    None
}
