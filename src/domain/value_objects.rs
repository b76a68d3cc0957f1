//! Value Objects - Immutable domain primitives
//!
//! Identities and host tags carried by liveness records.
//! They are immutable and can be freely shared.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, content-derived identity of a network participant.
///
/// Survives process restarts. Used as the primary key of the routing table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl From<String> for PeerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one process run.
///
/// Minted fresh every time a node starts, so successive runs of the same
/// [`PeerId`] can be told apart during conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId(u64);

impl InstanceId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Generate a random instance ID.
    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn get(&self) -> u64 {
        self.0
    }

    /// Fixed-width big-endian encoding; preserves numeric order.
    pub fn to_be_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl From<u64> for InstanceId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Ordered list of `key=value` host tags.
///
/// Duplicate keys are allowed; lookups return the first match.
/// An empty `Meta` is a distinct state for matching purposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Meta(Vec<String>);

impl Meta {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Number of fields (duplicates included).
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Append a `key=value` field.
    pub fn push(&mut self, key: &str, value: &str) {
        self.0.push(format!("{}={}", key, value));
    }

    /// Value of the first field with the given key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find_map(|field| match split_field(field) {
            Some((k, v)) if k == key => Some(v),
            _ => None,
        })
    }

    /// Raw `key=value` strings, in order.
    pub fn fields(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn into_inner(self) -> Vec<String> {
        self.0
    }
}

impl From<Vec<String>> for Meta {
    fn from(fields: Vec<String>) -> Self {
        Self(fields)
    }
}

impl<'a> FromIterator<&'a str> for Meta {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(str::to_string).collect())
    }
}

impl fmt::Display for Meta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}

/// Split a `key=value` field at the first `=`.
pub fn split_field(field: &str) -> Option<(&str, &str)> {
    field.split_once('=')
}
