//! Routing Table
//!
//! Multi-index, snapshot-isolated store of liveness records.
//!
//! ## Storage
//!
//! Every index is a persistent ordered map (`im::OrdMap`) from
//! `(key, peer)` to a shared entry. The five maps live in one immutable
//! [`Indexes`] value published through an `ArcSwap`:
//!
//! - Readers load the current `Arc<Indexes>` and never block.
//! - Writers serialize on a mutex, edit a clone of the maps and publish
//!   the result in one store. Clones share structure, so a write copies
//!   only the O(log n) nodes on its paths.
//!
//! A snapshot is a clone of the published `Arc`, so it never observes
//! later writes.
//!
//! ## Conflict resolution
//!
//! For an incoming record `new` and the stored entry `old` for the same
//! peer:
//!
//! - no `old`: accept
//! - same instance: accept iff `old.seq < new.seq`
//! - different instance: accept iff `old.seq >= new.seq` (a restart; the
//!   newly received record wins ties)
//!
//! The `server` index is unique as well. A record whose instance is held
//! by another peer is rejected and the incumbent stays.
//!
//! ## Eviction
//!
//! The deadline `clock + ttl` is computed once when a record is accepted
//! and frozen in the entry. The `ttl` index is keyed by that frozen value
//! and entries are removed with the keys they were inserted with.

use crate::domain::entities::{Record, RecordRef};
use crate::routing::index::{meta_keys, prefix_successor, Index};
use crate::routing::query::{Iter, QueryError, Snapshot};
use arc_swap::ArcSwap;
use im::OrdMap;
use parking_lot::Mutex;
use std::ops::Bound::{self, Excluded, Included, Unbounded};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Composite index key: the indexed value, then the peer ID bytes as a
/// tiebreaker for non-unique indexes (empty for unique ones).
type Key = (Vec<u8>, Vec<u8>);
type Tree = OrdMap<Key, Arc<Entry>>;

/// Index keys of one record, derived once at insertion.
#[derive(Debug, Clone)]
struct RecordKeys {
    peer: Vec<u8>,
    server: [u8; 8],
    host: Option<Vec<u8>>,
    meta: Vec<Vec<u8>>,
}

impl RecordKeys {
    /// Derive index keys, preferring the record's byte fast paths.
    ///
    /// # Panics
    ///
    /// If the record cannot produce its host or meta. That is a broken
    /// `Record` implementation, not a runtime condition.
    fn derive(record: &dyn Record) -> Self {
        let peer = record
            .peer_bytes()
            .unwrap_or_else(|| record.peer().as_bytes().to_vec());
        let server = record
            .server_bytes()
            .unwrap_or_else(|| record.server().to_be_bytes());

        let host = match record.host_bytes() {
            Some(bytes) => bytes,
            None => match record.host() {
                Ok(host) => host.into_bytes(),
                Err(e) => panic!("record {} cannot be indexed by host: {}", record.peer(), e),
            },
        };

        let meta = match record.meta_bytes() {
            Some(fields) => fields,
            None => match record.meta() {
                Ok(meta) => meta.into_inner().into_iter().map(String::into_bytes).collect(),
                Err(e) => panic!("record {} cannot be indexed by meta: {}", record.peer(), e),
            },
        };

        Self {
            peer,
            server,
            host: (!host.is_empty()).then_some(host),
            meta: meta_keys(meta),
        }
    }
}

/// A stored record with its frozen deadline.
#[derive(Debug)]
struct Entry {
    record: RecordRef,
    /// Nanoseconds since the UNIX epoch
    deadline: u64,
    keys: RecordKeys,
}

impl Entry {
    fn id_key(&self) -> Key {
        (self.keys.peer.clone(), Vec::new())
    }

    fn server_key(&self) -> Key {
        (self.keys.server.to_vec(), Vec::new())
    }

    fn ttl_key(&self) -> Key {
        (self.deadline.to_be_bytes().to_vec(), self.keys.peer.clone())
    }
}

/// One consistent version of every index.
#[derive(Debug, Clone, Default)]
struct Indexes {
    id: Tree,
    server: Tree,
    host: Tree,
    meta: Tree,
    ttl: Tree,
}

impl Indexes {
    fn tree(&self, index: &Index) -> &Tree {
        match index {
            Index::Id { .. } => &self.id,
            Index::Server(_) => &self.server,
            Index::Host { .. } => &self.host,
            Index::Meta { .. } => &self.meta,
        }
    }

    fn by_peer(&self, peer: &[u8]) -> Option<&Arc<Entry>> {
        self.id.get(&(peer.to_vec(), Vec::new()))
    }

    fn by_server(&self, server: &[u8; 8]) -> Option<&Arc<Entry>> {
        self.server.get(&(server.to_vec(), Vec::new()))
    }

    /// Whether any entry's deadline is at or before `now`.
    fn has_expired(&self, now: u64) -> bool {
        self.ttl
            .keys()
            .next()
            .is_some_and(|(deadline, _)| deadline.as_slice() <= now.to_be_bytes().as_slice())
    }
}

/// Write transaction over a private clone of the indexes.
struct Txn {
    indexes: Indexes,
}

impl Txn {
    fn begin(base: &Indexes) -> Self {
        Self {
            indexes: base.clone(),
        }
    }

    fn insert(&mut self, entry: Arc<Entry>) {
        let peer = entry.keys.peer.clone();
        let ix = &mut self.indexes;
        ix.id.insert(entry.id_key(), entry.clone());
        ix.server.insert(entry.server_key(), entry.clone());
        if let Some(host) = &entry.keys.host {
            ix.host.insert((host.clone(), peer.clone()), entry.clone());
        }
        for field in &entry.keys.meta {
            ix.meta.insert((field.clone(), peer.clone()), entry.clone());
        }
        ix.ttl.insert(entry.ttl_key(), entry);
    }

    fn remove(&mut self, entry: &Entry) {
        let peer = &entry.keys.peer;
        let ix = &mut self.indexes;
        ix.id.remove(&entry.id_key());
        ix.server.remove(&entry.server_key());
        if let Some(host) = &entry.keys.host {
            ix.host.remove(&(host.clone(), peer.clone()));
        }
        for field in &entry.keys.meta {
            ix.meta.remove(&(field.clone(), peer.clone()));
        }
        ix.ttl.remove(&entry.ttl_key());
    }

    fn commit(self) -> Arc<Indexes> {
        Arc::new(self.indexes)
    }
}

/// Whether `incoming` should replace `existing`.
fn supersedes(existing: Option<&Entry>, incoming: &dyn Record) -> bool {
    match existing {
        None => true,
        Some(old) if old.record.server() == incoming.server() => old.record.seq() < incoming.seq(),
        Some(old) => old.record.seq() >= incoming.seq(),
    }
}

/// Whether `incoming` may be stored over the current indexes.
fn accepts(indexes: &Indexes, keys: &RecordKeys, incoming: &dyn Record) -> bool {
    if !supersedes(indexes.by_peer(&keys.peer).map(Arc::as_ref), incoming) {
        tracing::trace!("stale record peer={} seq={}", incoming.peer(), incoming.seq());
        return false;
    }
    match indexes.by_server(&keys.server) {
        Some(holder) if holder.keys.peer != keys.peer => {
            tracing::debug!(
                "instance {} claimed by peer={} is held by peer={}",
                incoming.server(),
                incoming.peer(),
                holder.record.peer()
            );
            false
        }
        _ => true,
    }
}

fn unix_nanos(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}

/// Indexed, TTL-evicting store of liveness records.
pub struct RoutingTable {
    state: ArcSwap<Indexes>,
    /// Table clock, nanoseconds since the UNIX epoch
    clock: AtomicU64,
    write_lock: Mutex<()>,
}

impl RoutingTable {
    /// Create an empty table whose clock starts at `t0`.
    pub fn new(t0: SystemTime) -> Self {
        Self {
            state: ArcSwap::from_pointee(Indexes::default()),
            clock: AtomicU64::new(unix_nanos(t0)),
            write_lock: Mutex::new(()),
        }
    }

    /// Current table clock.
    pub fn now(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.clock.load(Ordering::SeqCst))
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.state.load().id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace the entry for `record.peer()`.
    ///
    /// Returns `true` if the record was stored, `false` if it was stale.
    pub fn upsert(&self, record: RecordRef) -> bool {
        let keys = RecordKeys::derive(&*record);

        // Most heartbeats are duplicates: reject them without the write lock.
        if !accepts(&self.state.load(), &keys, &*record) {
            return false;
        }

        let _guard = self.write_lock.lock();
        let current = self.state.load_full();
        if !accepts(&current, &keys, &*record) {
            return false;
        }

        let deadline = self
            .clock
            .load(Ordering::SeqCst)
            .saturating_add(duration_nanos(record.ttl()));

        let mut txn = Txn::begin(&current);
        if let Some(old) = current.by_peer(&keys.peer) {
            txn.remove(old);
        }

        tracing::debug!(
            "upsert peer={} server={} seq={} ttl={:?}",
            record.peer(),
            record.server(),
            record.seq(),
            record.ttl()
        );
        txn.insert(Arc::new(Entry {
            record,
            deadline,
            keys,
        }));
        self.state.store(txn.commit());
        true
    }

    /// Move the clock forward to `t` and evict every entry whose deadline
    /// is at or before it. No-op unless `t` is after the current clock.
    pub fn advance(&self, t: SystemTime) {
        let now = unix_nanos(t);
        let prev = self.clock.fetch_max(now, Ordering::SeqCst);
        if now <= prev {
            return;
        }

        // Most ticks evict nothing: check before taking the write lock.
        if !self.state.load().has_expired(now) {
            return;
        }

        let _guard = self.write_lock.lock();
        let current = self.state.load_full();
        let bound = now.to_be_bytes();
        let expired: Vec<Arc<Entry>> = current
            .ttl
            .iter()
            .take_while(|((deadline, _), _)| deadline.as_slice() <= bound.as_slice())
            .map(|(_, entry)| entry.clone())
            .collect();
        if expired.is_empty() {
            return;
        }

        let mut txn = Txn::begin(&current);
        for entry in &expired {
            tracing::debug!(
                "evict peer={} server={} seq={}",
                entry.record.peer(),
                entry.record.server(),
                entry.record.seq()
            );
            txn.remove(entry);
        }
        self.state.store(txn.commit());
    }

    /// Isolated point-in-time view of the table.
    pub fn snapshot(&self) -> TableSnapshot {
        TableSnapshot {
            indexes: self.state.load_full(),
        }
    }
}

impl std::fmt::Debug for RoutingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingTable")
            .field("len", &self.len())
            .field("now", &self.now())
            .finish()
    }
}

/// Point-in-time view over a [`RoutingTable`].
#[derive(Debug, Clone)]
pub struct TableSnapshot {
    indexes: Arc<Indexes>,
}

impl TableSnapshot {
    /// Number of records in this snapshot.
    pub fn len(&self) -> usize {
        self.indexes.id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn scan(&self, index: &Index, direction: Direction, bounded: bool) -> Result<Iter, QueryError> {
        let key = index.key()?;
        let tree = self.indexes.tree(index).clone();

        let filter = match (bounded, index.prefix()) {
            (false, _) => KeyFilter::Any,
            (true, true) => KeyFilter::Prefix(key.clone()),
            (true, false) => KeyFilter::Exact(key.clone()),
        };

        let position = match direction {
            Direction::Forward => Included((key, Vec::new())),
            Direction::Reverse => match &filter {
                KeyFilter::Prefix(prefix) => match prefix_successor(prefix) {
                    Some(succ) => Excluded((succ, Vec::new())),
                    None => Unbounded,
                },
                // Every (key, _) sorts below (key ++ [0], []).
                _ => {
                    let mut upper = key;
                    upper.push(0);
                    Excluded((upper, Vec::new()))
                }
            },
        };

        Ok(Box::new(Cursor {
            tree,
            position,
            direction,
            filter,
            done: false,
        }))
    }
}

impl Snapshot for TableSnapshot {
    fn get(&self, index: &Index) -> Result<Iter, QueryError> {
        self.scan(index, Direction::Forward, true)
    }

    fn get_reverse(&self, index: &Index) -> Result<Iter, QueryError> {
        self.scan(index, Direction::Reverse, true)
    }

    fn lower_bound(&self, index: &Index) -> Result<Iter, QueryError> {
        self.scan(index, Direction::Forward, false)
    }

    fn reverse_lower_bound(&self, index: &Index) -> Result<Iter, QueryError> {
        self.scan(index, Direction::Reverse, false)
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Forward,
    Reverse,
}

#[derive(Debug, Clone)]
enum KeyFilter {
    Any,
    Exact(Vec<u8>),
    Prefix(Vec<u8>),
}

impl KeyFilter {
    fn admits(&self, key: &[u8]) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(want) => key == want.as_slice(),
            Self::Prefix(prefix) => key.starts_with(prefix),
        }
    }
}

/// Lazy scan over one index. Holds its own clone of the tree and
/// re-seeks past the last returned key on every step.
struct Cursor {
    tree: Tree,
    position: Bound<Key>,
    direction: Direction,
    filter: KeyFilter,
    done: bool,
}

impl Iterator for Cursor {
    type Item = RecordRef;

    fn next(&mut self) -> Option<RecordRef> {
        if self.done {
            return None;
        }

        let found = match self.direction {
            Direction::Forward => self.tree.range((self.position.clone(), Unbounded)).next(),
            Direction::Reverse => self.tree.range((Unbounded, self.position.clone())).next_back(),
        }
        .map(|(key, entry)| (key.clone(), entry.record.clone()));

        match found {
            Some((key, record)) if self.filter.admits(&key.0) => {
                self.position = Excluded(key);
                Some(record)
            }
            _ => {
                self.done = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Heartbeat, RecordError};
    use crate::domain::value_objects::{InstanceId, Meta, PeerId};

    fn t(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn rec(peer: &str, server: u64, seq: u64, ttl: u64) -> RecordRef {
        Arc::new(
            Heartbeat::new(Duration::from_secs(ttl), InstanceId::new(server))
                .into_record(PeerId::new(peer), seq),
        )
    }

    fn tagged(peer: &str, server: u64, host: &str, meta: &[&str]) -> RecordRef {
        let mut hb = Heartbeat::new(Duration::from_secs(60), InstanceId::new(server));
        hb.set_host(host);
        hb.set_meta(meta.iter().copied().collect());
        Arc::new(hb.into_record(PeerId::new(peer), 1))
    }

    fn peers(iter: Iter) -> Vec<String> {
        iter.map(|r| r.peer().to_string()).collect()
    }

    fn lookup(table: &RoutingTable, peer: &str) -> Option<RecordRef> {
        table
            .snapshot()
            .get(&Index::peer(&PeerId::new(peer)))
            .unwrap()
            .next()
    }

    // ===== Conflict resolution =====

    #[test]
    fn test_upsert_first_record_accepted() {
        let table = RoutingTable::new(t(0));
        assert!(table.upsert(rec("a", 1, 5, 10)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_upsert_same_instance_requires_higher_seq() {
        let table = RoutingTable::new(t(0));
        assert!(table.upsert(rec("a", 1, 5, 10)));
        assert!(!table.upsert(rec("a", 1, 5, 10)), "duplicate accepted");
        assert!(!table.upsert(rec("a", 1, 4, 10)), "replay accepted");
        assert!(table.upsert(rec("a", 1, 6, 10)));
        assert_eq!(lookup(&table, "a").unwrap().seq(), 6);
    }

    #[test]
    fn test_upsert_new_instance_tie_break() {
        let table = RoutingTable::new(t(0));
        assert!(table.upsert(rec("a", 1, 5, 10)));

        // higher seq from a different instance loses
        assert!(!table.upsert(rec("a", 2, 6, 10)));
        // equal seq from a different instance wins
        assert!(table.upsert(rec("a", 2, 5, 10)));
        assert_eq!(lookup(&table, "a").unwrap().server(), InstanceId::new(2));
        // lower seq from a different instance wins
        assert!(table.upsert(rec("a", 3, 1, 10)));
        assert_eq!(lookup(&table, "a").unwrap().server(), InstanceId::new(3));
    }

    #[test]
    fn test_upsert_keeps_one_entry_per_peer() {
        let table = RoutingTable::new(t(0));
        table.upsert(rec("a", 1, 1, 10));
        table.upsert(rec("a", 1, 2, 10));
        table.upsert(rec("a", 2, 1, 10));
        assert_eq!(table.len(), 1);

        let snap = table.snapshot();
        assert!(snap.get(&Index::server(InstanceId::new(1))).unwrap().next().is_none());
        assert_eq!(peers(snap.get(&Index::server(InstanceId::new(2))).unwrap()), vec!["a"]);
    }

    #[test]
    fn test_upsert_claimed_instance_keeps_incumbent() {
        let table = RoutingTable::new(t(0));
        assert!(table.upsert(rec("QmVictim", 0xabcdef, 100, 10)));
        assert!(!table.upsert(rec("QmAttacker", 0xabcdef, 1, 10)));
        assert!(!table.upsert(rec("QmAttacker", 0xabcdef, 1_000, 10)));

        assert_eq!(table.len(), 1);
        assert!(lookup(&table, "QmAttacker").is_none());
        let snap = table.snapshot();
        assert_eq!(
            peers(snap.get(&Index::server(InstanceId::new(0xabcdef))).unwrap()),
            vec!["QmVictim"]
        );
    }

    #[test]
    fn test_upsert_instance_free_after_eviction() {
        let table = RoutingTable::new(t(0));
        table.upsert(rec("a", 7, 1, 10));
        table.advance(t(10));

        assert!(table.upsert(rec("b", 7, 1, 10)));
        assert_eq!(peers(table.snapshot().get(&Index::server(InstanceId::new(7))).unwrap()), vec!["b"]);
    }

    // ===== Eviction =====

    #[test]
    fn test_advance_evicts_at_deadline() {
        let table = RoutingTable::new(t(100));
        table.upsert(rec("a", 1, 1, 10));

        table.advance(t(109));
        assert_eq!(table.len(), 1);

        table.advance(t(110));
        assert!(table.is_empty());
    }

    #[test]
    fn test_advance_backwards_is_noop() {
        let table = RoutingTable::new(t(100));
        table.advance(t(50));
        assert_eq!(table.now(), t(100));

        table.advance(t(101));
        assert_eq!(table.now(), t(101));
    }

    #[test]
    fn test_deadline_uses_table_clock() {
        let table = RoutingTable::new(t(0));
        table.advance(t(50));
        table.upsert(rec("a", 1, 1, 10));

        table.advance(t(59));
        assert_eq!(table.len(), 1);
        table.advance(t(60));
        assert!(table.is_empty());
    }

    #[test]
    fn test_refresh_moves_deadline() {
        let table = RoutingTable::new(t(0));
        table.upsert(rec("a", 1, 1, 10));
        table.advance(t(8));
        table.upsert(rec("a", 1, 2, 10)); // deadline now 18

        table.advance(t(12));
        assert_eq!(lookup(&table, "a").unwrap().seq(), 2);
        table.advance(t(18));
        assert!(lookup(&table, "a").is_none());
    }

    #[test]
    fn test_eviction_clears_host_and_meta() {
        let table = RoutingTable::new(t(0));
        table.upsert(tagged("a", 1, "edge-1.sa", &["region=sa", "role=gateway"]));
        table.upsert(tagged("b", 2, "", &[]));
        table.advance(t(61));
        assert!(table.is_empty());

        let snap = table.snapshot();
        assert!(snap.get(&Index::host("edge-1.sa")).unwrap().next().is_none());
        assert!(snap.get(&Index::host_prefix("")).unwrap().next().is_none());
        for tags in [vec!["region=sa"], vec!["role=gateway"], vec![]] {
            let meta = Index::meta(tags.into_iter().collect());
            assert!(snap.get(&meta).unwrap().next().is_none());
        }
        assert!(snap.get(&Index::server(InstanceId::new(1))).unwrap().next().is_none());
    }

    #[test]
    fn test_eviction_only_removes_expired() {
        let table = RoutingTable::new(t(0));
        table.upsert(rec("short", 1, 1, 5));
        table.upsert(rec("long", 2, 1, 50));

        table.advance(t(10));
        assert!(lookup(&table, "short").is_none());
        assert!(lookup(&table, "long").is_some());
    }

    // ===== Snapshots =====

    #[test]
    fn test_snapshot_isolation() {
        let table = RoutingTable::new(t(0));
        table.upsert(rec("a", 1, 1, 10));
        let before = table.snapshot();

        table.upsert(rec("b", 2, 1, 10));
        table.advance(t(20));

        assert_eq!(before.len(), 1);
        assert_eq!(peers(before.get(&Index::peer_prefix("")).unwrap()), vec!["a"]);
        assert!(table.snapshot().is_empty());
    }

    #[test]
    fn test_get_prefix_and_reverse() {
        let table = RoutingTable::new(t(0));
        for (i, p) in ["QmA1", "QmA2", "QmB1", "Zz"].iter().enumerate() {
            table.upsert(rec(p, i as u64, 1, 10));
        }
        let snap = table.snapshot();

        assert_eq!(peers(snap.get(&Index::peer_prefix("QmA")).unwrap()), vec!["QmA1", "QmA2"]);
        assert_eq!(
            peers(snap.get_reverse(&Index::peer_prefix("QmA")).unwrap()),
            vec!["QmA2", "QmA1"]
        );
        assert_eq!(
            peers(snap.get_reverse(&Index::peer_prefix("")).unwrap()),
            vec!["Zz", "QmB1", "QmA2", "QmA1"]
        );
        assert_eq!(peers(snap.get(&Index::peer(&PeerId::new("QmA"))).unwrap()), Vec::<String>::new());
    }

    #[test]
    fn test_lower_bounds() {
        let table = RoutingTable::new(t(0));
        for (i, p) in ["a", "b", "c", "d"].iter().enumerate() {
            table.upsert(rec(p, i as u64, 1, 10));
        }
        let snap = table.snapshot();

        assert_eq!(peers(snap.lower_bound(&Index::peer(&PeerId::new("b"))).unwrap()), vec!["b", "c", "d"]);
        assert_eq!(
            peers(snap.reverse_lower_bound(&Index::peer(&PeerId::new("c"))).unwrap()),
            vec!["c", "b", "a"]
        );
        assert_eq!(
            peers(snap.lower_bound(&Index::peer(&PeerId::new("bb"))).unwrap()),
            vec!["c", "d"]
        );
    }

    #[test]
    fn test_server_index_order() {
        let table = RoutingTable::new(t(0));
        table.upsert(rec("x", 300, 1, 10));
        table.upsert(rec("y", 2, 1, 10));
        table.upsert(rec("z", 40, 1, 10));

        let got = peers(table.snapshot().lower_bound(&Index::server(InstanceId::new(0))).unwrap());
        assert_eq!(got, vec!["y", "z", "x"]);
    }

    #[test]
    fn test_host_index() {
        let table = RoutingTable::new(t(0));
        table.upsert(tagged("a", 1, "edge-1.sa", &[]));
        table.upsert(tagged("b", 2, "edge-2.sa", &[]));
        table.upsert(tagged("c", 3, "edge-1.sa", &[]));
        table.upsert(tagged("d", 4, "", &[]));
        let snap = table.snapshot();

        assert_eq!(peers(snap.get(&Index::host("edge-1.sa")).unwrap()), vec!["a", "c"]);
        assert_eq!(peers(snap.get(&Index::host_prefix("edge-")).unwrap()), vec!["a", "c", "b"]);
        // records without a host are not in the host index
        assert_eq!(peers(snap.get(&Index::host_prefix("")).unwrap()).len(), 3);
    }

    #[test]
    fn test_meta_index() {
        let table = RoutingTable::new(t(0));
        table.upsert(tagged("a", 1, "", &["region=us", "zone=1"]));
        table.upsert(tagged("b", 2, "", &["region=us-east"]));
        table.upsert(tagged("c", 3, "", &["region=eu", "region=us"]));
        table.upsert(tagged("d", 4, "", &[]));
        let snap = table.snapshot();

        let exact = Index::meta(["region=us"].into_iter().collect());
        assert_eq!(peers(snap.get(&exact).unwrap()), vec!["a"]);

        let prefix = Index::meta_prefix(["region=us"].into_iter().collect());
        assert_eq!(peers(snap.get(&prefix).unwrap()), vec!["a", "b"]);

        assert_eq!(peers(snap.get(&Index::meta(Meta::new())).unwrap()), vec!["d"]);
    }

    #[test]
    fn test_meta_index_cleared_on_replace() {
        let table = RoutingTable::new(t(0));
        table.upsert(tagged("a", 1, "h1", &["role=old"]));
        let mut hb = Heartbeat::new(Duration::from_secs(60), InstanceId::new(1));
        hb.set_meta(["role=new"].into_iter().collect());
        table.upsert(Arc::new(hb.into_record(PeerId::new("a"), 2)));

        let snap = table.snapshot();
        let old = Index::meta(["role=old"].into_iter().collect());
        assert!(snap.get(&old).unwrap().next().is_none());
        assert!(snap.get(&Index::host("h1")).unwrap().next().is_none());
    }

    #[test]
    fn test_malformed_index_errors_at_scan() {
        let table = RoutingTable::new(t(0));
        let bad = Index::meta(["nokey"].into_iter().collect());
        assert!(table.snapshot().get(&bad).is_err());
    }

    // ===== Invariant violations =====

    #[derive(Debug)]
    struct Broken;

    impl Record for Broken {
        fn server(&self) -> InstanceId {
            InstanceId::new(1)
        }
        fn peer(&self) -> PeerId {
            PeerId::new("broken")
        }
        fn seq(&self) -> u64 {
            1
        }
        fn ttl(&self) -> Duration {
            Duration::from_secs(1)
        }
        fn host(&self) -> Result<String, RecordError> {
            Err(RecordError::MissingField("host"))
        }
        fn meta(&self) -> Result<Meta, RecordError> {
            Ok(Meta::new())
        }
    }

    #[test]
    #[should_panic(expected = "cannot be indexed by host")]
    fn test_unindexable_record_panics() {
        let table = RoutingTable::new(t(0));
        table.upsert(Arc::new(Broken));
    }

    // ===== Structural sharing =====

    #[test]
    fn test_refresh_in_large_table_leaves_old_versions_intact() {
        let table = RoutingTable::new(t(0));
        for i in 0..4_000u64 {
            table.upsert(rec(&format!("Qm{:05}", i), i, 1, 60));
        }
        let before = table.snapshot();

        for seq in 2..=200 {
            assert!(table.upsert(rec("Qm00042", 42, seq, 60)));
        }

        let old = before.get(&Index::peer(&PeerId::new("Qm00042"))).unwrap().next().unwrap();
        assert_eq!(old.seq(), 1);
        assert_eq!(lookup(&table, "Qm00042").unwrap().seq(), 200);
        assert_eq!(table.len(), 4_000);
        assert_eq!(before.len(), 4_000);
    }

    // ===== Concurrency =====

    #[test]
    fn test_concurrent_readers_and_writer() {
        let table = Arc::new(RoutingTable::new(t(0)));
        let writer = {
            let table = table.clone();
            std::thread::spawn(move || {
                for seq in 1..=200 {
                    table.upsert(rec("a", 1, seq, 10));
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let table = table.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let snap = table.snapshot();
                        assert!(snap.len() <= 1);
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for r in readers {
            r.join().unwrap();
        }
        assert_eq!(lookup(&table, "a").unwrap().seq(), 200);
    }
}
