//! Query DSL
//!
//! Composable read strategies over routing table snapshots.
//!
//! A [`Selector`] turns a [`Snapshot`] into an iterator; a [`Constraint`]
//! narrows an iterator. Selectors bind constraints to build new selectors,
//! and a [`Query`] evaluates them against one snapshot.
//!
//! Construction never fails. Bad parameters (a malformed index, a
//! non-positive limit) surface as a [`QueryError`] when the selector is
//! evaluated.
//!
//! ```rust,ignore
//! let view = router.view();
//! let gateways = view.iter(
//!     Selector::matching(Index::meta(["role=gateway"].into_iter().collect())),
//!     &[Constraint::limit(10)],
//! )?;
//! ```

use crate::domain::entities::{Record, RecordRef};
use crate::routing::index::Index;
use std::fmt;
use std::sync::Arc;

/// Lazy, single-pass iterator over records.
pub type Iter = Box<dyn Iterator<Item = RecordRef> + Send>;

/// Errors raised while evaluating a query.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("malformed {index} index: {reason}")]
    MalformedIndex { index: &'static str, reason: String },
    #[error("limit must be positive, got {0}")]
    InvalidLimit(i64),
}

/// Point-in-time read view.
///
/// Scans run in the index's key order; the reverse variants run in
/// descending order.
pub trait Snapshot: Send + Sync {
    /// Records whose key matches the index (exactly or by prefix).
    fn get(&self, index: &Index) -> Result<Iter, QueryError>;

    /// Same records as [`Snapshot::get`], descending.
    fn get_reverse(&self, index: &Index) -> Result<Iter, QueryError>;

    /// Every record whose key is greater than or equal to the index key.
    fn lower_bound(&self, index: &Index) -> Result<Iter, QueryError>;

    /// Every record whose key is less than or equal to the index key,
    /// descending.
    fn reverse_lower_bound(&self, index: &Index) -> Result<Iter, QueryError>;
}

/// Snapshot adapter with the scan direction flipped.
struct Reversed<'a>(&'a dyn Snapshot);

impl Snapshot for Reversed<'_> {
    fn get(&self, index: &Index) -> Result<Iter, QueryError> {
        self.0.get_reverse(index)
    }

    fn get_reverse(&self, index: &Index) -> Result<Iter, QueryError> {
        self.0.get(index)
    }

    fn lower_bound(&self, index: &Index) -> Result<Iter, QueryError> {
        self.0.reverse_lower_bound(index)
    }

    fn reverse_lower_bound(&self, index: &Index) -> Result<Iter, QueryError> {
        self.0.lower_bound(index)
    }
}

type SelectFn = dyn Fn(&dyn Snapshot) -> Result<Iter, QueryError> + Send + Sync;
type ConstrainFn = dyn Fn(Iter) -> Result<Iter, QueryError> + Send + Sync;

/// Read strategy producing an iterator from a snapshot.
#[derive(Clone)]
pub struct Selector(Arc<SelectFn>);

impl Selector {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&dyn Snapshot) -> Result<Iter, QueryError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Every record, in peer ID order.
    pub fn all() -> Self {
        Self::select(Index::peer_prefix(""))
    }

    /// Records matching `index`.
    ///
    /// The scan runs on the index key. A meta argument with several
    /// fields is keyed on its first one, so the remaining fields are
    /// checked against each scanned record.
    pub fn select(index: Index) -> Self {
        if !index.is_compound() {
            return Self::new(move |snap| snap.get(&index));
        }
        let filter = index.clone();
        Self::new(move |snap| snap.get(&index))
            .bind(Constraint::filter(move |rec| filter.matches(rec)))
    }

    /// Same as [`Selector::select`].
    pub fn matching(index: Index) -> Self {
        Self::select(index)
    }

    /// Records from the index key onwards.
    pub fn from_index(index: Index) -> Self {
        Self::new(move |snap| snap.lower_bound(&index))
    }

    /// Records from `min` up to and including `max`.
    pub fn range(min: Index, max: Index) -> Self {
        Self::from_index(min).bind(Constraint::to(max))
    }

    /// A selector that always fails with `err`.
    pub fn failure(err: QueryError) -> Self {
        Self::new(move |_| Err(err.clone()))
    }

    /// Narrow this selector's output.
    pub fn bind(self, constraint: Constraint) -> Self {
        Self::new(move |snap| {
            let iter = (self.0)(snap)?;
            (constraint.0)(iter)
        })
    }

    /// Evaluate against a snapshot.
    pub fn apply(&self, snap: &dyn Snapshot) -> Result<Iter, QueryError> {
        (self.0)(snap)
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Selector")
    }
}

/// Narrowing step applied to a selector's output.
#[derive(Clone)]
pub struct Constraint(Arc<ConstrainFn>);

impl Constraint {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Iter) -> Result<Iter, QueryError> + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Keep only matching records; scanning continues past non-matches.
    pub fn filter<F>(matcher: F) -> Self
    where
        F: Fn(&dyn Record) -> bool + Send + Sync + 'static,
    {
        let matcher = Arc::new(matcher);
        Self::new(move |iter| {
            let matcher = matcher.clone();
            Ok(Box::new(iter.filter(move |rec| matcher(&**rec))))
        })
    }

    /// Yield records while the predicate holds, then stop the scan.
    pub fn take_while<F>(predicate: F) -> Self
    where
        F: Fn(&dyn Record) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        Self::new(move |iter| {
            let predicate = predicate.clone();
            Ok(Box::new(iter.take_while(move |rec| predicate(&**rec))))
        })
    }

    /// At most `n` records. `n <= 0` is an error.
    pub fn limit(n: i64) -> Self {
        match usize::try_from(n) {
            Ok(n) if n > 0 => Self::new(move |iter| Ok(Box::new(iter.take(n)))),
            _ => Self::new(move |_| Err(QueryError::InvalidLimit(n))),
        }
    }

    pub fn first() -> Self {
        Self::limit(1)
    }

    /// Stop after the last record matching `index`.
    ///
    /// Everything before the first match passes; once a match is reached
    /// the scan continues only while records keep matching, so duplicate
    /// boundary keys are all included.
    pub fn to(index: Index) -> Self {
        Self::new(move |iter| {
            let index = index.clone();
            let mut reached = false;
            Ok(Box::new(iter.take_while(move |rec| {
                let hit = index.matches(&**rec);
                if reached {
                    return hit;
                }
                reached = hit;
                true
            })))
        })
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Constraint")
    }
}

/// Evaluates selectors against one snapshot.
#[derive(Clone)]
pub struct Query {
    snapshot: Arc<dyn Snapshot>,
    reversed: bool,
}

impl Query {
    pub fn new(snapshot: Arc<dyn Snapshot>) -> Self {
        Self {
            snapshot,
            reversed: false,
        }
    }

    /// A query over the same snapshot with every scan direction flipped.
    /// Reversing twice restores the original orientation.
    pub fn reverse(&self) -> Self {
        Self {
            snapshot: self.snapshot.clone(),
            reversed: !self.reversed,
        }
    }

    pub fn is_reversed(&self) -> bool {
        self.reversed
    }

    /// Iterator over the selection after applying `constraints` in order.
    pub fn iter(&self, selector: Selector, constraints: &[Constraint]) -> Result<Iter, QueryError> {
        let selector = constraints.iter().cloned().fold(selector, Selector::bind);
        if self.reversed {
            selector.apply(&Reversed(self.snapshot.as_ref()))
        } else {
            selector.apply(self.snapshot.as_ref())
        }
    }

    /// First record of the selection, or `None` if it is empty.
    pub fn lookup(
        &self,
        selector: Selector,
        constraints: &[Constraint],
    ) -> Result<Option<RecordRef>, QueryError> {
        Ok(self.iter(selector, constraints)?.next())
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("reversed", &self.reversed)
            .finish()
    }
}
