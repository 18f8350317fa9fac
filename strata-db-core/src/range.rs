//! Key ranges for map iteration.
//!
//! A [`Range`] is a pair of cuts plus a direction. Each cut is
//! [`Bound::Unbounded`], or a key that is included or excluded. When both
//! cuts are keys, `start <= stop` under the map's key descriptor.
//!
//! ## Example
//!
//! ```ignore
//! use strata_db_core::Range;
//!
//! // keys in [lo, hi), newest first
//! let range = Range::new(Bound::Included(lo), Bound::Excluded(hi)).reversed();
//! for entry in map.iter_range(&range, &cancel)? { /* ... */ }
//! ```

use crate::error::{Error, Result};
use crate::val::{Tuple, TupleDesc};
use std::cmp::Ordering;
use std::ops::Bound;

/// Half-open, closed, or unbounded key interval with a traversal direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    pub start: Bound<Tuple>,
    pub stop: Bound<Tuple>,
    /// Emit entries from `stop` down to `start`.
    pub reverse: bool,
}

impl Default for Range {
    fn default() -> Self {
        Self::all()
    }
}

impl Range {
    /// Every key, ascending.
    pub fn all() -> Self {
        Self::new(Bound::Unbounded, Bound::Unbounded)
    }

    pub fn new(start: Bound<Tuple>, stop: Bound<Tuple>) -> Self {
        Self {
            start,
            stop,
            reverse: false,
        }
    }

    /// `[lo, hi]`
    pub fn closed(lo: Tuple, hi: Tuple) -> Self {
        Self::new(Bound::Included(lo), Bound::Included(hi))
    }

    /// Exactly one key.
    pub fn point(key: Tuple) -> Self {
        Self::closed(key.clone(), key)
    }

    /// Same bounds, descending.
    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn with_reverse(mut self, reverse: bool) -> Self {
        self.reverse = reverse;
        self
    }

    /// Reject ranges whose start cut lies after the stop cut.
    pub fn validate(&self, desc: &TupleDesc) -> Result<()> {
        if let (Some(lo), Some(hi)) = (bound_key(&self.start), bound_key(&self.stop)) {
            if desc.compare(lo, hi) == Ordering::Greater {
                return Err(Error::invalid_range(format!(
                    "start {} is after stop {}",
                    desc.format(lo),
                    desc.format(hi)
                )));
            }
        }
        Ok(())
    }

    /// `key` is not before the start cut.
    #[inline]
    pub fn after_start(&self, desc: &TupleDesc, key: &Tuple) -> bool {
        match &self.start {
            Bound::Unbounded => true,
            Bound::Included(lo) => desc.compare(key, lo) != Ordering::Less,
            Bound::Excluded(lo) => desc.compare(key, lo) == Ordering::Greater,
        }
    }

    /// `key` is not past the stop cut.
    #[inline]
    pub fn before_stop(&self, desc: &TupleDesc, key: &Tuple) -> bool {
        match &self.stop {
            Bound::Unbounded => true,
            Bound::Included(hi) => desc.compare(key, hi) != Ordering::Greater,
            Bound::Excluded(hi) => desc.compare(key, hi) == Ordering::Less,
        }
    }

    pub fn contains(&self, desc: &TupleDesc, key: &Tuple) -> bool {
        self.after_start(desc, key) && self.before_stop(desc, key)
    }
}

fn bound_key(b: &Bound<Tuple>) -> Option<&Tuple> {
    match b {
        Bound::Included(k) | Bound::Excluded(k) => Some(k),
        Bound::Unbounded => None,
    }
}
