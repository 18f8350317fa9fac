//! Bounded, ordered in-memory write buffer.
//!
//! [`StagingMap`] keeps staged upserts and deletes (tombstones) in key order
//! until they are folded into a persisted map. Capacity is bounded by entry
//! count and by bytes; a write that would exceed either bound is refused as a
//! whole and leaves the map unchanged.
//!
//! The map has no internal synchronization. Cursors borrow it immutably, so a
//! traversal always sees one consistent state.

use crate::skip::{SkipList, NIL};
use strata_db_core::{Edit, Error, Range, Tuple, TupleDesc};
use std::ops::Bound;

/// Capacity limits for a [`StagingMap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingConfig {
    /// Maximum staged keys, tombstones included.
    pub max_entries: usize,
    /// Maximum staged key + value bytes.
    pub max_bytes: usize,
}

/// Default staged entry limit.
pub const DEFAULT_MAX_ENTRIES: usize = 64 * 1024;

/// Default staged byte limit: 16 MB.
pub const DEFAULT_MAX_BYTES: usize = 16 * 1024 * 1024;

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_bytes: DEFAULT_MAX_BYTES,
        }
    }
}

impl StagingConfig {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            max_entries,
            max_bytes,
        }
    }

    pub fn with_max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    pub fn with_max_bytes(mut self, n: usize) -> Self {
        self.max_bytes = n;
        self
    }
}

#[inline]
fn entry_bytes(key: &Tuple, value: Option<&Tuple>) -> usize {
    key.size() + value.map_or(0, Tuple::size)
}

pub struct StagingMap {
    key_desc: TupleDesc,
    value_desc: TupleDesc,
    config: StagingConfig,
    list: SkipList,
    bytes: usize,
    live: usize,
}

impl StagingMap {
    pub fn new(key_desc: TupleDesc, value_desc: TupleDesc, config: StagingConfig) -> Self {
        Self {
            key_desc,
            value_desc,
            config,
            list: SkipList::new(0x5eed),
            bytes: 0,
            live: 0,
        }
    }

    /// Build a map from a flat `[k0, v0, k1, v1, ...]` sequence.
    pub fn from_tuples(
        key_desc: TupleDesc,
        value_desc: TupleDesc,
        config: StagingConfig,
        tuples: &[Tuple],
    ) -> strata_db_core::Result<Self> {
        if tuples.len() % 2 != 0 {
            return Err(Error::malformed(format!(
                "key/value sequence has odd length {}",
                tuples.len()
            )));
        }
        let mut map = Self::new(key_desc, value_desc, config);
        for pair in tuples.chunks_exact(2) {
            if !map.put(pair[0].clone(), pair[1].clone()) {
                return Err(Error::CapacityExceeded(format!(
                    "{} pairs do not fit in {} entries / {} bytes",
                    tuples.len() / 2,
                    map.config.max_entries,
                    map.config.max_bytes
                )));
            }
        }
        Ok(map)
    }

    pub fn key_desc(&self) -> &TupleDesc {
        &self.key_desc
    }

    pub fn value_desc(&self) -> &TupleDesc {
        &self.value_desc
    }

    pub fn config(&self) -> &StagingConfig {
        &self.config
    }

    /// Insert or overwrite. Returns `false`, changing nothing, when the write
    /// does not fit.
    pub fn put(&mut self, key: Tuple, value: Tuple) -> bool {
        self.stage(key, Some(value))
    }

    /// Stage a delete. Returns `false`, changing nothing, when the tombstone
    /// does not fit.
    pub fn delete(&mut self, key: Tuple) -> bool {
        self.stage(key, None)
    }

    fn stage(&mut self, key: Tuple, value: Option<Tuple>) -> bool {
        match self.list.find(&self.key_desc, &key) {
            Some(i) => {
                let old = entry_bytes(&key, self.list.value(i));
                let new = entry_bytes(&key, value.as_ref());
                let bytes = self.bytes - old + new;
                if bytes > self.config.max_bytes {
                    return false;
                }
                let was_live = self.list.value(i).is_some();
                let is_live = value.is_some();
                self.list.set(i, value);
                self.bytes = bytes;
                match (was_live, is_live) {
                    (true, false) => self.live -= 1,
                    (false, true) => self.live += 1,
                    _ => {}
                }
            }
            None => {
                let bytes = self.bytes + entry_bytes(&key, value.as_ref());
                if self.list.len() >= self.config.max_entries || bytes > self.config.max_bytes {
                    return false;
                }
                if value.is_some() {
                    self.live += 1;
                }
                self.list.insert(&self.key_desc, key, value);
                self.bytes = bytes;
            }
        }
        true
    }

    /// Most recently staged value; `None` if absent or deleted.
    pub fn get(&self, key: &Tuple) -> Option<&Tuple> {
        self.list
            .find(&self.key_desc, key)
            .and_then(|i| self.list.value(i))
    }

    pub fn has(&self, key: &Tuple) -> bool {
        self.get(key).is_some()
    }

    /// `Some(None)` if `key` has a staged delete, `Some(Some(v))` for a staged
    /// upsert, `None` if nothing is staged for it.
    pub fn staged(&self, key: &Tuple) -> Option<Option<&Tuple>> {
        self.list
            .find(&self.key_desc, key)
            .map(|i| self.list.value(i))
    }

    /// Live (non-deleted) entries.
    pub fn count(&self) -> usize {
        self.live
    }

    /// Staged keys, tombstones included.
    pub fn edit_count(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.len() == 0
    }

    /// Staged key + value bytes.
    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn clear(&mut self) {
        self.list.clear();
        self.bytes = 0;
        self.live = 0;
    }

    pub fn iter_all(&self) -> StagingCursor<'_> {
        StagingCursor::new(self, self.list.first(), self.list.last(), false)
    }

    pub fn iter_range(&self, range: &Range) -> strata_db_core::Result<StagingCursor<'_>> {
        range.validate(&self.key_desc)?;
        let lo = match &range.start {
            Bound::Unbounded => self.list.first(),
            Bound::Included(k) => self.list.seek_ge(&self.key_desc, k, false),
            Bound::Excluded(k) => self.list.seek_ge(&self.key_desc, k, true),
        };
        let hi = match &range.stop {
            Bound::Unbounded => self.list.last(),
            Bound::Included(k) => self.list.seek_le(&self.key_desc, k, false),
            Bound::Excluded(k) => self.list.seek_le(&self.key_desc, k, true),
        };
        // an empty window: lo past hi
        let empty = lo == NIL
            || hi == NIL
            || self.key_desc.compare(self.list.key(lo), self.list.key(hi)).is_gt();
        Ok(if empty {
            StagingCursor::new(self, NIL, NIL, range.reverse)
        } else {
            StagingCursor::new(self, lo, hi, range.reverse)
        })
    }

    /// Every staged edit in ascending key order, tombstones as `None`.
    pub fn edits(&self) -> impl Iterator<Item = Edit> + '_ {
        let mut i = self.list.first();
        std::iter::from_fn(move || {
            if i == NIL {
                return None;
            }
            let edit = (self.list.key(i).clone(), self.list.value(i).cloned());
            i = self.list.next(i);
            Some(edit)
        })
    }
}

impl std::fmt::Debug for StagingMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingMap")
            .field("live", &self.live)
            .field("edits", &self.list.len())
            .field("bytes", &self.bytes)
            .finish()
    }
}

// ============================================================================
// Cursor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pos {
    Before,
    At(u32),
    After,
}

/// Bidirectional cursor over a window of a [`StagingMap`].
///
/// "Forward" is the traversal direction of the range: ascending normally,
/// descending for reverse ranges. Deleted keys are skipped.
pub struct StagingCursor<'a> {
    map: &'a StagingMap,
    /// First and last node of the window in ascending order.
    lo: u32,
    hi: u32,
    reverse: bool,
    pos: Pos,
}

impl<'a> StagingCursor<'a> {
    fn new(map: &'a StagingMap, lo: u32, hi: u32, reverse: bool) -> Self {
        let mut cursor = Self {
            map,
            lo,
            hi,
            reverse,
            pos: Pos::Before,
        };
        cursor.advance();
        cursor
    }

    fn start(&self) -> u32 {
        if self.reverse {
            self.hi
        } else {
            self.lo
        }
    }

    fn end(&self) -> u32 {
        if self.reverse {
            self.lo
        } else {
            self.hi
        }
    }

    /// One raw step in traversal direction (`forward`) or against it.
    fn step_raw(&self, i: u32, forward: bool) -> u32 {
        let edge = if forward { self.end() } else { self.start() };
        if i == edge {
            return NIL;
        }
        if forward != self.reverse {
            self.map.list.next(i)
        } else {
            self.map.list.prev(i)
        }
    }

    fn settle(&mut self, mut i: u32, forward: bool) {
        while i != NIL && self.map.list.value(i).is_none() {
            i = self.step_raw(i, forward);
        }
        self.pos = match (i, forward) {
            (NIL, true) => Pos::After,
            (NIL, false) => Pos::Before,
            (i, _) => Pos::At(i),
        };
    }

    /// The entry under the cursor.
    pub fn current(&self) -> Option<(&'a Tuple, &'a Tuple)> {
        let map = self.map;
        match self.pos {
            Pos::At(i) => map.list.value(i).map(|v| (map.list.key(i), v)),
            _ => None,
        }
    }

    /// Move one entry in traversal direction.
    pub fn advance(&mut self) {
        let next = match self.pos {
            Pos::Before => self.start(),
            Pos::At(i) => self.step_raw(i, true),
            Pos::After => return,
        };
        self.settle(next, true);
    }

    /// Move one entry against traversal direction.
    pub fn retreat(&mut self) {
        let prev = match self.pos {
            Pos::After => self.end(),
            Pos::At(i) => self.step_raw(i, false),
            Pos::Before => return,
        };
        self.settle(prev, false);
    }

    /// Entries remaining from the current one to the end of the window.
    ///
    /// Named apart from `Iterator::count`, which would consume the cursor.
    pub fn remaining(&self) -> usize {
        let mut n = 0;
        let mut i = match self.pos {
            Pos::At(i) => i,
            Pos::Before => self.start(),
            Pos::After => return 0,
        };
        while i != NIL {
            if self.map.list.value(i).is_some() {
                n += 1;
            }
            i = self.step_raw(i, true);
        }
        n
    }
}

impl<'a> Iterator for StagingCursor<'a> {
    type Item = (Tuple, Tuple);

    fn next(&mut self) -> Option<Self::Item> {
        let (k, v) = self.current()?;
        let entry = (k.clone(), v.clone());
        self.advance();
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_db_core::{Encoding, FieldType, Value};

    fn kd() -> TupleDesc {
        TupleDesc::new(vec![FieldType::required(Encoding::Int64)])
    }

    fn vd() -> TupleDesc {
        TupleDesc::new(vec![FieldType::nullable(Encoding::String)])
    }

    fn k(i: i64) -> Tuple {
        kd().tuple_of(&[Some(Value::Int(i))]).unwrap()
    }

    fn v(s: &str) -> Tuple {
        vd().tuple_of(&[Some(Value::from(s))]).unwrap()
    }

    fn int(t: &Tuple) -> i64 {
        kd().value(0, t).unwrap().unwrap().as_int().unwrap()
    }

    fn keys(c: StagingCursor<'_>) -> Vec<i64> {
        c.map(|(k, _)| int(&k)).collect()
    }

    fn map_of(ids: impl IntoIterator<Item = i64>) -> StagingMap {
        let mut m = StagingMap::new(kd(), vd(), StagingConfig::default());
        for i in ids {
            assert!(m.put(k(i), v(&i.to_string())));
        }
        m
    }

    #[test]
    fn test_get_returns_latest_put() {
        let mut m = map_of([1, 2]);
        assert!(m.put(k(1), v("again")));
        assert_eq!(m.get(&k(1)), Some(&v("again")));
        assert_eq!(m.get(&k(3)), None);
        assert!(m.has(&k(2)));
        assert_eq!(m.count(), 2);
    }

    #[test]
    fn test_iteration_follows_comparator() {
        let m = map_of([30, -4, 7, 0, 12]);
        assert_eq!(keys(m.iter_all()), vec![-4, 0, 7, 12, 30]);
    }

    #[test]
    fn test_put_beyond_entry_capacity() {
        let mut m = StagingMap::new(kd(), vd(), StagingConfig::new(2, usize::MAX));
        assert!(m.put(k(1), v("a")));
        assert!(m.put(k(2), v("b")));
        assert!(!m.put(k(3), v("c")));
        assert_eq!(m.count(), 2);
        assert_eq!(m.get(&k(3)), None);
        // overwrite of an existing key still fits
        assert!(m.put(k(2), v("bb")));
        assert_eq!(keys(m.iter_all()), vec![1, 2]);
    }

    #[test]
    fn test_put_beyond_byte_capacity() {
        let one = k(1).size() + v("a").size();
        let mut m = StagingMap::new(kd(), vd(), StagingConfig::new(100, one));
        assert!(m.put(k(1), v("a")));
        let before = m.bytes();
        assert!(!m.put(k(1), v("much longer value")));
        assert_eq!(m.get(&k(1)), Some(&v("a")));
        assert_eq!(m.bytes(), before);
    }

    #[test]
    fn test_delete_hides_key() {
        let mut m = map_of([1, 2, 3]);
        assert!(m.delete(k(2)));
        assert!(!m.has(&k(2)));
        assert_eq!(m.staged(&k(2)), Some(None));
        assert_eq!(m.count(), 2);
        assert_eq!(m.edit_count(), 3);
        assert_eq!(keys(m.iter_all()), vec![1, 3]);
        assert_eq!(m.edits().filter(|(_, v)| v.is_none()).count(), 1);
    }

    #[test]
    fn test_range_and_reverse() {
        let m = map_of(0..20);
        let r = Range::new(Bound::Excluded(k(3)), Bound::Included(k(8)));
        assert_eq!(keys(m.iter_range(&r).unwrap()), vec![4, 5, 6, 7, 8]);
        assert_eq!(
            keys(m.iter_range(&r.clone().reversed()).unwrap()),
            vec![8, 7, 6, 5, 4]
        );
        let empty = Range::new(Bound::Excluded(k(3)), Bound::Excluded(k(4)));
        assert!(keys(m.iter_range(&empty).unwrap()).is_empty());
        let past = Range::new(Bound::Included(k(50)), Bound::Unbounded);
        assert!(keys(m.iter_range(&past).unwrap()).is_empty());
    }

    #[test]
    fn test_cursor_advance_retreat_count() {
        let mut m = map_of(0..5);
        m.delete(k(2));
        let mut c = m.iter_all();
        assert_eq!(c.remaining(), 4);
        assert_eq!(int(c.current().unwrap().0), 0);
        c.advance();
        c.advance();
        assert_eq!(int(c.current().unwrap().0), 3);
        assert_eq!(c.remaining(), 2);
        c.retreat();
        assert_eq!(int(c.current().unwrap().0), 1);
        c.retreat();
        c.retreat();
        assert!(c.current().is_none());
        c.advance();
        assert_eq!(int(c.current().unwrap().0), 0);
    }

    #[test]
    fn test_from_tuples() {
        let tuples = vec![k(2), v("b"), k(1), v("a")];
        let m = StagingMap::from_tuples(kd(), vd(), StagingConfig::default(), &tuples).unwrap();
        assert_eq!(keys(m.iter_all()), vec![1, 2]);

        let odd = vec![k(1), v("a"), k(2)];
        assert!(matches!(
            StagingMap::from_tuples(kd(), vd(), StagingConfig::default(), &odd),
            Err(Error::Malformed(_))
        ));
    }
}
