//! Immutable, content-addressed ordered maps.
//!
//! A [`PersistedMap`] is a search tree whose nodes live in a [`NodeStore`]
//! and are named by the hash of their bytes. A map value is just
//! `(root id, entry count, descriptors)`; it is cheap to clone and safe to
//! share between any number of readers. Every change produces a new map
//! whose unchanged nodes are shared with its predecessor through the store.
//!
//! ## Example
//!
//! ```ignore
//! use strata_db_core::{PersistedMap, ChunkConfig, CancelToken, Range};
//!
//! let map = PersistedMap::build_from(store, kd, vd, sorted_entries, &ChunkConfig::default(), &cancel)?;
//! if let Some(value) = map.get(&key, &cancel)? { /* ... */ }
//! for entry in map.iter_range(&Range::all().reversed(), &cancel)? { /* ... */ }
//! ```

mod builder;
mod cursor;
pub(crate) mod node;

pub use builder::{build_map, ChunkConfig, MapBuilder, DEFAULT_TARGET_NODE_BYTES};
pub use cursor::RangeIter;

use crate::cancel::CancelToken;
use crate::content_id::ContentId;
use crate::error::{Error, Result};
use crate::range::Range;
use crate::storage::NodeStore;
use crate::val::{Tuple, TupleDesc};
use cursor::load_node;
use node::Node;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// A staged change to one key: `Some(value)` to upsert, `None` to delete.
pub type Edit = (Tuple, Option<Tuple>);

// ============================================================================
// OrderedMap trait
// ============================================================================

/// Read contract shared by every ordered map that index builds and scans
/// consume.
pub trait OrderedMap {
    type Iter: Iterator<Item = Result<(Tuple, Tuple)>>;

    fn key_desc(&self) -> &TupleDesc;

    fn value_desc(&self) -> &TupleDesc;

    /// `(key descriptor, value descriptor)`
    fn descriptors(&self) -> (&TupleDesc, &TupleDesc) {
        (self.key_desc(), self.value_desc())
    }

    /// Point lookup. `Ok(None)` when the key is absent.
    fn get(&self, key: &Tuple, cancel: &CancelToken) -> Result<Option<Tuple>>;

    fn has(&self, key: &Tuple, cancel: &CancelToken) -> Result<bool> {
        Ok(self.get(key, cancel)?.is_some())
    }

    /// Lazy iteration over the entries inside `range`.
    fn iter_range(&self, range: &Range, cancel: &CancelToken) -> Result<Self::Iter>;

    fn count(&self) -> u64;
}

// ============================================================================
// PersistedMap
// ============================================================================

#[derive(Clone)]
pub struct PersistedMap {
    store: Arc<dyn NodeStore>,
    root: ContentId,
    count: u64,
    key_desc: TupleDesc,
    value_desc: TupleDesc,
}

impl PersistedMap {
    /// Publish an empty map.
    pub fn empty(store: Arc<dyn NodeStore>, key_desc: TupleDesc, value_desc: TupleDesc) -> Result<Self> {
        let root = store.write(&Node::Leaf { entries: Vec::new() }.encode())?;
        Ok(Self {
            store,
            root,
            count: 0,
            key_desc,
            value_desc,
        })
    }

    /// Bulk-build a map from strictly ascending entries.
    ///
    /// Fails with [`Error::UnorderedKeys`] on the first key that does not
    /// follow its predecessor. Nodes written before the failure are
    /// unreferenced and no map is returned.
    pub fn build_from<I>(
        store: Arc<dyn NodeStore>,
        key_desc: TupleDesc,
        value_desc: TupleDesc,
        entries: I,
        config: &ChunkConfig,
        cancel: &CancelToken,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = Result<(Tuple, Tuple)>>,
    {
        let (root, count) = build_map(store.as_ref(), &key_desc, config, entries, cancel)?;
        Ok(Self {
            store,
            root,
            count,
            key_desc,
            value_desc,
        })
    }

    /// Reopen a previously published map by its root id.
    pub fn load(
        store: Arc<dyn NodeStore>,
        root: ContentId,
        key_desc: TupleDesc,
        value_desc: TupleDesc,
    ) -> Result<Self> {
        let node = load_node(store.as_ref(), &root)?;
        Ok(Self {
            count: node.subtree_count(),
            store,
            root,
            key_desc,
            value_desc,
        })
    }

    /// Content id of the root node; the identity of this map version.
    pub fn id(&self) -> ContentId {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    pub fn iter_all(&self, cancel: &CancelToken) -> RangeIter {
        RangeIter::new(
            Arc::clone(&self.store),
            self.root,
            self.key_desc.clone(),
            Range::all(),
            cancel.clone(),
        )
    }

    /// Merge a strictly ascending edit stream into this map, producing a new
    /// version. Deletes of absent keys are ignored. `self` is untouched.
    pub fn apply_edits<I>(&self, edits: I, config: &ChunkConfig, cancel: &CancelToken) -> Result<Self>
    where
        I: IntoIterator<Item = Result<Edit>>,
    {
        let merged = ApplyEdits {
            desc: &self.key_desc,
            base: self.iter_all(cancel),
            edits: edits.into_iter(),
            next_base: None,
            next_edit: None,
            last_edit: None,
            primed: false,
        };
        let next = Self::build_from(
            Arc::clone(&self.store),
            self.key_desc.clone(),
            self.value_desc.clone(),
            merged,
            config,
            cancel,
        )?;
        tracing::debug!(
            from = %self.root,
            to = %next.root,
            before = self.count,
            after = next.count,
            "edits applied"
        );
        Ok(next)
    }
}

impl OrderedMap for PersistedMap {
    type Iter = RangeIter;

    fn key_desc(&self) -> &TupleDesc {
        &self.key_desc
    }

    fn value_desc(&self) -> &TupleDesc {
        &self.value_desc
    }

    fn get(&self, key: &Tuple, cancel: &CancelToken) -> Result<Option<Tuple>> {
        let mut node = load_node(self.store.as_ref(), &self.root)?;
        loop {
            cancel.check()?;
            let next = match node.as_ref() {
                Node::Leaf { entries } => {
                    return Ok(entries
                        .binary_search_by(|(k, _)| self.key_desc.compare(k, key))
                        .ok()
                        .map(|i| entries[i].1.clone()));
                }
                Node::Branch { children, .. } => {
                    let idx = children.partition_point(|c| {
                        self.key_desc.compare(&c.max_key, key) == Ordering::Less
                    });
                    match children.get(idx) {
                        Some(c) => c.id,
                        None => return Ok(None),
                    }
                }
            };
            node = load_node(self.store.as_ref(), &next)?;
        }
    }

    fn iter_range(&self, range: &Range, cancel: &CancelToken) -> Result<RangeIter> {
        range.validate(&self.key_desc)?;
        Ok(RangeIter::new(
            Arc::clone(&self.store),
            self.root,
            self.key_desc.clone(),
            range.clone(),
            cancel.clone(),
        ))
    }

    fn count(&self) -> u64 {
        self.count
    }
}

impl PartialEq for PersistedMap {
    fn eq(&self, other: &Self) -> bool {
        self.root == other.root
            && self.key_desc == other.key_desc
            && self.value_desc == other.value_desc
    }
}

impl fmt::Debug for PersistedMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistedMap")
            .field("root", &self.root)
            .field("count", &self.count)
            .finish()
    }
}

// ============================================================================
// Edit merge
// ============================================================================

struct ApplyEdits<'d, B, E> {
    desc: &'d TupleDesc,
    base: B,
    edits: E,
    next_base: Option<(Tuple, Tuple)>,
    next_edit: Option<Edit>,
    last_edit: Option<Tuple>,
    primed: bool,
}

impl<B, E> ApplyEdits<'_, B, E>
where
    B: Iterator<Item = Result<(Tuple, Tuple)>>,
    E: Iterator<Item = Result<Edit>>,
{
    fn pull_base(&mut self) -> Result<()> {
        self.next_base = self.base.next().transpose()?;
        Ok(())
    }

    fn pull_edit(&mut self) -> Result<()> {
        let edit = self.edits.next().transpose()?;
        if let Some((k, _)) = &edit {
            if let Some(last) = &self.last_edit {
                if self.desc.compare(last, k) != Ordering::Less {
                    return Err(Error::unordered(format!(
                        "edit {} does not follow {}",
                        self.desc.format(k),
                        self.desc.format(last)
                    )));
                }
            }
            self.last_edit = Some(k.clone());
        }
        self.next_edit = edit;
        Ok(())
    }

    fn step(&mut self) -> Result<Option<(Tuple, Tuple)>> {
        if !self.primed {
            self.primed = true;
            self.pull_base()?;
            self.pull_edit()?;
        }
        loop {
            match (self.next_base.take(), self.next_edit.take()) {
                (None, None) => return Ok(None),
                (Some(b), None) => {
                    self.pull_base()?;
                    return Ok(Some(b));
                }
                (None, Some((k, v))) => {
                    self.pull_edit()?;
                    if let Some(v) = v {
                        return Ok(Some((k, v)));
                    }
                }
                (Some(b), Some(e)) => match self.desc.compare(&b.0, &e.0) {
                    Ordering::Less => {
                        self.next_edit = Some(e);
                        self.pull_base()?;
                        return Ok(Some(b));
                    }
                    Ordering::Greater => {
                        self.next_base = Some(b);
                        self.pull_edit()?;
                        if let (k, Some(v)) = e {
                            return Ok(Some((k, v)));
                        }
                    }
                    Ordering::Equal => {
                        self.pull_base()?;
                        self.pull_edit()?;
                        if let (k, Some(v)) = e {
                            return Ok(Some((k, v)));
                        }
                    }
                },
            }
        }
    }
}

impl<B, E> Iterator for ApplyEdits<'_, B, E>
where
    B: Iterator<Item = Result<(Tuple, Tuple)>>,
    E: Iterator<Item = Result<Edit>>,
{
    type Item = Result<(Tuple, Tuple)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.step().transpose()
    }
}
