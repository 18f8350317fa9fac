//! Range iteration over a persisted map.
//!
//! The cursor keeps the root-to-leaf path as a stack of `(node, index)`
//! frames. Seeking descends once per range; stepping moves within the leaf
//! and climbs only when a leaf boundary is crossed. Nothing is read until the
//! first call to `next`.

use super::node::Node;
use crate::cancel::CancelToken;
use crate::content_id::ContentId;
use crate::error::{Error, Result};
use crate::range::Range;
use crate::storage::NodeStore;
use crate::val::{Tuple, TupleDesc};
use std::cmp::Ordering;
use std::ops::Bound;
use std::sync::Arc;

pub(crate) fn load_node(store: &dyn NodeStore, id: &ContentId) -> Result<Arc<Node>> {
    let bytes = store.read(id)?;
    Node::decode(&bytes)
        .map(Arc::new)
        .map_err(|e| Error::corrupt(format!("node {}: {}", id, e)))
}

struct Frame {
    node: Arc<Node>,
    idx: usize,
}

/// Lazy, forward-only iterator over the entries of a persisted map that fall
/// inside a [`Range`], in ascending or descending key order.
pub struct RangeIter {
    store: Arc<dyn NodeStore>,
    root: ContentId,
    key_desc: TupleDesc,
    range: Range,
    cancel: CancelToken,
    stack: Vec<Frame>,
    started: bool,
    done: bool,
}

impl RangeIter {
    pub(crate) fn new(
        store: Arc<dyn NodeStore>,
        root: ContentId,
        key_desc: TupleDesc,
        range: Range,
        cancel: CancelToken,
    ) -> Self {
        Self {
            store,
            root,
            key_desc,
            range,
            cancel,
            stack: Vec::new(),
            started: false,
            done: false,
        }
    }

    pub fn range(&self) -> &Range {
        &self.range
    }

    fn load(&self, id: &ContentId) -> Result<Arc<Node>> {
        self.cancel.check()?;
        load_node(self.store.as_ref(), id)
    }

    fn child_id(node: &Node, idx: usize) -> Option<ContentId> {
        match node {
            Node::Branch { children, .. } => Some(children[idx].id),
            Node::Leaf { .. } => None,
        }
    }

    /// Position on the first key at or after the start cut.
    fn seek_first(&mut self) -> Result<()> {
        let mut node = self.load(&self.root)?;
        loop {
            let idx = {
                let desc = &self.key_desc;
                let before = |k: &Tuple| match &self.range.start {
                    Bound::Unbounded => false,
                    Bound::Included(lo) => desc.compare(k, lo) == Ordering::Less,
                    Bound::Excluded(lo) => desc.compare(k, lo) != Ordering::Greater,
                };
                partition(&node, before)
            };
            if idx >= node.len() {
                // Nothing at or after the start cut below this node.
                self.stack.clear();
                return Ok(());
            }
            let child = Self::child_id(&node, idx);
            self.stack.push(Frame {
                node: Arc::clone(&node),
                idx,
            });
            match child {
                Some(id) => node = self.load(&id)?,
                None => return Ok(()),
            }
        }
    }

    /// Position on the last key at or before the stop cut.
    fn seek_last(&mut self) -> Result<()> {
        let mut node = self.load(&self.root)?;
        loop {
            if node.is_empty() {
                self.stack.clear();
                return Ok(());
            }
            let not_past = {
                let desc = &self.key_desc;
                let not_past = |k: &Tuple| match &self.range.stop {
                    Bound::Unbounded => true,
                    Bound::Included(hi) => desc.compare(k, hi) != Ordering::Greater,
                    Bound::Excluded(hi) => desc.compare(k, hi) == Ordering::Less,
                };
                partition(&node, not_past)
            };
            match Self::child_id(&node, 0) {
                Some(_) => {
                    // The first child whose max key is past the stop may still
                    // hold keys before it.
                    let idx = not_past.min(node.len() - 1);
                    let id = Self::child_id(&node, idx);
                    self.stack.push(Frame {
                        node: Arc::clone(&node),
                        idx,
                    });
                    if let Some(id) = id {
                        node = self.load(&id)?;
                    }
                }
                None => {
                    if not_past == 0 {
                        self.stack.push(Frame { node, idx: 0 });
                        return self.retreat();
                    }
                    self.stack.push(Frame {
                        node,
                        idx: not_past - 1,
                    });
                    return Ok(());
                }
            }
        }
    }

    /// Move to the next leaf entry, crossing leaf boundaries as needed.
    fn advance(&mut self) -> Result<()> {
        // climb until some frame can move right
        loop {
            let Some(top) = self.stack.last_mut() else {
                return Ok(());
            };
            top.idx += 1;
            if top.idx < top.node.len() {
                break;
            }
            self.stack.pop();
        }
        self.descend(true)
    }

    /// Move to the previous leaf entry.
    fn retreat(&mut self) -> Result<()> {
        loop {
            let Some(top) = self.stack.last_mut() else {
                return Ok(());
            };
            if top.idx > 0 {
                top.idx -= 1;
                break;
            }
            self.stack.pop();
        }
        self.descend(false)
    }

    /// From the current frame, descend to the leftmost (or rightmost) leaf entry.
    fn descend(&mut self, leftmost: bool) -> Result<()> {
        loop {
            let child = match self.stack.last() {
                Some(top) => Self::child_id(&top.node, top.idx),
                None => return Ok(()),
            };
            let Some(id) = child else {
                return Ok(());
            };
            let node = self.load(&id)?;
            if node.is_empty() {
                return Err(Error::corrupt(format!("empty child node {}", id)));
            }
            let idx = if leftmost { 0 } else { node.len() - 1 };
            self.stack.push(Frame { node, idx });
        }
    }

    fn current(&self) -> Option<(Tuple, Tuple)> {
        let top = self.stack.last()?;
        match top.node.as_ref() {
            Node::Leaf { entries } => entries.get(top.idx).cloned(),
            Node::Branch { .. } => None,
        }
    }

    fn step(&mut self) -> Result<Option<(Tuple, Tuple)>> {
        if !self.started {
            self.started = true;
            if self.range.reverse {
                self.seek_last()?;
            } else {
                self.seek_first()?;
            }
        } else if self.range.reverse {
            self.retreat()?;
        } else {
            self.advance()?;
        }
        let Some((k, v)) = self.current() else {
            return Ok(None);
        };
        let in_range = if self.range.reverse {
            self.range.after_start(&self.key_desc, &k)
        } else {
            self.range.before_stop(&self.key_desc, &k)
        };
        Ok(in_range.then_some((k, v)))
    }
}

/// Number of leading keys in `node` for which `pred` holds.
fn partition(node: &Node, pred: impl Fn(&Tuple) -> bool) -> usize {
    match node {
        Node::Leaf { entries } => entries.partition_point(|(k, _)| pred(k)),
        Node::Branch { children, .. } => children.partition_point(|c| pred(&c.max_key)),
    }
}

impl Iterator for RangeIter {
    type Item = Result<(Tuple, Tuple)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                self.stack.clear();
                None
            }
            Err(e) => {
                self.done = true;
                self.stack.clear();
                Some(Err(e))
            }
        }
    }
}
