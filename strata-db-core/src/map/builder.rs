//! Streaming bottom-up construction of persisted maps.
//!
//! Entries arrive in strictly ascending key order. Each level keeps one open
//! node; when a node reaches a boundary it is serialized, written to the
//! [`NodeStore`], and a [`ChildRef`] is pushed into the level above.
//!
//! Boundaries are content defined: after appending an entry, the node closes
//! when `xxh64(key, level)` scaled to `[0, target_bytes)` falls below the
//! entry's size, subject to `min_bytes`/`max_bytes`. The decision depends only
//! on the entry sequence, so identical contents always produce the same root.

use super::node::{leaf_entry_len, ChildRef, Node};
use crate::cancel::CancelToken;
use crate::content_id::ContentId;
use crate::error::{Error, Result};
use crate::storage::NodeStore;
use crate::val::{Tuple, TupleDesc};
use std::cmp::Ordering;
use xxhash_rust::xxh64::xxh64;

/// Node size targets for persisted maps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Expected serialized node size.
    pub target_bytes: usize,
    /// Nodes never close below this size.
    pub min_bytes: usize,
    /// Nodes always close at this size.
    pub max_bytes: usize,
}

/// Default target node size: 4 KiB.
pub const DEFAULT_TARGET_NODE_BYTES: usize = 4 * 1024;

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            target_bytes: DEFAULT_TARGET_NODE_BYTES,
            min_bytes: 512,
            max_bytes: 16 * 1024,
        }
    }
}

impl ChunkConfig {
    /// Tiny nodes, useful for exercising multi-level trees in tests.
    pub fn small() -> Self {
        Self {
            target_bytes: 256,
            min_bytes: 64,
            max_bytes: 1024,
        }
    }

    pub fn with_target_bytes(mut self, bytes: usize) -> Self {
        self.target_bytes = bytes;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_bytes == 0 || self.min_bytes > self.target_bytes || self.target_bytes > self.max_bytes {
            return Err(Error::invalid_schema(format!(
                "chunk sizes must satisfy 0 < min ({}) <= target ({}) <= max ({})",
                self.min_bytes, self.target_bytes, self.max_bytes
            )));
        }
        Ok(())
    }

    #[inline]
    fn is_boundary(&self, level: u8, key: &Tuple, entry_len: usize, node_len: usize) -> bool {
        if node_len < self.min_bytes {
            return false;
        }
        if node_len >= self.max_bytes {
            return true;
        }
        let h = xxh64(key.as_bytes(), level as u64) as u128;
        ((h * self.target_bytes as u128) >> 64) < entry_len as u128
    }
}

#[derive(Default)]
struct BranchLevel {
    children: Vec<ChildRef>,
    bytes: usize,
}

/// Writes a persisted map from an ascending entry stream.
pub struct MapBuilder<'a> {
    store: &'a dyn NodeStore,
    key_desc: TupleDesc,
    config: ChunkConfig,
    leaf: Vec<(Tuple, Tuple)>,
    leaf_bytes: usize,
    /// `branches[i]` holds the open node at level `i + 1`.
    branches: Vec<BranchLevel>,
    last_key: Option<Tuple>,
    count: u64,
    nodes_written: u64,
}

impl<'a> MapBuilder<'a> {
    pub fn new(store: &'a dyn NodeStore, key_desc: TupleDesc, config: ChunkConfig) -> Self {
        Self {
            store,
            key_desc,
            config,
            leaf: Vec::new(),
            leaf_bytes: 0,
            branches: Vec::new(),
            last_key: None,
            count: 0,
            nodes_written: 0,
        }
    }

    /// Append an entry. Keys must be strictly ascending.
    pub fn add(&mut self, key: Tuple, value: Tuple) -> Result<()> {
        if let Some(last) = &self.last_key {
            if self.key_desc.compare(last, &key) != Ordering::Less {
                return Err(Error::unordered(format!(
                    "{} does not follow {}",
                    self.key_desc.format(&key),
                    self.key_desc.format(last)
                )));
            }
        }
        let entry_len = leaf_entry_len(&key, &value);
        self.leaf_bytes += entry_len;
        self.last_key = Some(key.clone());
        self.count += 1;
        let boundary = self.config.is_boundary(0, &key, entry_len, self.leaf_bytes);
        self.leaf.push((key, value));
        if boundary {
            self.flush_leaf()?;
        }
        Ok(())
    }

    /// Entries added so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    fn write_node(&mut self, node: &Node) -> Result<ContentId> {
        self.nodes_written += 1;
        self.store.write(&node.encode())
    }

    fn flush_leaf(&mut self) -> Result<()> {
        let entries = std::mem::take(&mut self.leaf);
        self.leaf_bytes = 0;
        let Some(max_key) = entries.last().map(|(k, _)| k.clone()) else {
            return Ok(());
        };
        let count = entries.len() as u64;
        let id = self.write_node(&Node::Leaf { entries })?;
        self.push_child(1, ChildRef { max_key, id, count })
    }

    fn push_child(&mut self, level: u8, child: ChildRef) -> Result<()> {
        let idx = level as usize - 1;
        if self.branches.len() <= idx {
            self.branches.push(BranchLevel::default());
        }
        let entry_len = child.encoded_len();
        let buf = &mut self.branches[idx];
        buf.bytes += entry_len;
        let boundary = !buf.children.is_empty()
            && self.config.is_boundary(level, &child.max_key, entry_len, buf.bytes);
        buf.children.push(child);
        if boundary {
            self.flush_branch(level)?;
        }
        Ok(())
    }

    fn flush_branch(&mut self, level: u8) -> Result<()> {
        let idx = level as usize - 1;
        let children = std::mem::take(&mut self.branches[idx].children);
        self.branches[idx].bytes = 0;
        let Some(max_key) = children.last().map(|c| c.max_key.clone()) else {
            return Ok(());
        };
        let count = children.iter().map(|c| c.count).sum();
        let id = self.write_node(&Node::Branch { level, children })?;
        self.push_child(level + 1, ChildRef { max_key, id, count })
    }

    /// Flush every open node and return `(root, count)`.
    pub fn finish(mut self) -> Result<(ContentId, u64)> {
        if self.count == 0 {
            let id = self.write_node(&Node::Leaf {
                entries: Vec::new(),
            })?;
            return Ok((id, 0));
        }
        self.flush_leaf()?;

        let mut level = 1u8;
        loop {
            let idx = level as usize - 1;
            let is_top = idx + 1 == self.branches.len();
            if is_top && self.branches[idx].children.len() == 1 {
                let root = &self.branches[idx].children[0];
                tracing::debug!(
                    root = %root.id,
                    entries = self.count,
                    height = level,
                    nodes = self.nodes_written,
                    "map built"
                );
                return Ok((root.id, self.count));
            }
            if level == u8::MAX {
                return Err(Error::storage("map height overflow"));
            }
            self.flush_branch(level)?;
            level += 1;
        }
    }
}

/// Build a map from an ascending entry stream, checking `cancel` per entry.
pub fn build_map<I>(
    store: &dyn NodeStore,
    key_desc: &TupleDesc,
    config: &ChunkConfig,
    entries: I,
    cancel: &CancelToken,
) -> Result<(ContentId, u64)>
where
    I: IntoIterator<Item = Result<(Tuple, Tuple)>>,
{
    let mut builder = MapBuilder::new(store, key_desc.clone(), config.clone());
    for entry in entries {
        cancel.check()?;
        let (k, v) = entry?;
        builder.add(k, v)?;
    }
    builder.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryNodeStore;
    use crate::val::{Encoding, FieldType, Value};

    fn desc() -> TupleDesc {
        TupleDesc::new(vec![FieldType::required(Encoding::Int64)])
    }

    fn entries(n: i64) -> Vec<Result<(Tuple, Tuple)>> {
        let d = desc();
        (0..n)
            .map(|i| Ok((d.tuple_of(&[Some(Value::Int(i))]).unwrap(), Tuple::empty())))
            .collect()
    }

    #[test]
    fn test_same_contents_same_root() {
        let s1 = MemoryNodeStore::new();
        let s2 = MemoryNodeStore::new();
        let cfg = ChunkConfig::small();
        let (a, _) = build_map(&s1, &desc(), &cfg, entries(500), &CancelToken::new()).unwrap();
        let (b, _) = build_map(&s2, &desc(), &cfg, entries(500), &CancelToken::new()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_multi_level_tree() {
        let store = MemoryNodeStore::new();
        let (root, count) = build_map(
            &store,
            &desc(),
            &ChunkConfig::small(),
            entries(2_000),
            &CancelToken::new(),
        )
        .unwrap();
        assert_eq!(count, 2_000);
        let node = Node::decode(&store.read(&root).unwrap()).unwrap();
        assert!(node.level() >= 2, "expected a multi-level tree");
        assert_eq!(node.subtree_count(), 2_000);
    }

    #[test]
    fn test_rejects_unordered() {
        let store = MemoryNodeStore::new();
        let mut input = entries(3);
        input.swap(1, 2);
        let err = build_map(&store, &desc(), &ChunkConfig::small(), input, &CancelToken::new());
        assert!(matches!(err, Err(Error::UnorderedKeys(_))));
    }

    #[test]
    fn test_rejects_duplicates() {
        let store = MemoryNodeStore::new();
        let mut input = entries(2);
        input.push(entries(2).pop().unwrap());
        let err = build_map(&store, &desc(), &ChunkConfig::default(), input, &CancelToken::new());
        assert!(matches!(err, Err(Error::UnorderedKeys(_))));
    }

    #[test]
    fn test_empty_input() {
        let store = MemoryNodeStore::new();
        let (root, count) =
            build_map(&store, &desc(), &ChunkConfig::default(), entries(0), &CancelToken::new())
                .unwrap();
        assert_eq!(count, 0);
        assert!(Node::decode(&store.read(&root).unwrap()).unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_build() {
        let store = MemoryNodeStore::new();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = build_map(&store, &desc(), &ChunkConfig::default(), entries(10), &cancel);
        assert!(matches!(err, Err(Error::Cancelled)));
    }
}
