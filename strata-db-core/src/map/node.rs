//! Persisted map node format.
//!
//! ```text
//! magic: "SMN1" (4B)
//! kind: u8          0 = leaf, 1 = branch
//! level: u8         0 for leaves, parent = child + 1
//! entry_count: u32
//! leaf entries:   [key_len: u32][key][val_len: u32][val]
//! branch entries: [key_len: u32][max_key][child: 32B][subtree_count: u64]
//! ```
//!
//! All integers are little-endian. Children are referenced only by content
//! id, parent to child.

use crate::content_id::ContentId;
use crate::error::{Error, Result};
use crate::val::Tuple;

pub const NODE_MAGIC: [u8; 4] = *b"SMN1";

const KIND_LEAF: u8 = 0;
const KIND_BRANCH: u8 = 1;
const HEADER_LEN: usize = 10;

/// Reference from a branch to one child subtree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRef {
    /// Largest key in the subtree.
    pub max_key: Tuple,
    pub id: ContentId,
    /// Number of entries in the subtree.
    pub count: u64,
}

impl ChildRef {
    /// Bytes this reference occupies inside a branch node.
    pub fn encoded_len(&self) -> usize {
        4 + self.max_key.size() + ContentId::LEN + 8
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf { entries: Vec<(Tuple, Tuple)> },
    Branch { level: u8, children: Vec<ChildRef> },
}

/// Bytes a key/value pair occupies inside a leaf node.
#[inline]
pub fn leaf_entry_len(key: &Tuple, value: &Tuple) -> usize {
    8 + key.size() + value.size()
}

impl Node {
    pub fn len(&self) -> usize {
        match self {
            Node::Leaf { entries } => entries.len(),
            Node::Branch { children, .. } => children.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn level(&self) -> u8 {
        match self {
            Node::Leaf { .. } => 0,
            Node::Branch { level, .. } => *level,
        }
    }

    /// Entries in this subtree.
    pub fn subtree_count(&self) -> u64 {
        match self {
            Node::Leaf { entries } => entries.len() as u64,
            Node::Branch { children, .. } => children.iter().map(|c| c.count).sum(),
        }
    }

    /// Key at position `idx` (leaf key or branch max key).
    pub fn key_at(&self, idx: usize) -> &Tuple {
        match self {
            Node::Leaf { entries } => &entries[idx].0,
            Node::Branch { children, .. } => &children[idx].max_key,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.len() * 64);
        buf.extend_from_slice(&NODE_MAGIC);
        match self {
            Node::Leaf { entries } => {
                buf.push(KIND_LEAF);
                buf.push(0);
                buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
                for (k, v) in entries {
                    put_bytes(&mut buf, k.as_bytes());
                    put_bytes(&mut buf, v.as_bytes());
                }
            }
            Node::Branch { level, children } => {
                buf.push(KIND_BRANCH);
                buf.push(*level);
                buf.extend_from_slice(&(children.len() as u32).to_le_bytes());
                for c in children {
                    put_bytes(&mut buf, c.max_key.as_bytes());
                    buf.extend_from_slice(c.id.as_bytes());
                    buf.extend_from_slice(&c.count.to_le_bytes());
                }
            }
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Node> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::corrupt(format!(
                "node too small: {} < {}",
                bytes.len(),
                HEADER_LEN
            )));
        }
        if bytes[0..4] != NODE_MAGIC {
            return Err(Error::corrupt("node: invalid magic bytes"));
        }
        let kind = bytes[4];
        let level = bytes[5];
        let n = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        let mut r = Reader {
            buf: bytes,
            pos: HEADER_LEN,
        };
        let node = match kind {
            KIND_LEAF => {
                if level != 0 {
                    return Err(Error::corrupt(format!("leaf with level {}", level)));
                }
                let mut entries = Vec::with_capacity(n.min(bytes.len() / 8));
                for _ in 0..n {
                    let k = Tuple::from_bytes(r.bytes()?)?;
                    let v = Tuple::from_bytes(r.bytes()?)?;
                    entries.push((k, v));
                }
                Node::Leaf { entries }
            }
            KIND_BRANCH => {
                if level == 0 {
                    return Err(Error::corrupt("branch with level 0"));
                }
                let mut children = Vec::with_capacity(n.min(bytes.len() / 44));
                for _ in 0..n {
                    let max_key = Tuple::from_bytes(r.bytes()?)?;
                    let id = ContentId::from_slice(r.take(ContentId::LEN)?)?;
                    let mut c = [0u8; 8];
                    c.copy_from_slice(r.take(8)?);
                    children.push(ChildRef {
                        max_key,
                        id,
                        count: u64::from_le_bytes(c),
                    });
                }
                Node::Branch { level, children }
            }
            other => return Err(Error::corrupt(format!("unknown node kind {}", other))),
        };
        if r.pos != bytes.len() {
            return Err(Error::corrupt(format!(
                "{} trailing bytes after node",
                bytes.len() - r.pos
            )));
        }
        Ok(node)
    }
}

fn put_bytes(buf: &mut Vec<u8>, b: &[u8]) {
    buf.extend_from_slice(&(b.len() as u32).to_le_bytes());
    buf.extend_from_slice(b);
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&e| e <= self.buf.len())
            .ok_or_else(|| Error::corrupt(format!("node truncated at offset {}", self.pos)))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.take(4)?;
        let n = u32::from_le_bytes([len[0], len[1], len[2], len[3]]) as usize;
        self.take(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(b: &[u8]) -> Tuple {
        Tuple::from_fields(&[Some(b)])
    }

    #[test]
    fn test_leaf_codec() {
        let node = Node::Leaf {
            entries: vec![(t(b"a"), Tuple::empty()), (t(b"b"), t(b"x"))],
        };
        let decoded = Node::decode(&node.encode()).unwrap();
        assert_eq!(decoded, node);
        assert_eq!(decoded.subtree_count(), 2);
    }

    #[test]
    fn test_branch_codec() {
        let node = Node::Branch {
            level: 1,
            children: vec![ChildRef {
                max_key: t(b"m"),
                id: ContentId::of(b"child"),
                count: 42,
            }],
        };
        let decoded = Node::decode(&node.encode()).unwrap();
        assert_eq!(decoded, node);
        assert_eq!(decoded.subtree_count(), 42);
        assert_eq!(decoded.level(), 1);
    }

    #[test]
    fn test_decode_rejects_truncation() {
        let node = Node::Leaf {
            entries: vec![(t(b"a"), t(b"b"))],
        };
        let bytes = node.encode();
        assert!(Node::decode(&bytes[..bytes.len() - 1]).is_err());
        let mut bad = bytes.clone();
        bad[0] = b'X';
        assert!(matches!(Node::decode(&bad), Err(Error::Corrupt(_))));
    }
}
