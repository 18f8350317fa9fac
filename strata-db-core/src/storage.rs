//! Node storage.
//!
//! Persisted maps read and write their nodes through a [`NodeStore`].
//! Writes are content addressed and idempotent: writing the same bytes twice
//! returns the same [`ContentId`] and stores them once.
//!
//! Two implementations ship with the crate:
//! - [`MemoryNodeStore`] for tests and ephemeral maps
//! - [`FileNodeStore`] laying nodes out as `{root}/{hh}/{hash}.node`

use crate::content_id::ContentId;
use crate::error::{Error, Result};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// NodeStore trait
// ============================================================================

/// Content-addressed node persistence.
pub trait NodeStore: Send + Sync + std::fmt::Debug {
    /// Read the bytes stored under `id`.
    fn read(&self, id: &ContentId) -> Result<Arc<[u8]>>;

    /// Store `bytes` and return their content id.
    fn write(&self, bytes: &[u8]) -> Result<ContentId>;

    fn contains(&self, id: &ContentId) -> Result<bool>;
}

// ============================================================================
// MemoryNodeStore
// ============================================================================

/// In-memory node store.
///
/// Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryNodeStore {
    nodes: Arc<RwLock<FxHashMap<ContentId, Arc<[u8]>>>>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct nodes stored.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }
}

impl NodeStore for MemoryNodeStore {
    fn read(&self, id: &ContentId) -> Result<Arc<[u8]>> {
        self.nodes
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("node {}", id)))
    }

    fn write(&self, bytes: &[u8]) -> Result<ContentId> {
        let id = ContentId::of(bytes);
        self.nodes
            .write()
            .entry(id)
            .or_insert_with(|| Arc::from(bytes));
        Ok(id)
    }

    fn contains(&self, id: &ContentId) -> Result<bool> {
        Ok(self.nodes.read().contains_key(id))
    }
}

// ============================================================================
// FileNodeStore
// ============================================================================

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Directory-backed node store.
///
/// Each node is written to a temporary file and renamed into place, so a
/// reader never observes a partially written node. Reads verify the content
/// hash.
#[derive(Debug, Clone)]
pub struct FileNodeStore {
    root: PathBuf,
}

impl FileNodeStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn node_path(&self, id: &ContentId) -> PathBuf {
        let hex = id.to_hex();
        self.root.join(&hex[..2]).join(format!("{}.node", hex))
    }
}

impl NodeStore for FileNodeStore {
    fn read(&self, id: &ContentId) -> Result<Arc<[u8]>> {
        let path = self.node_path(id);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(format!("node {}", id)));
            }
            Err(e) => return Err(e.into()),
        };
        if !id.verifies(&bytes) {
            return Err(Error::corrupt(format!(
                "node {} at {} does not match its hash",
                id,
                path.display()
            )));
        }
        Ok(Arc::from(bytes))
    }

    fn write(&self, bytes: &[u8]) -> Result<ContentId> {
        let id = ContentId::of(bytes);
        let path = self.node_path(&id);
        if path.exists() {
            return Ok(id);
        }
        let dir = path
            .parent()
            .ok_or_else(|| Error::storage(format!("no parent for {}", path.display())))?;
        fs::create_dir_all(dir)?;

        let tmp_path = dir.join(format!(
            ".{}.{}.{}.tmp",
            id.to_hex(),
            std::process::id(),
            TMP_SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        {
            let mut f = fs::File::create(&tmp_path)?;
            f.write_all(bytes)?;
            f.sync_data()?;
        }
        match fs::rename(&tmp_path, &path) {
            Ok(()) => {}
            Err(_) if path.exists() => {
                // Content-addressed: a concurrent writer produced the same file.
                let _ = fs::remove_file(&tmp_path);
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e.into());
            }
        }
        tracing::trace!(id = %id, bytes = bytes.len(), "node written");
        Ok(id)
    }

    fn contains(&self, id: &ContentId) -> Result<bool> {
        Ok(self.node_path(id).exists())
    }
}
