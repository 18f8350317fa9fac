//! Write sessions: per-table staging buffers over persisted base maps.
//!
//! A [`TableWriter`] stages writes for one table and reads through its
//! staged edits to the base map. When staging is full, the staged edits are
//! folded into a new base version and the write is retried. A
//! [`WriteSession`] owns one writer per table behind a single lock.

use crate::error::{Result, StagingError};
use crate::staging::{StagingConfig, StagingMap};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use strata_db_core::{CancelToken, ChunkConfig, OrderedMap, PersistedMap, Tuple};

// ============================================================================
// TableWriter
// ============================================================================

pub struct TableWriter {
    name: String,
    base: PersistedMap,
    staging: StagingMap,
    chunk: ChunkConfig,
    spills: u64,
}

impl TableWriter {
    pub fn new(
        name: impl Into<String>,
        base: PersistedMap,
        staging: StagingConfig,
        chunk: ChunkConfig,
    ) -> Self {
        let staging = StagingMap::new(base.key_desc().clone(), base.value_desc().clone(), staging);
        Self {
            name: name.into(),
            base,
            staging,
            chunk,
            spills: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last folded base version (excludes currently staged edits).
    pub fn base(&self) -> &PersistedMap {
        &self.base
    }

    pub fn staging(&self) -> &StagingMap {
        &self.staging
    }

    /// Number of times staging was folded into the base.
    pub fn spills(&self) -> u64 {
        self.spills
    }

    pub fn put(&mut self, key: Tuple, value: Tuple, cancel: &CancelToken) -> Result<()> {
        if self.staging.put(key.clone(), value.clone()) {
            return Ok(());
        }
        self.spill(cancel)?;
        if self.staging.put(key, value) {
            Ok(())
        } else {
            Err(StagingError::overflow(format!(
                "table {}: entry does not fit in an empty staging buffer",
                self.name
            )))
        }
    }

    pub fn delete(&mut self, key: Tuple, cancel: &CancelToken) -> Result<()> {
        if self.staging.delete(key.clone()) {
            return Ok(());
        }
        self.spill(cancel)?;
        if self.staging.delete(key) {
            Ok(())
        } else {
            Err(StagingError::overflow(format!(
                "table {}: key does not fit in an empty staging buffer",
                self.name
            )))
        }
    }

    /// Read through staged edits to the base map.
    pub fn get(&self, key: &Tuple, cancel: &CancelToken) -> Result<Option<Tuple>> {
        match self.staging.staged(key) {
            Some(staged) => Ok(staged.cloned()),
            None => Ok(self.base.get(key, cancel)?),
        }
    }

    pub fn has(&self, key: &Tuple, cancel: &CancelToken) -> Result<bool> {
        Ok(self.get(key, cancel)?.is_some())
    }

    /// Fold staged edits into a new base version and empty the buffer.
    pub fn spill(&mut self, cancel: &CancelToken) -> Result<()> {
        if self.staging.is_empty() {
            return Ok(());
        }
        let edits = self.staging.edit_count();
        let next = self.staging.apply_to(&self.base, &self.chunk, cancel)?;
        tracing::debug!(
            table = %self.name,
            edits,
            root = %next.id(),
            count = next.count(),
            "staging folded into base"
        );
        self.base = next;
        self.staging.clear();
        self.spills += 1;
        Ok(())
    }

    /// Fold staged edits and return the resulting map version.
    pub fn flush(&mut self, cancel: &CancelToken) -> Result<PersistedMap> {
        self.spill(cancel)?;
        Ok(self.base.clone())
    }
}

// ============================================================================
// WriteSession
// ============================================================================

pub struct WriteSession {
    tables: Mutex<FxHashMap<String, TableWriter>>,
    staging: StagingConfig,
    chunk: ChunkConfig,
}

impl WriteSession {
    pub fn new(staging: StagingConfig, chunk: ChunkConfig) -> Self {
        Self {
            tables: Mutex::new(FxHashMap::default()),
            staging,
            chunk,
        }
    }

    /// Register `base` as the starting version of `table`, replacing any
    /// writer already open for it.
    pub fn open_table(&self, table: impl Into<String>, base: PersistedMap) {
        let table = table.into();
        let writer = TableWriter::new(table.clone(), base, self.staging.clone(), self.chunk.clone());
        self.tables.lock().insert(table, writer);
    }

    /// Run `f` against the writer of `table`.
    pub fn with_table<R>(
        &self,
        table: &str,
        f: impl FnOnce(&mut TableWriter) -> Result<R>,
    ) -> Result<R> {
        let mut tables = self.tables.lock();
        let writer = tables
            .get_mut(table)
            .ok_or_else(|| StagingError::unknown_table(table))?;
        f(writer)
    }

    pub fn put(&self, table: &str, key: Tuple, value: Tuple, cancel: &CancelToken) -> Result<()> {
        self.with_table(table, |w| w.put(key, value, cancel))
    }

    pub fn delete(&self, table: &str, key: Tuple, cancel: &CancelToken) -> Result<()> {
        self.with_table(table, |w| w.delete(key, cancel))
    }

    pub fn get(&self, table: &str, key: &Tuple, cancel: &CancelToken) -> Result<Option<Tuple>> {
        self.with_table(table, |w| w.get(key, cancel))
    }

    /// Fold every table's staged edits; returns `(table, version)` sorted by name.
    pub fn flush(&self, cancel: &CancelToken) -> Result<Vec<(String, PersistedMap)>> {
        let mut tables = self.tables.lock();
        let mut out = Vec::with_capacity(tables.len());
        for (name, writer) in tables.iter_mut() {
            out.push((name.clone(), writer.flush(cancel)?));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    /// Flush and end the session.
    pub fn close(self, cancel: &CancelToken) -> Result<Vec<(String, PersistedMap)>> {
        self.flush(cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_db_core::{Encoding, FieldType, MemoryNodeStore, NodeStore, TupleDesc, Value};

    fn kd() -> TupleDesc {
        TupleDesc::new(vec![FieldType::required(Encoding::Int64)])
    }

    fn k(i: i64) -> Tuple {
        kd().tuple_of(&[Some(Value::Int(i))]).unwrap()
    }

    fn empty_base() -> PersistedMap {
        let store: Arc<dyn NodeStore> = Arc::new(MemoryNodeStore::new());
        PersistedMap::empty(store, kd(), kd()).unwrap()
    }

    #[test]
    fn test_writer_spills_when_full() {
        let cancel = CancelToken::new();
        let mut w = TableWriter::new(
            "t",
            empty_base(),
            StagingConfig::new(4, usize::MAX),
            ChunkConfig::small(),
        );
        for i in 0..10 {
            w.put(k(i), k(i * 10), &cancel).unwrap();
        }
        assert!(w.spills() >= 2);
        for i in 0..10 {
            assert_eq!(w.get(&k(i), &cancel).unwrap(), Some(k(i * 10)));
        }
        let map = w.flush(&cancel).unwrap();
        assert_eq!(map.count(), 10);
    }

    #[test]
    fn test_writer_reads_staged_delete() {
        let cancel = CancelToken::new();
        let mut w = TableWriter::new("t", empty_base(), StagingConfig::default(), ChunkConfig::small());
        w.put(k(1), k(1), &cancel).unwrap();
        w.spill(&cancel).unwrap();
        w.delete(k(1), &cancel).unwrap();
        assert!(!w.has(&k(1), &cancel).unwrap());
        assert!(w.base().has(&k(1), &cancel).unwrap());
        assert_eq!(w.flush(&cancel).unwrap().count(), 0);
    }

    #[test]
    fn test_session_tables() {
        let cancel = CancelToken::new();
        let session = WriteSession::new(StagingConfig::default(), ChunkConfig::small());
        session.open_table("b", empty_base());
        session.open_table("a", empty_base());
        session.put("a", k(1), k(2), &cancel).unwrap();
        session.put("b", k(3), k(4), &cancel).unwrap();
        assert_eq!(session.get("a", &k(1), &cancel).unwrap(), Some(k(2)));
        assert!(matches!(
            session.put("zzz", k(1), k(1), &cancel),
            Err(StagingError::UnknownTable(_))
        ));
        let versions = session.close(&cancel).unwrap();
        let names: Vec<_> = versions.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(versions.iter().all(|(_, m)| m.count() == 1));
    }
}
