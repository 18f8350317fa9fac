//! Memory-bounded external sort over tuples.
//!
//! Tuples are buffered until the byte budget is reached, then sorted and
//! spilled as an immutable run file inside a private temp directory. When
//! the number of spilled runs reaches `max_open_runs`, the existing runs are
//! merged into one before the next spill. [`TupleSorter::flush`] k-way merges
//! every run plus the unspilled tail into one lazily produced sequence.
//!
//! The temp directory is owned by the sorter and then by the
//! [`SortedTuples`] it hands out; it is removed when the merged sequence is
//! drained, when either is closed, or on drop.

use super::merge::{DescOrder, KWayMerge, KeyOrder, MemoryRun, RunSource};
use super::run_file::{RunFileInfo, RunFileWriter};
use super::streaming_reader::StreamingRunReader;
use crate::config::IndexBuildConfig;
use crate::error::{IndexerError, Result};
use std::path::PathBuf;
use strata_db_core::{CancelToken, Tuple};
use tempfile::TempDir;

/// Records between cancellation checks while merging.
const CANCEL_CHECK_INTERVAL: u64 = 1024;

/// Bytes charged against the budget for one buffered tuple.
#[inline]
fn charge(t: &Tuple) -> usize {
    t.size() + std::mem::size_of::<Tuple>()
}

fn release_dir(dir: Option<TempDir>) {
    if let Some(dir) = dir {
        let path = dir.path().to_path_buf();
        if let Err(e) = dir.close() {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove sort directory");
        }
    }
}

// ============================================================================
// TupleSorter
// ============================================================================

pub struct TupleSorter<O: KeyOrder = DescOrder> {
    order: O,
    budget_bytes: usize,
    max_open_runs: usize,
    read_batch: usize,
    temp_root: Option<PathBuf>,
    buffer: Vec<Tuple>,
    buffer_bytes: usize,
    runs: Vec<RunFileInfo>,
    /// Sequence number for run file names.
    next_run: u32,
    /// Runs written so far, including merged-down ones.
    spilled: u32,
    total: u64,
    dir: Option<TempDir>,
    closed: bool,
}

impl<O: KeyOrder> TupleSorter<O> {
    pub fn new(order: O, config: &IndexBuildConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            order,
            budget_bytes: config.sort_budget_bytes,
            max_open_runs: config.max_open_runs,
            read_batch: config.read_batch,
            temp_root: config.temp_dir.clone(),
            buffer: Vec::new(),
            buffer_bytes: 0,
            runs: Vec::new(),
            next_run: 0,
            spilled: 0,
            total: 0,
            dir: None,
            closed: false,
        })
    }

    /// Tuples inserted so far.
    pub fn len(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Sorted runs written to disk so far, counting runs later merged down.
    pub fn spilled_runs(&self) -> u32 {
        self.spilled
    }

    /// Runs currently on disk.
    pub fn open_runs(&self) -> usize {
        self.runs.len()
    }

    /// Buffer one tuple, spilling a sorted run if the budget is exhausted.
    pub fn insert(&mut self, tuple: Tuple, cancel: &CancelToken) -> Result<()> {
        if self.closed {
            return Err(IndexerError::SorterClosed);
        }
        self.buffer_bytes += charge(&tuple);
        self.buffer.push(tuple);
        self.total += 1;
        if self.buffer_bytes >= self.budget_bytes {
            cancel.check()?;
            self.spill(cancel)?;
        }
        Ok(())
    }

    fn run_dir(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.dir {
            return Ok(dir.path().to_path_buf());
        }
        let mut builder = tempfile::Builder::new();
        builder.prefix("strata-sort-");
        let dir = match &self.temp_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };
        tracing::debug!(path = %dir.path().display(), "created sort directory");
        let path = dir.path().to_path_buf();
        self.dir = Some(dir);
        Ok(path)
    }

    fn next_run_path(&mut self) -> Result<PathBuf> {
        let dir = self.run_dir()?;
        let path = dir.join(format!("run_{:05}.srn", self.next_run));
        self.next_run += 1;
        Ok(path)
    }

    fn sort_buffer(&mut self) {
        let order = self.order.clone();
        self.buffer.sort_unstable_by(|a, b| order.compare(a, b));
    }

    /// Sort the buffer and write it as a new run.
    fn spill(&mut self, cancel: &CancelToken) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        if self.runs.len() >= self.max_open_runs {
            self.merge_down(cancel)?;
        }
        self.sort_buffer();
        let path = self.next_run_path()?;
        let mut writer = RunFileWriter::create(&path)?;
        for t in &self.buffer {
            writer.push(t)?;
        }
        let info = writer.finish()?;
        tracing::debug!(
            records = info.record_count,
            bytes = info.data_len,
            path = %info.path.display(),
            "spilled sort run"
        );
        self.runs.push(info);
        self.spilled += 1;
        self.buffer.clear();
        self.buffer_bytes = 0;
        Ok(())
    }

    /// Merge every open run into a single run.
    fn merge_down(&mut self, cancel: &CancelToken) -> Result<()> {
        let _span = tracing::info_span!("merge_down", runs = self.runs.len()).entered();
        let inputs = std::mem::take(&mut self.runs);
        let mut readers = Vec::with_capacity(inputs.len());
        for info in &inputs {
            readers.push(StreamingRunReader::open(&info.path, self.read_batch)?);
        }
        let mut merge = KWayMerge::new(readers, self.order.clone());
        let path = self.next_run_path()?;
        let mut writer = RunFileWriter::create(&path)?;
        let mut n: u64 = 0;
        while let Some(t) = merge.next_tuple()? {
            n += 1;
            if n % CANCEL_CHECK_INTERVAL == 0 {
                cancel.check()?;
            }
            writer.push(&t)?;
        }
        let merged = writer.finish()?;
        drop(merge);
        for info in &inputs {
            if let Err(e) = std::fs::remove_file(&info.path) {
                tracing::warn!(path = %info.path.display(), error = %e, "failed to remove merged run");
            }
        }
        tracing::info!(
            inputs = inputs.len(),
            records = merged.record_count,
            "merged sort runs"
        );
        self.runs.push(merged);
        self.spilled += 1;
        Ok(())
    }

    /// Finish inserting and produce the globally sorted sequence.
    ///
    /// The unspilled tail stays in memory and joins the merge as one more
    /// source. No run file is written when nothing was spilled.
    pub fn flush(mut self, cancel: &CancelToken) -> Result<SortedTuples<O>> {
        if self.closed {
            return Err(IndexerError::SorterClosed);
        }
        cancel.check()?;
        self.sort_buffer();

        let mut sources = Vec::with_capacity(self.runs.len() + 1);
        for info in &self.runs {
            sources.push(RunSource::File(StreamingRunReader::open(&info.path, self.read_batch)?));
        }
        let tail = std::mem::take(&mut self.buffer);
        if !tail.is_empty() {
            sources.push(RunSource::Memory(MemoryRun::new(tail)));
        }
        tracing::debug!(
            records = self.total,
            runs = self.runs.len(),
            "sorter flushed"
        );

        let merge = KWayMerge::new(sources, self.order.clone());
        let out = SortedTuples {
            merge: Some(merge),
            dir: self.dir.take(),
            cancel: cancel.clone(),
            total: self.total,
            emitted: 0,
        };
        self.runs.clear();
        self.closed = true;
        Ok(out)
    }

    /// Discard buffered tuples and remove every run. Idempotent.
    pub fn close(&mut self) {
        self.closed = true;
        self.buffer = Vec::new();
        self.buffer_bytes = 0;
        self.runs.clear();
        release_dir(self.dir.take());
    }
}

impl<O: KeyOrder> Drop for TupleSorter<O> {
    fn drop(&mut self) {
        self.close();
    }
}

// ============================================================================
// SortedTuples
// ============================================================================

/// Globally sorted output of a [`TupleSorter`].
///
/// Yields every inserted tuple once (duplicates included). Run files are
/// removed as soon as the sequence ends, fails, or is closed.
pub struct SortedTuples<O: KeyOrder = DescOrder> {
    merge: Option<KWayMerge<RunSource, O>>,
    dir: Option<TempDir>,
    cancel: CancelToken,
    total: u64,
    emitted: u64,
}

impl<O: KeyOrder> SortedTuples<O> {
    /// Total tuples in the sequence.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// True while run files are still held.
    pub fn holds_runs(&self) -> bool {
        self.dir.is_some()
    }

    /// Stop early and release run storage. Idempotent.
    pub fn close(&mut self) {
        self.merge = None;
        release_dir(self.dir.take());
    }
}

impl<O: KeyOrder> Iterator for SortedTuples<O> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        let merge = self.merge.as_mut()?;
        if self.emitted % CANCEL_CHECK_INTERVAL == 0 {
            if let Err(e) = self.cancel.check() {
                self.close();
                return Some(Err(e.into()));
            }
        }
        match merge.next_tuple() {
            Ok(Some(t)) => {
                self.emitted += 1;
                Some(Ok(t))
            }
            Ok(None) => {
                self.close();
                None
            }
            Err(e) => {
                self.close();
                Some(Err(e.into()))
            }
        }
    }
}

impl<O: KeyOrder> Drop for SortedTuples<O> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_db_core::{Encoding, FieldType, TupleDesc, Value};

    fn desc() -> TupleDesc {
        TupleDesc::new(vec![FieldType::required(Encoding::Int64)])
    }

    fn key(v: i64) -> Tuple {
        desc().tuple_of(&[Some(Value::Int(v))]).unwrap()
    }

    fn int(t: &Tuple) -> i64 {
        desc().value(0, t).unwrap().unwrap().as_int().unwrap()
    }

    fn small_config(dir: &TempDir) -> IndexBuildConfig {
        IndexBuildConfig::small()
            .with_sort_budget_bytes(256)
            .with_temp_dir(dir.path())
    }

    fn shuffled(n: i64) -> Vec<i64> {
        // Deterministic permutation: 7919 is coprime with the test sizes.
        (0..n).map(|i| (i * 7919) % n).collect()
    }

    #[test]
    fn test_in_memory_sort() {
        let cancel = CancelToken::new();
        let mut sorter = TupleSorter::new(DescOrder(desc()), &IndexBuildConfig::default()).unwrap();
        for v in [5, 3, 9, 1, 3] {
            sorter.insert(key(v), &cancel).unwrap();
        }
        assert_eq!(sorter.spilled_runs(), 0);
        let out: Vec<i64> = sorter
            .flush(&cancel)
            .unwrap()
            .map(|t| int(&t.unwrap()))
            .collect();
        assert_eq!(out, vec![1, 3, 3, 5, 9]);
    }

    #[test]
    fn test_spilled_sort_matches_memory_sort() {
        let tmp = TempDir::new().unwrap();
        let cancel = CancelToken::new();
        let input = shuffled(500);
        let mut sorter = TupleSorter::new(DescOrder(desc()), &small_config(&tmp)).unwrap();
        for &v in &input {
            sorter.insert(key(v), &cancel).unwrap();
        }
        assert!(sorter.spilled_runs() >= 2);
        assert!(sorter.open_runs() <= 4);
        let out: Vec<i64> = sorter
            .flush(&cancel)
            .unwrap()
            .map(|t| int(&t.unwrap()))
            .collect();
        let mut expected = input.clone();
        expected.sort_unstable();
        assert_eq!(out, expected);
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_close_removes_runs() {
        let tmp = TempDir::new().unwrap();
        let cancel = CancelToken::new();
        let mut sorter = TupleSorter::new(DescOrder(desc()), &small_config(&tmp)).unwrap();
        for v in shuffled(200) {
            sorter.insert(key(v), &cancel).unwrap();
        }
        assert!(sorter.spilled_runs() > 0);
        sorter.close();
        sorter.close();
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
        assert!(matches!(
            sorter.insert(key(1), &cancel),
            Err(IndexerError::SorterClosed)
        ));
    }

    #[test]
    fn test_early_close_of_output() {
        let tmp = TempDir::new().unwrap();
        let cancel = CancelToken::new();
        let mut sorter = TupleSorter::new(DescOrder(desc()), &small_config(&tmp)).unwrap();
        for v in shuffled(200) {
            sorter.insert(key(v), &cancel).unwrap();
        }
        let mut out = sorter.flush(&cancel).unwrap();
        assert!(out.holds_runs());
        assert_eq!(int(&out.next().unwrap().unwrap()), 0);
        out.close();
        assert!(out.next().is_none());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_cancelled_sort() {
        let tmp = TempDir::new().unwrap();
        let cancel = CancelToken::new();
        let mut sorter = TupleSorter::new(DescOrder(desc()), &small_config(&tmp)).unwrap();
        for v in shuffled(100) {
            sorter.insert(key(v), &cancel).unwrap();
        }
        cancel.cancel();
        let err = sorter.flush(&cancel).err().unwrap();
        assert!(err.is_cancellation());
        assert_eq!(std::fs::read_dir(tmp.path()).unwrap().count(), 0);
    }
}
