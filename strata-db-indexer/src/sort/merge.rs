//! K-way merge of N sorted tuple streams.
//!
//! Uses a manual min-heap to merge N streams into a single globally-sorted
//! sequence. Generic over [`MergeSource`] (spilled run files and the
//! in-memory tail buffer) and over the [`KeyOrder`], so each instantiation
//! inlines its comparator in the heap operations.

use super::streaming_reader::StreamingRunReader;
use std::cmp::Ordering;
use std::io;
use strata_db_core::{Tuple, TupleDesc};

// ============================================================================
// KeyOrder
// ============================================================================

/// Total order used by the sorter and the merge.
pub trait KeyOrder: Clone {
    fn compare(&self, a: &Tuple, b: &Tuple) -> Ordering;
}

/// Order tuples by a [`TupleDesc`].
#[derive(Debug, Clone)]
pub struct DescOrder(pub TupleDesc);

impl KeyOrder for DescOrder {
    #[inline]
    fn compare(&self, a: &Tuple, b: &Tuple) -> Ordering {
        self.0.compare(a, b)
    }
}

// ============================================================================
// MergeSource trait
// ============================================================================

/// Trait for buffered, forward-only tuple streams that can be k-way merged.
pub trait MergeSource {
    /// Peek at the current tuple without advancing. Returns `None` if exhausted.
    fn peek(&self) -> Option<&Tuple>;

    /// Advance to the next tuple, refilling from disk if needed.
    fn advance(&mut self) -> io::Result<()>;

    /// True when all tuples have been consumed.
    fn is_exhausted(&self) -> bool;
}

impl MergeSource for StreamingRunReader {
    #[inline]
    fn peek(&self) -> Option<&Tuple> {
        StreamingRunReader::peek(self)
    }

    fn advance(&mut self) -> io::Result<()> {
        StreamingRunReader::advance(self)
    }

    fn is_exhausted(&self) -> bool {
        StreamingRunReader::is_exhausted(self)
    }
}

/// Sorted tuples that never left memory.
pub struct MemoryRun {
    tuples: Vec<Tuple>,
    pos: usize,
}

impl MemoryRun {
    /// `tuples` must already be sorted.
    pub fn new(tuples: Vec<Tuple>) -> Self {
        Self { tuples, pos: 0 }
    }
}

impl MergeSource for MemoryRun {
    #[inline]
    fn peek(&self) -> Option<&Tuple> {
        self.tuples.get(self.pos)
    }

    fn advance(&mut self) -> io::Result<()> {
        self.pos += 1;
        Ok(())
    }

    fn is_exhausted(&self) -> bool {
        self.pos >= self.tuples.len()
    }
}

/// Either kind of run.
pub enum RunSource {
    File(StreamingRunReader),
    Memory(MemoryRun),
}

impl MergeSource for RunSource {
    #[inline]
    fn peek(&self) -> Option<&Tuple> {
        match self {
            RunSource::File(r) => r.peek(),
            RunSource::Memory(m) => m.peek(),
        }
    }

    fn advance(&mut self) -> io::Result<()> {
        match self {
            RunSource::File(r) => r.advance(),
            RunSource::Memory(m) => m.advance(),
        }
    }

    fn is_exhausted(&self) -> bool {
        match self {
            RunSource::File(r) => r.is_exhausted(),
            RunSource::Memory(m) => m.is_exhausted(),
        }
    }
}

// ============================================================================
// KWayMerge: manual min-heap with generic comparator
// ============================================================================

/// Entry in the min-heap: a tuple + which stream it came from.
struct HeapEntry {
    tuple: Tuple,
    stream_idx: usize,
}

/// K-way merge iterator over sorted streams.
///
/// Ties are broken by stream index, so equal keys from earlier streams are
/// emitted first.
pub struct KWayMerge<T: MergeSource, O: KeyOrder> {
    heap: Vec<HeapEntry>,
    streams: Vec<T>,
    order: O,
}

impl<T: MergeSource, O: KeyOrder> KWayMerge<T, O> {
    /// Create a merge from opened streams. Seeds the heap with the first
    /// tuple from each non-empty stream.
    pub fn new(streams: Vec<T>, order: O) -> Self {
        let mut heap = Vec::with_capacity(streams.len());
        for (idx, stream) in streams.iter().enumerate() {
            if let Some(t) = stream.peek() {
                heap.push(HeapEntry {
                    tuple: t.clone(),
                    stream_idx: idx,
                });
            }
        }

        let mut me = Self {
            heap,
            streams,
            order,
        };

        // Build-heap: heapify from the last internal node down to root.
        if me.heap.len() > 1 {
            let last_internal = (me.heap.len() / 2).saturating_sub(1);
            for i in (0..=last_internal).rev() {
                me.sift_down(i);
            }
        }
        me
    }

    /// Number of input streams.
    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    // ---- Manual min-heap operations ----

    #[inline]
    fn heap_less(&self, i: usize, j: usize) -> bool {
        match self.order.compare(&self.heap[i].tuple, &self.heap[j].tuple) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => self.heap[i].stream_idx < self.heap[j].stream_idx,
        }
    }

    #[inline]
    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut smallest = left;
            if right < len && self.heap_less(right, left) {
                smallest = right;
            }
            if !self.heap_less(smallest, pos) {
                break;
            }
            self.heap.swap(pos, smallest);
            pos = smallest;
        }
    }

    #[inline]
    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.heap_less(pos, parent) {
                break;
            }
            self.heap.swap(pos, parent);
            pos = parent;
        }
    }

    fn heap_pop(&mut self) -> Option<HeapEntry> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let entry = self.heap.pop()?;
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        Some(entry)
    }

    fn heap_push(&mut self, entry: HeapEntry) {
        self.heap.push(entry);
        let pos = self.heap.len() - 1;
        self.sift_up(pos);
    }

    // ---- Public API ----

    /// Pop the next tuple in merge order.
    pub fn next_tuple(&mut self) -> io::Result<Option<Tuple>> {
        let Some(entry) = self.heap_pop() else {
            return Ok(None);
        };
        let idx = entry.stream_idx;

        // Advance the stream and push its next tuple into the heap
        self.streams[idx].advance()?;
        if let Some(next) = self.streams[idx].peek() {
            let next = next.clone();
            self.heap_push(HeapEntry {
                tuple: next,
                stream_idx: idx,
            });
        }
        Ok(Some(entry.tuple))
    }

    /// True when every stream is drained.
    pub fn is_exhausted(&self) -> bool {
        self.heap.is_empty()
    }
}
