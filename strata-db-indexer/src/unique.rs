//! Duplicate detection over a sorted index key stream.
//!
//! [`UniqueCheck`] compares each key's indexed-column prefix with the key
//! before it. On equality the [`DuplicateHandler`] decides, per pair,
//! whether to record the violation and keep going or to abort the build.
//! Keys whose prefix contains a NULL never take part in the check.

use crate::error::{IndexerError, Result};
use strata_db_core::{Tuple, TupleDesc};

/// Decision for one duplicate pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DupOutcome {
    /// Keep building; the later key is still emitted.
    Record,
    /// Stop the build with this message.
    Abort(String),
}

pub trait DuplicateHandler {
    /// Called with two adjacent keys whose indexed prefixes are equal.
    /// `desc` describes the full index key.
    fn on_duplicate(&mut self, existing: &Tuple, duplicate: &Tuple, desc: &TupleDesc) -> DupOutcome;
}

impl<F> DuplicateHandler for F
where
    F: FnMut(&Tuple, &Tuple, &TupleDesc) -> DupOutcome,
{
    fn on_duplicate(&mut self, existing: &Tuple, duplicate: &Tuple, desc: &TupleDesc) -> DupOutcome {
        self(existing, duplicate, desc)
    }
}

/// Records every pair and never aborts.
#[derive(Debug, Default)]
pub struct ViolationCollector {
    pub pairs: Vec<(Tuple, Tuple)>,
}

impl ViolationCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

impl DuplicateHandler for ViolationCollector {
    fn on_duplicate(&mut self, existing: &Tuple, duplicate: &Tuple, _desc: &TupleDesc) -> DupOutcome {
        self.pairs.push((existing.clone(), duplicate.clone()));
        DupOutcome::Record
    }
}

/// Aborts on the first pair. Used when a unique index is built without a
/// caller-supplied handler.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectDuplicates;

impl DuplicateHandler for RejectDuplicates {
    fn on_duplicate(&mut self, _existing: &Tuple, duplicate: &Tuple, desc: &TupleDesc) -> DupOutcome {
        DupOutcome::Abort(format!("duplicate entry {}", desc.format(duplicate)))
    }
}

/// Iterator adapter that runs the duplicate check over sorted keys.
///
/// Yields every input key, unless the handler aborts: the adapter then
/// yields [`IndexerError::UniqueViolation`] and ends.
pub struct UniqueCheck<'h, I, H: DuplicateHandler + ?Sized> {
    input: I,
    index: String,
    key_desc: TupleDesc,
    prefix: TupleDesc,
    handler: &'h mut H,
    prev: Option<Tuple>,
    violations: u64,
    done: bool,
}

impl<'h, I, H> UniqueCheck<'h, I, H>
where
    I: Iterator<Item = Result<Tuple>>,
    H: DuplicateHandler + ?Sized,
{
    pub fn new(
        input: I,
        index: impl Into<String>,
        key_desc: TupleDesc,
        prefix_len: usize,
        handler: &'h mut H,
    ) -> Self {
        let prefix = key_desc.prefix(prefix_len);
        Self {
            input,
            index: index.into(),
            key_desc,
            prefix,
            handler,
            prev: None,
            violations: 0,
            done: false,
        }
    }

    /// Pairs reported to the handler so far.
    pub fn violations(&self) -> u64 {
        self.violations
    }

    fn check(&mut self, key: &Tuple) -> Result<()> {
        let prev = self.prev.replace(key.clone());
        let Some(prev) = prev else {
            return Ok(());
        };
        if self.prefix.has_nulls(key) || self.prefix.compare(&prev, key).is_ne() {
            return Ok(());
        }
        self.violations += 1;
        match self.handler.on_duplicate(&prev, key, &self.key_desc) {
            DupOutcome::Record => Ok(()),
            DupOutcome::Abort(message) => Err(IndexerError::UniqueViolation {
                index: self.index.clone(),
                message,
            }),
        }
    }
}

impl<'h, I, H> Iterator for UniqueCheck<'h, I, H>
where
    I: Iterator<Item = Result<Tuple>>,
    H: DuplicateHandler + ?Sized,
{
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = match self.input.next() {
            Some(Ok(key)) => self.check(&key).map(|()| key),
            Some(Err(e)) => Err(e),
            None => {
                if self.violations > 0 {
                    tracing::info!(index = %self.index, violations = self.violations, "unique check recorded violations");
                }
                self.done = true;
                return None;
            }
        };
        if item.is_err() {
            self.done = true;
        }
        Some(item)
    }
}
