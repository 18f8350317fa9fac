//! Bridge from the indexer's fallible key stream to the map builder.
//!
//! The map builder consumes `strata_db_core::Result` entries. Errors raised
//! upstream (sort I/O, duplicate aborts) are parked in a slot and replaced by
//! an `Aborted` core error; the orchestrator takes the parked error back
//! after the build returns.

use crate::error::{IndexerError, Result};
use strata_db_core::Tuple;

pub(crate) struct KeyEntries<'s, I> {
    input: I,
    slot: &'s mut Option<IndexerError>,
}

impl<'s, I> KeyEntries<'s, I>
where
    I: Iterator<Item = Result<Tuple>>,
{
    pub(crate) fn new(input: I, slot: &'s mut Option<IndexerError>) -> Self {
        Self { input, slot }
    }
}

impl<'s, I> Iterator for KeyEntries<'s, I>
where
    I: Iterator<Item = Result<Tuple>>,
{
    type Item = strata_db_core::Result<(Tuple, Tuple)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.input.next()? {
            Ok(key) => Some(Ok((key, Tuple::empty()))),
            Err(IndexerError::Core(e)) => Some(Err(e)),
            Err(e) => {
                let msg = e.to_string();
                *self.slot = Some(e);
                Some(Err(strata_db_core::Error::aborted(msg)))
            }
        }
    }
}

/// Prefer the parked upstream error over the builder's report of it.
pub(crate) fn resolve(err: strata_db_core::Error, slot: &mut Option<IndexerError>) -> IndexerError {
    slot.take().unwrap_or(IndexerError::Core(err))
}
