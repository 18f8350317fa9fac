//! Column mappings between tuple layouts.
//!
//! A [`ColumnMapping`] has one entry per destination slot. Entry `i` names the
//! source position that fills slot `i`, or nothing. In the flat integer form
//! used by catalogs and plans, "nothing" is the sentinel `-1`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Flat-form marker for a destination slot with no source.
pub const NO_SOURCE: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColumnMapping(Vec<Option<usize>>);

impl ColumnMapping {
    pub fn new(slots: Vec<Option<usize>>) -> Self {
        Self(slots)
    }

    /// `slot i <- source i` for `n` slots.
    pub fn identity(n: usize) -> Self {
        Self((0..n).map(Some).collect())
    }

    /// Parse the flat form, where [`NO_SOURCE`] marks an unmapped slot.
    pub fn from_sentinel(slots: &[i32]) -> Result<Self> {
        slots
            .iter()
            .map(|&s| match s {
                NO_SOURCE => Ok(None),
                s if s >= 0 => Ok(Some(s as usize)),
                s => Err(Error::malformed(format!("invalid column mapping entry {}", s))),
            })
            .collect::<Result<Vec<_>>>()
            .map(Self)
    }

    pub fn to_sentinel(&self) -> Vec<i32> {
        self.0
            .iter()
            .map(|s| s.map_or(NO_SOURCE, |i| i as i32))
            .collect()
    }

    /// Number of destination slots.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Source position for destination slot `dest`.
    pub fn source(&self, dest: usize) -> Option<usize> {
        self.0.get(dest).copied().flatten()
    }

    /// `(dest, source)` for every mapped slot, in destination order.
    pub fn mapped(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter_map(|(d, s)| s.map(|s| (d, s)))
    }

    /// True if every slot has a source.
    pub fn is_total(&self) -> bool {
        self.0.iter().all(Option::is_some)
    }
}
