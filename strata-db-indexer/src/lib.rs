//! # Strata DB Indexer
//!
//! Bulk builds of secondary indexes from a primary [`PersistedMap`]:
//!
//! - External sort of derived index keys under a memory budget (`sort`)
//! - Duplicate detection for unique indexes (`unique`)
//! - Proximity (vector) indexes (`proximity`)
//! - Verification of existing indexes (`verify`)
//!
//! The entry point is [`build_secondary_index`].
//!
//! [`PersistedMap`]: strata_db_core::PersistedMap

pub mod build;
pub mod config;
mod entries;
pub mod error;
pub mod proximity;
pub mod secondary;
pub mod sort;
pub mod unique;
pub mod verify;

pub use build::{build_ordered_index, build_secondary_index, SecondaryIndex};
pub use config::{
    IndexBuildConfig, DEFAULT_MAX_OPEN_RUNS, DEFAULT_READ_BATCH, DEFAULT_SORT_BUDGET_BYTES,
};
pub use error::{IndexerError, Result};
pub use proximity::{distance, ProximityMap, ProximityMapBuilder};
pub use secondary::{ColumnKeyBuilder, SecondaryKeyBuilder};
pub use sort::{DescOrder, KeyOrder, SortedTuples, TupleSorter};
pub use unique::{DupOutcome, DuplicateHandler, RejectDuplicates, UniqueCheck, ViolationCollector};
pub use verify::{adopt_secondary_index, verify_secondary_index};
