//! # Strata DB Staging
//!
//! In-memory write buffering in front of persisted maps:
//!
//! - [`StagingMap`]: bounded, ordered skip-list buffer with tombstones
//! - [`StagingMap::apply_to`]: fold staged edits into a new map version
//! - [`WriteSession`] / [`TableWriter`]: per-table buffers that fold into
//!   their base map when full

pub mod error;
mod apply;
pub mod session;
mod skip;
pub mod staging;

pub use error::{Result, StagingError};
pub use session::{TableWriter, WriteSession};
pub use staging::{
    StagingConfig, StagingCursor, StagingMap, DEFAULT_MAX_BYTES, DEFAULT_MAX_ENTRIES,
};
