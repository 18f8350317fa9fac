//! # Strata DB Scan
//!
//! Row iterators over secondary index ranges:
//!
//! - [`CoveringIndexIter`]: rows decoded from index keys alone
//! - [`IndexLookupIter`]: rows re-fetched from the primary map
//! - [`index_row_iter`]: picks one of the two for a projection

pub mod error;
pub mod iter;
pub mod mapping;
pub mod select;

pub use error::{Result, ScanError};
pub use iter::{CoveringIndexIter, IndexLookupIter, RowIter};
pub use mapping::{covering_mapping, primary_key_mapping, projection_mappings, resolve_projection};
pub use select::{index_row_iter, IndexRowIter};
