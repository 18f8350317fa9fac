//! # Strata DB Core
//!
//! Storage primitives shared by every Strata DB crate:
//!
//! - Tuple encoding and ordering (`val`)
//! - Content-addressed node storage (`storage`, `content_id`)
//! - Immutable ordered maps with range iteration (`map`)
//! - Table/index schema and column mappings
//! - Cooperative cancellation
//!
//! ## Design Principles
//!
//! 1. **Immutable versions**: a map never changes; edits produce a new root
//! 2. **Content identity**: equal contents always hash to the same root id
//! 3. **Explicit cancellation**: every call that may touch storage takes a [`CancelToken`]

pub mod cancel;
pub mod content_id;
pub mod error;
pub mod map;
pub mod mapping;
pub mod range;
pub mod schema;
pub mod storage;
pub mod val;

pub use cancel::CancelToken;
pub use content_id::ContentId;
pub use error::{Error, Result};
pub use map::{build_map, ChunkConfig, Edit, MapBuilder, OrderedMap, PersistedMap, RangeIter};
pub use mapping::{ColumnMapping, NO_SOURCE};
pub use range::Range;
pub use schema::{
    row_hash, Column, DistanceType, FieldLoc, IndexDef, IndexLayout, KeyField, TableSchema,
    VectorProperties,
};
pub use storage::{FileNodeStore, MemoryNodeStore, NodeStore};
pub use val::{Encoding, FieldType, Row, Tuple, TupleBuilder, TupleDesc, Value};
