//! Secondary index build orchestration.
//!
//! # Pipeline
//!
//! 1. Resolve the index definition against the table schema.
//! 2. Iterate every `(primary key, value)` of the primary map and derive its
//!    secondary key.
//! 3. Feed keys into a [`TupleSorter`], spilling sorted runs as the budget
//!    fills.
//! 4. Flush: k-way merge all runs plus the in-memory tail.
//! 5. Unique indexes: run the duplicate check over the merged stream.
//! 6. Bulk-load the result into a new [`PersistedMap`] with empty values.
//!
//! Vector indexes replace steps 3-6 with a [`ProximityMapBuilder`].
//!
//! The primary map is only read. On any failure, including cancellation,
//! run files are removed and no map is returned; nodes already written are
//! unreferenced.

use crate::config::IndexBuildConfig;
use crate::entries::{resolve, KeyEntries};
use crate::error::{IndexerError, Result};
use crate::proximity::{ProximityMap, ProximityMapBuilder};
use crate::secondary::{ColumnKeyBuilder, SecondaryKeyBuilder};
use crate::sort::{DescOrder, SortedTuples, TupleSorter};
use crate::unique::{DuplicateHandler, RejectDuplicates, UniqueCheck};
use std::sync::Arc;
use std::time::Instant;
use strata_db_core::{
    CancelToken, ChunkConfig, DistanceType, IndexDef, NodeStore, OrderedMap, PersistedMap, Range,
    RangeIter, TableSchema, Tuple, TupleDesc,
};

// ============================================================================
// SecondaryIndex
// ============================================================================

/// A built secondary index: an ordered map, or a proximity map for vector
/// indexes. Both are read through [`OrderedMap`].
#[derive(Debug, Clone, PartialEq)]
pub enum SecondaryIndex {
    Ordered(PersistedMap),
    Proximity(ProximityMap),
}

impl SecondaryIndex {
    /// The underlying persisted map.
    pub fn map(&self) -> &PersistedMap {
        match self {
            SecondaryIndex::Ordered(m) => m,
            SecondaryIndex::Proximity(p) => p.map(),
        }
    }

    pub fn into_map(self) -> PersistedMap {
        match self {
            SecondaryIndex::Ordered(m) => m,
            SecondaryIndex::Proximity(p) => p.into_map(),
        }
    }

    pub fn as_proximity(&self) -> Option<&ProximityMap> {
        match self {
            SecondaryIndex::Proximity(p) => Some(p),
            SecondaryIndex::Ordered(_) => None,
        }
    }

    pub fn id(&self) -> strata_db_core::ContentId {
        self.map().id()
    }
}

impl OrderedMap for SecondaryIndex {
    type Iter = RangeIter;

    fn key_desc(&self) -> &TupleDesc {
        self.map().key_desc()
    }

    fn value_desc(&self) -> &TupleDesc {
        self.map().value_desc()
    }

    fn get(&self, key: &Tuple, cancel: &CancelToken) -> strata_db_core::Result<Option<Tuple>> {
        self.map().get(key, cancel)
    }

    fn iter_range(&self, range: &Range, cancel: &CancelToken) -> strata_db_core::Result<RangeIter> {
        self.map().iter_range(range, cancel)
    }

    fn count(&self) -> u64 {
        self.map().count()
    }
}

// ============================================================================
// build_secondary_index: main entry point
// ============================================================================

/// Build the index `def` over the table `schema` stored in `primary`.
///
/// For unique indexes `dup` decides each duplicate pair; without a handler
/// the first duplicate aborts the build. `dup` is ignored for non-unique
/// indexes.
pub fn build_secondary_index(
    primary: &PersistedMap,
    schema: &TableSchema,
    def: &IndexDef,
    dup: Option<&mut dyn DuplicateHandler>,
    config: &IndexBuildConfig,
    cancel: &CancelToken,
) -> Result<SecondaryIndex> {
    let start = Instant::now();
    let _span = tracing::info_span!("build_secondary_index", index = %def.name).entered();

    // ---- Step 1: Resolve the index against the table ----
    config.validate()?;
    if primary.descriptors() != (&schema.key_desc(), &schema.value_desc()) {
        return Err(IndexerError::invalid_config(format!(
            "primary map of table {} does not match its schema",
            schema.name
        )));
    }
    let mut keys = ColumnKeyBuilder::new(schema, def)?;
    let store = Arc::clone(primary.store());

    let index = match def.vector {
        Some(props) => SecondaryIndex::Proximity(build_proximity_index(
            primary,
            store,
            &mut keys,
            props.distance,
            config,
            cancel,
        )?),
        None => SecondaryIndex::Ordered(build_ordered_index(
            primary, store, &mut keys, &def.name, def.unique, dup, config, cancel,
        )?),
    };

    tracing::info!(
        index = %def.name,
        rows = primary.count(),
        entries = index.count(),
        root = %index.id(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "secondary index built"
    );
    Ok(index)
}

/// Sort-and-load build over any ordered source map and key builder.
#[allow(clippy::too_many_arguments)]
pub fn build_ordered_index<M, K>(
    primary: &M,
    store: Arc<dyn NodeStore>,
    keys: &mut K,
    name: &str,
    unique: bool,
    dup: Option<&mut dyn DuplicateHandler>,
    config: &IndexBuildConfig,
    cancel: &CancelToken,
) -> Result<PersistedMap>
where
    M: OrderedMap,
    K: SecondaryKeyBuilder,
{
    // ---- Step 2-3: Derive keys and feed the sorter ----
    let sorted = sort_keys(primary, keys, config, cancel)?;

    // ---- Step 4-6: Merge, check, load ----
    let key_desc = keys.key_desc().clone();
    let prefix_len = keys.prefix_len();
    let chunk = &config.chunk;
    match (unique, dup) {
        (false, _) => load_sorted::<RejectDuplicates>(
            sorted, store, key_desc, prefix_len, name, None, chunk, cancel,
        ),
        (true, Some(handler)) => load_sorted(
            sorted, store, key_desc, prefix_len, name, Some(handler), chunk, cancel,
        ),
        (true, None) => load_sorted(
            sorted,
            store,
            key_desc,
            prefix_len,
            name,
            Some(&mut RejectDuplicates),
            chunk,
            cancel,
        ),
    }
}

pub(crate) fn sort_keys<M, K>(
    primary: &M,
    keys: &mut K,
    config: &IndexBuildConfig,
    cancel: &CancelToken,
) -> Result<SortedTuples>
where
    M: OrderedMap,
    K: SecondaryKeyBuilder,
{
    let mut sorter = TupleSorter::new(DescOrder(keys.key_desc().clone()), config)?;
    for entry in primary.iter_range(&Range::all(), cancel)? {
        let (key, value) = entry?;
        sorter.insert(keys.build_key(&key, &value)?, cancel)?;
    }
    tracing::debug!(
        records = sorter.len(),
        runs = sorter.spilled_runs(),
        "index keys sorted"
    );
    sorter.flush(cancel)
}

#[allow(clippy::too_many_arguments)]
fn load_sorted<H: DuplicateHandler + ?Sized>(
    sorted: SortedTuples,
    store: Arc<dyn NodeStore>,
    key_desc: TupleDesc,
    prefix_len: usize,
    name: &str,
    handler: Option<&mut H>,
    chunk: &ChunkConfig,
    cancel: &CancelToken,
) -> Result<PersistedMap> {
    let empty = TupleDesc::new(Vec::new());
    let mut slot = None;
    let built = match handler {
        Some(handler) => {
            let checked = UniqueCheck::new(sorted, name, key_desc.clone(), prefix_len, handler);
            PersistedMap::build_from(
                store,
                key_desc,
                empty,
                KeyEntries::new(checked, &mut slot),
                chunk,
                cancel,
            )
        }
        None => PersistedMap::build_from(
            store,
            key_desc,
            empty,
            KeyEntries::new(sorted, &mut slot),
            chunk,
            cancel,
        ),
    };
    built.map_err(|e| resolve(e, &mut slot))
}

fn build_proximity_index<M, K>(
    primary: &M,
    store: Arc<dyn NodeStore>,
    keys: &mut K,
    distance: DistanceType,
    config: &IndexBuildConfig,
    cancel: &CancelToken,
) -> Result<ProximityMap>
where
    M: OrderedMap,
    K: SecondaryKeyBuilder,
{
    let prefix = keys.prefix_desc();
    let mut builder = ProximityMapBuilder::new(store, keys.key_desc().clone(), distance, config)?;
    let empty = Tuple::empty();
    let mut skipped: u64 = 0;
    for entry in primary.iter_range(&Range::all(), cancel)? {
        let (key, value) = entry?;
        let index_key = keys.build_key(&key, &value)?;
        if prefix.has_nulls(&index_key) {
            skipped += 1;
            continue;
        }
        builder.insert(index_key, &empty, cancel)?;
    }
    tracing::debug!(records = builder.len(), skipped, "vector keys collected");
    builder.finish(cancel)
}
