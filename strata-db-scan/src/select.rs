//! Iterator selection for an index scan.

use crate::error::{Result, ScanError};
use crate::iter::{CoveringIndexIter, IndexLookupIter, RowIter};
use crate::mapping::{covering_mapping, primary_key_mapping, projection_mappings, resolve_projection};
use strata_db_core::{CancelToken, IndexDef, OrderedMap, Range, Row, TableSchema};

/// Either scan strategy behind one [`RowIter`].
pub enum IndexRowIter<'p, P: OrderedMap, I> {
    Covering(CoveringIndexIter<I>),
    Lookup(IndexLookupIter<'p, P, I>),
}

impl<'p, P: OrderedMap, I> IndexRowIter<'p, P, I> {
    pub fn is_covering(&self) -> bool {
        matches!(self, IndexRowIter::Covering(_))
    }
}

impl<'p, P, I> RowIter for IndexRowIter<'p, P, I>
where
    P: OrderedMap,
    I: Iterator<Item = strata_db_core::Result<(strata_db_core::Tuple, strata_db_core::Tuple)>>,
{
    fn next_row(&mut self) -> Result<Option<Row>> {
        match self {
            IndexRowIter::Covering(it) => it.next_row(),
            IndexRowIter::Lookup(it) => it.next_row(),
        }
    }

    fn close(&mut self) {
        match self {
            IndexRowIter::Covering(it) => it.close(),
            IndexRowIter::Lookup(it) => it.close(),
        }
    }
}

/// Scan `range` of `index` and produce rows of `schema` in index order.
///
/// `projection` lists the table columns to return (all columns when
/// `None`). When the index key carries every projected column the rows are
/// decoded from the index alone; otherwise each entry is looked up in
/// `primary`.
pub fn index_row_iter<'p, P, S>(
    primary: &'p P,
    schema: &TableSchema,
    def: &IndexDef,
    index: &S,
    range: &Range,
    projection: Option<&[usize]>,
    cancel: &CancelToken,
) -> Result<IndexRowIter<'p, P, S::Iter>>
where
    P: OrderedMap,
    S: OrderedMap,
{
    let layout = schema.index_layout(def)?;
    if index.key_desc() != &layout.key_desc {
        return Err(ScanError::index_mismatch(format!(
            "index {} does not match table {}",
            def.name, schema.name
        )));
    }
    let projection = resolve_projection(schema, projection)?;
    let entries = index.iter_range(range, cancel)?;

    let covering = covering_mapping(&layout, &projection);
    if covering.is_total() {
        tracing::debug!(index = %def.name, columns = projection.len(), "covering index scan");
        return Ok(IndexRowIter::Covering(CoveringIndexIter::new(
            entries,
            layout.key_desc,
            covering,
        )));
    }

    let pk_mapping = primary_key_mapping(schema, &layout)?;
    let (key_mapping, value_mapping) = projection_mappings(schema, &projection);
    tracing::debug!(index = %def.name, columns = projection.len(), "index lookup scan");
    Ok(IndexRowIter::Lookup(IndexLookupIter::new(
        entries,
        layout.key_desc,
        primary,
        pk_mapping,
        key_mapping,
        value_mapping,
        cancel,
    )))
}
