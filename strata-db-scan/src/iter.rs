//! Row iterators over a secondary index range.
//!
//! [`IndexLookupIter`] re-fetches each row from the primary map through the
//! primary key carried by the index entry. [`CoveringIndexIter`] decodes the
//! projected columns straight from the index key. Both are forward-only and
//! release their cursor on exhaustion or [`RowIter::close`].

use crate::error::Result;
use strata_db_core::{
    CancelToken, ColumnMapping, Error, OrderedMap, Row, Tuple, TupleBuilder, TupleDesc,
};

pub trait RowIter {
    /// Next row, or `Ok(None)` at the end.
    fn next_row(&mut self) -> Result<Option<Row>>;

    /// Release the underlying cursor. Idempotent; later calls to
    /// `next_row` return `Ok(None)`.
    fn close(&mut self);
}

// ============================================================================
// Non-covering
// ============================================================================

pub struct IndexLookupIter<'p, P, I> {
    entries: Option<I>,
    primary: &'p P,
    index_desc: TupleDesc,
    pk_builder: TupleBuilder,
    pk_mapping: ColumnMapping,
    key_mapping: ColumnMapping,
    value_mapping: ColumnMapping,
    width: usize,
    cancel: CancelToken,
}

impl<'p, P, I> IndexLookupIter<'p, P, I>
where
    P: OrderedMap,
    I: Iterator<Item = strata_db_core::Result<(Tuple, Tuple)>>,
{
    /// `pk_mapping` fills the primary key from index key positions;
    /// `key_mapping` and `value_mapping` fill output slots from the primary
    /// key and value. All three use `-1` for "no source".
    pub fn new(
        entries: I,
        index_desc: TupleDesc,
        primary: &'p P,
        pk_mapping: ColumnMapping,
        key_mapping: ColumnMapping,
        value_mapping: ColumnMapping,
        cancel: &CancelToken,
    ) -> Self {
        let pk_builder = TupleBuilder::new(primary.key_desc().clone());
        let width = key_mapping.len().max(value_mapping.len());
        Self {
            entries: Some(entries),
            primary,
            index_desc,
            pk_builder,
            pk_mapping,
            key_mapping,
            value_mapping,
            width,
            cancel: cancel.clone(),
        }
    }

    fn lookup(&mut self, index_key: &Tuple) -> Result<Row> {
        for (dest, src) in self.pk_mapping.mapped() {
            self.pk_builder.put_raw(dest, index_key.field(src))?;
        }
        let pk = self.pk_builder.build()?;
        let value = self.primary.get(&pk, &self.cancel)?.ok_or_else(|| {
            Error::not_found(format!(
                "index entry {} has no primary row",
                self.index_desc.format(index_key)
            ))
        })?;

        let (kd, vd) = self.primary.descriptors();
        let mut row: Row = vec![None; self.width];
        for (dest, src) in self.key_mapping.mapped() {
            row[dest] = kd.value(src, &pk)?;
        }
        for (dest, src) in self.value_mapping.mapped() {
            row[dest] = vd.value(src, &value)?;
        }
        Ok(row)
    }
}

impl<'p, P, I> RowIter for IndexLookupIter<'p, P, I>
where
    P: OrderedMap,
    I: Iterator<Item = strata_db_core::Result<(Tuple, Tuple)>>,
{
    fn next_row(&mut self) -> Result<Option<Row>> {
        let Some(entries) = self.entries.as_mut() else {
            return Ok(None);
        };
        match entries.next() {
            Some(entry) => {
                let (index_key, _) = entry?;
                self.lookup(&index_key).map(Some)
            }
            None => {
                self.close();
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.entries = None;
    }
}

// ============================================================================
// Covering
// ============================================================================

pub struct CoveringIndexIter<I> {
    entries: Option<I>,
    index_desc: TupleDesc,
    mapping: ColumnMapping,
}

impl<I> CoveringIndexIter<I>
where
    I: Iterator<Item = strata_db_core::Result<(Tuple, Tuple)>>,
{
    /// `mapping` fills output slots from index key positions.
    pub fn new(entries: I, index_desc: TupleDesc, mapping: ColumnMapping) -> Self {
        Self {
            entries: Some(entries),
            index_desc,
            mapping,
        }
    }
}

impl<I> RowIter for CoveringIndexIter<I>
where
    I: Iterator<Item = strata_db_core::Result<(Tuple, Tuple)>>,
{
    fn next_row(&mut self) -> Result<Option<Row>> {
        let Some(entries) = self.entries.as_mut() else {
            return Ok(None);
        };
        let Some(entry) = entries.next() else {
            self.close();
            return Ok(None);
        };
        let (key, _) = entry?;
        let mut row: Row = vec![None; self.mapping.len()];
        for (dest, src) in self.mapping.mapped() {
            row[dest] = self.index_desc.value(src, &key)?;
        }
        Ok(Some(row))
    }

    fn close(&mut self) {
        self.entries = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use strata_db_core::{
        ChunkConfig, Encoding, FieldType, MemoryNodeStore, PersistedMap, Range, Value,
    };

    fn int_desc(n: usize) -> TupleDesc {
        TupleDesc::new(vec![FieldType::required(Encoding::Int64); n])
    }

    fn ints(vals: &[i64]) -> Tuple {
        let values: Vec<_> = vals.iter().map(|&v| Some(Value::Int(v))).collect();
        int_desc(vals.len()).tuple_of(&values).unwrap()
    }

    fn map(kd: TupleDesc, vd: TupleDesc, entries: Vec<(Tuple, Tuple)>) -> PersistedMap {
        PersistedMap::build_from(
            Arc::new(MemoryNodeStore::new()),
            kd,
            vd,
            entries.into_iter().map(Ok),
            &ChunkConfig::small(),
            &CancelToken::new(),
        )
        .unwrap()
    }

    #[test]
    fn test_covering_skips_unmapped_slots() {
        let cancel = CancelToken::new();
        let index = map(
            int_desc(2),
            TupleDesc::new(Vec::new()),
            vec![(ints(&[5, 1]), Tuple::empty()), (ints(&[6, 2]), Tuple::empty())],
        );
        let entries = index.iter_range(&Range::all(), &cancel).unwrap();
        let mapping = ColumnMapping::from_sentinel(&[1, -1, 0]).unwrap();
        let mut it = CoveringIndexIter::new(entries, int_desc(2), mapping);
        assert_eq!(
            it.next_row().unwrap(),
            Some(vec![Some(Value::Int(1)), None, Some(Value::Int(5))])
        );
        it.close();
        it.close();
        assert_eq!(it.next_row().unwrap(), None);
    }

    #[test]
    fn test_lookup_reads_primary() {
        let cancel = CancelToken::new();
        // primary: id -> (v)
        let primary = map(
            int_desc(1),
            int_desc(1),
            vec![(ints(&[1]), ints(&[10])), (ints(&[2]), ints(&[20]))],
        );
        // index on v: (v, id)
        let index = map(
            int_desc(2),
            TupleDesc::new(Vec::new()),
            vec![(ints(&[10, 1]), Tuple::empty()), (ints(&[20, 2]), Tuple::empty())],
        );
        let entries = index.iter_range(&Range::all().reversed(), &cancel).unwrap();
        let mut it = IndexLookupIter::new(
            entries,
            int_desc(2),
            &primary,
            ColumnMapping::from_sentinel(&[1]).unwrap(),
            ColumnMapping::from_sentinel(&[0, -1]).unwrap(),
            ColumnMapping::from_sentinel(&[-1, 0]).unwrap(),
            &cancel,
        );
        let mut rows = Vec::new();
        while let Some(row) = it.next_row().unwrap() {
            rows.push(row);
        }
        assert_eq!(
            rows,
            vec![
                vec![Some(Value::Int(2)), Some(Value::Int(20))],
                vec![Some(Value::Int(1)), Some(Value::Int(10))],
            ]
        );
        assert_eq!(it.next_row().unwrap(), None);
    }

    #[test]
    fn test_dangling_entry_is_not_found() {
        let cancel = CancelToken::new();
        let primary = map(int_desc(1), int_desc(1), vec![(ints(&[1]), ints(&[10]))]);
        let index = map(
            int_desc(2),
            TupleDesc::new(Vec::new()),
            vec![(ints(&[10, 1]), Tuple::empty()), (ints(&[30, 3]), Tuple::empty())],
        );
        let entries = index.iter_range(&Range::all(), &cancel).unwrap();
        let mut it = IndexLookupIter::new(
            entries,
            int_desc(2),
            &primary,
            ColumnMapping::from_sentinel(&[1]).unwrap(),
            ColumnMapping::identity(1),
            ColumnMapping::from_sentinel(&[-1]).unwrap(),
            &cancel,
        );
        assert!(it.next_row().unwrap().is_some());
        assert!(it.next_row().unwrap_err().is_not_found());
    }
}
