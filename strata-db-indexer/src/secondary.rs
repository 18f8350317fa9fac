//! Secondary key derivation.
//!
//! A [`SecondaryKeyBuilder`] turns one stored primary row into the key of its
//! secondary index entry. It must be a pure function of the row: rebuilding
//! an index from the same primary map yields the same keys.

use crate::error::Result;
use strata_db_core::{FieldLoc, IndexDef, IndexLayout, TableSchema, Tuple, TupleBuilder, TupleDesc};

pub trait SecondaryKeyBuilder {
    /// Descriptor of the keys this builder produces.
    fn key_desc(&self) -> &TupleDesc;

    /// Leading key fields that carry the indexed columns. Uniqueness is
    /// checked over this prefix.
    fn prefix_len(&self) -> usize;

    /// Derive the index key of the primary row `(key, value)`.
    fn build_key(&mut self, key: &Tuple, value: &Tuple) -> Result<Tuple>;

    /// Descriptor of the indexed-column prefix.
    fn prefix_desc(&self) -> TupleDesc {
        self.key_desc().prefix(self.prefix_len())
    }
}

/// Key builder that copies encoded fields out of the primary row according
/// to an [`IndexLayout`]. For keyless tables the row hash is copied from the
/// primary key.
#[derive(Debug)]
pub struct ColumnKeyBuilder {
    layout: IndexLayout,
    sources: Vec<FieldLoc>,
    builder: TupleBuilder,
}

impl ColumnKeyBuilder {
    pub fn new(schema: &TableSchema, def: &IndexDef) -> Result<Self> {
        let layout = schema.index_layout(def)?;
        let sources = layout.fields.iter().map(|&f| schema.locate(f)).collect();
        let builder = TupleBuilder::new(layout.key_desc.clone());
        Ok(Self {
            layout,
            sources,
            builder,
        })
    }

    pub fn layout(&self) -> &IndexLayout {
        &self.layout
    }
}

impl SecondaryKeyBuilder for ColumnKeyBuilder {
    fn key_desc(&self) -> &TupleDesc {
        &self.layout.key_desc
    }

    fn prefix_len(&self) -> usize {
        self.layout.prefix_len
    }

    fn build_key(&mut self, key: &Tuple, value: &Tuple) -> Result<Tuple> {
        for (i, loc) in self.sources.iter().enumerate() {
            let raw = match *loc {
                FieldLoc::Key(p) => key.field(p),
                FieldLoc::Value(p) => value.field(p),
            };
            self.builder.put_raw(i, raw)?;
        }
        Ok(self.builder.build()?)
    }
}
