//! Column mappings for index scans.
//!
//! Output rows are laid out in projection order: slot `i` holds table
//! column `projection[i]`. Unmapped slots stay NULL.

use crate::error::{Result, ScanError};
use strata_db_core::{ColumnMapping, FieldLoc, IndexLayout, KeyField, TableSchema};

/// Check a projection against the table and return it as column indexes.
/// `None` projects every column in declaration order.
pub fn resolve_projection(schema: &TableSchema, projection: Option<&[usize]>) -> Result<Vec<usize>> {
    match projection {
        None => Ok((0..schema.columns.len()).collect()),
        Some(cols) => {
            if let Some(&bad) = cols.iter().find(|&&c| c >= schema.columns.len()) {
                return Err(ScanError::invalid_projection(format!(
                    "table {} has no column {}",
                    schema.name, bad
                )));
            }
            Ok(cols.to_vec())
        }
    }
}

/// Primary key slot `j` <- index key position holding primary key field `j`.
pub fn primary_key_mapping(schema: &TableSchema, layout: &IndexLayout) -> Result<ColumnMapping> {
    schema
        .primary_key_fields()
        .into_iter()
        .map(|f| {
            layout.position(f).map(Some).ok_or_else(|| {
                ScanError::index_mismatch(format!(
                    "index key of table {} does not carry {:?}",
                    schema.name, f
                ))
            })
        })
        .collect::<Result<Vec<_>>>()
        .map(ColumnMapping::new)
}

/// Mappings from a stored primary `(key, value)` pair into output slots.
///
/// The first mapping reads the primary key tuple, the second the value tuple.
/// Each output slot is mapped by exactly one of them; the other holds
/// `-1` for it.
pub fn projection_mappings(schema: &TableSchema, projection: &[usize]) -> (ColumnMapping, ColumnMapping) {
    let mut key = Vec::with_capacity(projection.len());
    let mut value = Vec::with_capacity(projection.len());
    for &col in projection {
        match schema.column_location(col) {
            FieldLoc::Key(p) => {
                key.push(Some(p));
                value.push(None);
            }
            FieldLoc::Value(p) => {
                key.push(None);
                value.push(Some(p));
            }
        }
    }
    (ColumnMapping::new(key), ColumnMapping::new(value))
}

/// Output slot `i` <- index key position of column `projection[i]`.
///
/// Slots for columns the index does not carry are `-1`; the mapping is
/// covering when [`ColumnMapping::is_total`] holds.
pub fn covering_mapping(layout: &IndexLayout, projection: &[usize]) -> ColumnMapping {
    ColumnMapping::new(
        projection
            .iter()
            .map(|&col| layout.position(KeyField::Column(col)))
            .collect(),
    )
}
