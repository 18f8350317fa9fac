//! Tuple descriptors: ordering, field access, and construction.

use super::tuple::Tuple;
use super::value::{Encoding, Value};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;

/// Encoding and nullability of one tuple field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldType {
    pub encoding: Encoding,
    pub nullable: bool,
}

impl FieldType {
    pub fn new(encoding: Encoding, nullable: bool) -> Self {
        Self { encoding, nullable }
    }

    pub fn required(encoding: Encoding) -> Self {
        Self::new(encoding, false)
    }

    pub fn nullable(encoding: Encoding) -> Self {
        Self::new(encoding, true)
    }
}

/// Describes the fields of a tuple and defines their total order.
///
/// Comparison walks the descriptor's fields left to right; NULL sorts before
/// every non-NULL value. A descriptor with fewer fields than a tuple compares
/// only the leading fields, which is how prefix comparison works.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleDesc {
    types: Arc<[FieldType]>,
}

impl TupleDesc {
    pub fn new(types: Vec<FieldType>) -> Self {
        Self {
            types: Arc::from(types),
        }
    }

    pub fn count(&self) -> usize {
        self.types.len()
    }

    pub fn types(&self) -> &[FieldType] {
        &self.types
    }

    pub fn field_type(&self, i: usize) -> Option<FieldType> {
        self.types.get(i).copied()
    }

    /// Total order over tuples described by this descriptor.
    pub fn compare(&self, a: &Tuple, b: &Tuple) -> Ordering {
        for (i, ft) in self.types.iter().enumerate() {
            let ord = match (a.field(i), b.field(i)) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(x), Some(y)) => ft.encoding.compare(x, y),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Raw bytes of field `i`; `None` when NULL.
    #[inline]
    pub fn field<'a>(&self, i: usize, tuple: &'a Tuple) -> Option<&'a [u8]> {
        tuple.field(i)
    }

    /// Decoded value of field `i`.
    pub fn value(&self, i: usize, tuple: &Tuple) -> Result<Option<Value>> {
        let ft = self.field_type(i).ok_or_else(|| {
            Error::malformed(format!("field {} out of range for {} fields", i, self.count()))
        })?;
        tuple.field(i).map(|raw| ft.encoding.decode(raw)).transpose()
    }

    /// True if any field covered by this descriptor is NULL in `tuple`.
    pub fn has_nulls(&self, tuple: &Tuple) -> bool {
        (0..self.count()).any(|i| tuple.is_null(i))
    }

    /// A descriptor over the first `n` fields.
    pub fn prefix(&self, n: usize) -> TupleDesc {
        TupleDesc::new(self.types[..n.min(self.count())].to_vec())
    }

    /// This descriptor with a trailing non-null [`Encoding::Hash128`] field.
    pub fn with_hash_field(&self) -> TupleDesc {
        let mut types = self.types.to_vec();
        types.push(FieldType::required(Encoding::Hash128));
        TupleDesc::new(types)
    }

    /// Check field count, nullability and encoding widths.
    pub fn validate(&self, tuple: &Tuple) -> Result<()> {
        if tuple.count() != self.count() {
            return Err(Error::malformed(format!(
                "expected {} fields, tuple has {}",
                self.count(),
                tuple.count()
            )));
        }
        for (i, ft) in self.types.iter().enumerate() {
            match tuple.field(i) {
                None if !ft.nullable => {
                    return Err(Error::NullNotAllowed(format!("field {}", i)));
                }
                None => {}
                Some(raw) => {
                    ft.encoding.decode(raw)?;
                }
            }
        }
        Ok(())
    }

    /// Human-readable rendering, e.g. `(1, 'a', NULL)`.
    pub fn format(&self, tuple: &Tuple) -> String {
        let parts: Vec<String> = (0..self.count())
            .map(|i| match self.value(i, tuple) {
                Ok(Some(v)) => v.to_string(),
                Ok(None) => "NULL".to_string(),
                Err(_) => "<invalid>".to_string(),
            })
            .collect();
        format!("({})", parts.join(", "))
    }

    /// Build a tuple from decoded values in field order.
    pub fn tuple_of(&self, values: &[Option<Value>]) -> Result<Tuple> {
        let mut builder = TupleBuilder::new(self.clone());
        for (i, v) in values.iter().enumerate() {
            match v {
                Some(v) => builder.put(i, v)?,
                None => builder.put_null(i)?,
            }
        }
        builder.build()
    }
}

/// Accumulates field values for a [`TupleDesc`] and produces a [`Tuple`].
///
/// `build` resets the builder so it can be reused for the next row.
#[derive(Debug)]
pub struct TupleBuilder {
    desc: TupleDesc,
    fields: Vec<Option<Vec<u8>>>,
}

impl TupleBuilder {
    pub fn new(desc: TupleDesc) -> Self {
        let fields = vec![None; desc.count()];
        Self { desc, fields }
    }

    pub fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    fn slot(&mut self, i: usize) -> Result<&mut Option<Vec<u8>>> {
        let count = self.fields.len();
        self.fields.get_mut(i).ok_or_else(|| {
            Error::malformed(format!("field {} out of range for {} fields", i, count))
        })
    }

    /// Set field `i` from a decoded value.
    pub fn put(&mut self, i: usize, value: &Value) -> Result<()> {
        let expected = self
            .desc
            .field_type(i)
            .map(|ft| ft.encoding)
            .ok_or_else(|| Error::malformed(format!("field {} out of range", i)))?;
        if value.encoding() != expected {
            return Err(Error::type_mismatch(format!(
                "field {}: expected {:?}, got {:?}",
                i,
                expected,
                value.encoding()
            )));
        }
        if matches!(value, Value::Vector(v) if v.is_empty()) {
            return Err(Error::type_mismatch(format!("field {}: empty vector", i)));
        }
        *self.slot(i)? = Some(value.encode());
        Ok(())
    }

    /// Set field `i` from already-encoded bytes (`None` is NULL).
    pub fn put_raw(&mut self, i: usize, raw: Option<&[u8]>) -> Result<()> {
        *self.slot(i)? = raw.filter(|b| !b.is_empty()).map(<[u8]>::to_vec);
        Ok(())
    }

    pub fn put_null(&mut self, i: usize) -> Result<()> {
        *self.slot(i)? = None;
        Ok(())
    }

    /// Produce the tuple and reset all fields to NULL.
    pub fn build(&mut self) -> Result<Tuple> {
        for (i, ft) in self.desc.types().iter().enumerate() {
            if !ft.nullable && self.fields[i].is_none() {
                return Err(Error::NullNotAllowed(format!("field {}", i)));
            }
        }
        let refs: Vec<Option<&[u8]>> = self.fields.iter().map(|f| f.as_deref()).collect();
        let tuple = Tuple::from_fields(&refs);
        self.fields.iter_mut().for_each(|f| *f = None);
        Ok(tuple)
    }
}
