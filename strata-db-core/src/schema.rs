//! Table and index definitions.
//!
//! A table row is split into a primary key tuple and a value tuple. Tables
//! with no primary key columns ("keyless") store every column in the value
//! and key the row by a 16-byte hash of the value tuple; identical rows of a
//! keyless table therefore collapse into one entry.
//!
//! A secondary index key is laid out as:
//!
//! ```text
//! [indexed columns...][primary key fields not already indexed...]
//! ```
//!
//! where the primary key fields of a keyless table are the single row hash.
//! Index values are always the empty tuple.

use crate::error::{Error, Result};
use crate::val::{Encoding, FieldType, Row, Tuple, TupleBuilder, TupleDesc, Value};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use sha2::Digest;

// ============================================================================
// Columns and tables
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub encoding: Encoding,
    #[serde(default)]
    pub nullable: bool,
    #[serde(default)]
    pub primary_key: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, encoding: Encoding) -> Self {
        Self {
            name: name.into(),
            encoding,
            nullable: true,
            primary_key: false,
        }
    }

    /// A non-null primary key column.
    pub fn key(name: impl Into<String>, encoding: Encoding) -> Self {
        Self {
            name: name.into(),
            encoding,
            nullable: false,
            primary_key: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Where a field lives in a stored primary row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldLoc {
    Key(usize),
    Value(usize),
}

/// One component of a primary or secondary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyField {
    /// Table column by declaration position.
    Column(usize),
    /// Synthetic row hash of a keyless table.
    RowHash,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> Result<Self> {
        let schema = Self {
            name: name.into(),
            columns,
        };
        schema.validate()?;
        Ok(schema)
    }

    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(Error::invalid_schema(format!("table {} has no columns", self.name)));
        }
        let mut seen = FxHashSet::default();
        for c in &self.columns {
            if !seen.insert(c.name.as_str()) {
                return Err(Error::invalid_schema(format!(
                    "table {}: duplicate column {}",
                    self.name, c.name
                )));
            }
            if c.primary_key && c.nullable {
                return Err(Error::invalid_schema(format!(
                    "table {}: primary key column {} is nullable",
                    self.name, c.name
                )));
            }
        }
        Ok(())
    }

    pub fn is_keyless(&self) -> bool {
        !self.columns.iter().any(|c| c.primary_key)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    fn column_type(&self, col: usize) -> FieldType {
        let c = &self.columns[col];
        FieldType::new(c.encoding, c.nullable)
    }

    /// Fields of the primary key, in key order.
    pub fn primary_key_fields(&self) -> Vec<KeyField> {
        if self.is_keyless() {
            return vec![KeyField::RowHash];
        }
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| KeyField::Column(i))
            .collect()
    }

    /// Columns stored in the value tuple, in value order.
    pub fn value_columns(&self) -> Vec<usize> {
        let keyless = self.is_keyless();
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| keyless || !c.primary_key)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn key_desc(&self) -> TupleDesc {
        TupleDesc::new(
            self.primary_key_fields()
                .into_iter()
                .map(|f| self.key_field_type(f))
                .collect(),
        )
    }

    pub fn value_desc(&self) -> TupleDesc {
        TupleDesc::new(
            self.value_columns()
                .into_iter()
                .map(|c| self.column_type(c))
                .collect(),
        )
    }

    fn key_field_type(&self, field: KeyField) -> FieldType {
        match field {
            KeyField::Column(c) => self.column_type(c),
            KeyField::RowHash => FieldType::required(Encoding::Hash128),
        }
    }

    /// Location of a key field inside a stored `(key, value)` pair.
    pub fn locate(&self, field: KeyField) -> FieldLoc {
        match field {
            KeyField::RowHash => FieldLoc::Key(0),
            KeyField::Column(col) => self.column_location(col),
        }
    }

    /// Location of column `col` inside a stored `(key, value)` pair.
    pub fn column_location(&self, col: usize) -> FieldLoc {
        if let Some(p) = self
            .primary_key_fields()
            .iter()
            .position(|f| *f == KeyField::Column(col))
        {
            return FieldLoc::Key(p);
        }
        let p = self.value_columns().iter().position(|&c| c == col).unwrap_or(0);
        FieldLoc::Value(p)
    }

    /// Encode a full row into its stored `(key, value)` pair.
    pub fn encode_row(&self, row: &[Option<Value>]) -> Result<(Tuple, Tuple)> {
        if row.len() != self.columns.len() {
            return Err(Error::malformed(format!(
                "table {} has {} columns, row has {}",
                self.name,
                self.columns.len(),
                row.len()
            )));
        }
        let mut vb = TupleBuilder::new(self.value_desc());
        for (i, col) in self.value_columns().into_iter().enumerate() {
            match &row[col] {
                Some(v) => vb.put(i, v)?,
                None => vb.put_null(i)?,
            }
        }
        let value = vb.build().map_err(|e| column_error(self, e))?;

        let mut kb = TupleBuilder::new(self.key_desc());
        for (i, f) in self.primary_key_fields().into_iter().enumerate() {
            match f {
                KeyField::RowHash => kb.put(i, &Value::Hash(row_hash(&value)))?,
                KeyField::Column(c) => match &row[c] {
                    Some(v) => kb.put(i, v)?,
                    None => kb.put_null(i)?,
                },
            }
        }
        let key = kb.build().map_err(|e| column_error(self, e))?;
        Ok((key, value))
    }

    /// Decode a stored `(key, value)` pair into a full row.
    pub fn decode_row(&self, key: &Tuple, value: &Tuple) -> Result<Row> {
        let kd = self.key_desc();
        let vd = self.value_desc();
        (0..self.columns.len())
            .map(|col| match self.column_location(col) {
                FieldLoc::Key(p) => kd.value(p, key),
                FieldLoc::Value(p) => vd.value(p, value),
            })
            .collect()
    }

    /// Resolve an index definition against this table.
    pub fn index_layout(&self, def: &IndexDef) -> Result<IndexLayout> {
        def.validate()?;
        let mut fields = Vec::with_capacity(def.columns.len() + 1);
        for name in &def.columns {
            let col = self.column_index(name).ok_or_else(|| {
                Error::invalid_schema(format!(
                    "index {}: unknown column {} in table {}",
                    def.name, name, self.name
                ))
            })?;
            if fields.contains(&KeyField::Column(col)) {
                return Err(Error::invalid_schema(format!(
                    "index {}: column {} listed twice",
                    def.name, name
                )));
            }
            fields.push(KeyField::Column(col));
        }
        if def.vector.is_some() {
            let KeyField::Column(col) = fields[0] else {
                return Err(Error::invalid_schema(format!("index {}: no vector column", def.name)));
            };
            if fields.len() != 1 || self.columns[col].encoding != Encoding::Vector {
                return Err(Error::invalid_schema(format!(
                    "index {}: a vector index takes exactly one vector column",
                    def.name
                )));
            }
        }
        let prefix_len = fields.len();
        for f in self.primary_key_fields() {
            if !fields.contains(&f) {
                fields.push(f);
            }
        }
        let key_desc = TupleDesc::new(fields.iter().map(|&f| self.key_field_type(f)).collect());
        Ok(IndexLayout {
            fields,
            prefix_len,
            key_desc,
        })
    }
}

fn column_error(schema: &TableSchema, e: Error) -> Error {
    match e {
        Error::NullNotAllowed(m) => Error::NullNotAllowed(format!("table {}: {}", schema.name, m)),
        other => other,
    }
}

/// Synthetic key of a keyless row: the first 16 bytes of SHA-256 over the
/// encoded value tuple.
pub fn row_hash(value: &Tuple) -> [u8; 16] {
    let digest = sha2::Sha256::digest(value.as_bytes());
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

// ============================================================================
// Index definitions
// ============================================================================

/// Distance function of a vector index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceType {
    L2Squared,
    Cosine,
    InnerProduct,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorProperties {
    pub distance: DistanceType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector: Option<VectorProperties>,
}

impl IndexDef {
    pub fn new<S: Into<String>>(name: impl Into<String>, columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            unique: false,
            vector: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_vector(mut self, distance: DistanceType) -> Self {
        self.vector = Some(VectorProperties { distance });
        self
    }

    pub fn is_vector(&self) -> bool {
        self.vector.is_some()
    }

    pub fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(Error::invalid_schema(format!("index {} has no columns", self.name)));
        }
        if self.unique && self.vector.is_some() {
            return Err(Error::invalid_schema(format!(
                "index {}: vector indexes cannot be unique",
                self.name
            )));
        }
        Ok(())
    }
}

/// An index definition resolved against a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLayout {
    /// Key fields in index key order.
    pub fields: Vec<KeyField>,
    /// Number of leading fields that are the declared index columns.
    pub prefix_len: usize,
    pub key_desc: TupleDesc,
}

impl IndexLayout {
    /// Descriptor over the declared index columns only.
    pub fn prefix_desc(&self) -> TupleDesc {
        self.key_desc.prefix(self.prefix_len)
    }

    /// Position of `field` in the index key.
    pub fn position(&self, field: KeyField) -> Option<usize> {
        self.fields.iter().position(|&f| f == field)
    }

    /// True if the index key carries column `col`.
    pub fn carries(&self, col: usize) -> bool {
        self.position(KeyField::Column(col)).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> TableSchema {
        TableSchema::new(
            "people",
            vec![
                Column::key("id", Encoding::Int64),
                Column::new("name", Encoding::String),
                Column::new("age", Encoding::Int64),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_row_round_trip() {
        let s = people();
        let row = vec![Some(Value::Int(7)), Some(Value::from("ann")), None];
        let (k, v) = s.encode_row(&row).unwrap();
        assert_eq!(k.count(), 1);
        assert_eq!(v.count(), 2);
        assert_eq!(s.decode_row(&k, &v).unwrap(), row);
    }

    #[test]
    fn test_null_primary_key_rejected() {
        let s = people();
        let row = vec![None, Some(Value::from("ann")), None];
        assert!(matches!(s.encode_row(&row), Err(Error::NullNotAllowed(_))));
    }

    #[test]
    fn test_keyless_table_hashes_value() {
        let s = TableSchema::new(
            "log",
            vec![Column::new("a", Encoding::Int64), Column::new("b", Encoding::String)],
        )
        .unwrap();
        assert!(s.is_keyless());
        let row = vec![Some(Value::Int(1)), Some(Value::from("x"))];
        let (k, v) = s.encode_row(&row).unwrap();
        assert_eq!(
            s.key_desc().value(0, &k).unwrap(),
            Some(Value::Hash(row_hash(&v)))
        );
        assert_eq!(s.decode_row(&k, &v).unwrap(), row);
    }

    #[test]
    fn test_index_layout_appends_primary_key() {
        let s = people();
        let layout = s.index_layout(&IndexDef::new("by_age", ["age"])).unwrap();
        assert_eq!(layout.fields, vec![KeyField::Column(2), KeyField::Column(0)]);
        assert_eq!(layout.prefix_len, 1);
        assert_eq!(layout.position(KeyField::Column(0)), Some(1));

        // pk already indexed: not repeated
        let layout = s.index_layout(&IndexDef::new("by_id_age", ["age", "id"])).unwrap();
        assert_eq!(layout.fields, vec![KeyField::Column(2), KeyField::Column(0)]);
        assert_eq!(layout.prefix_len, 2);
    }

    #[test]
    fn test_index_layout_keyless() {
        let s = TableSchema::new("log", vec![Column::new("a", Encoding::Int64)]).unwrap();
        let layout = s.index_layout(&IndexDef::new("by_a", ["a"])).unwrap();
        assert_eq!(layout.fields, vec![KeyField::Column(0), KeyField::RowHash]);
        assert_eq!(layout.key_desc.count(), 2);
    }

    #[test]
    fn test_index_layout_errors() {
        let s = people();
        assert!(s.index_layout(&IndexDef::new("x", ["nope"])).is_err());
        assert!(s.index_layout(&IndexDef::new("x", ["age", "age"])).is_err());
        assert!(s
            .index_layout(&IndexDef::new("x", ["age"]).with_vector(DistanceType::Cosine))
            .is_err());
        assert!(s.index_layout(&IndexDef::new("x", Vec::<String>::new())).is_err());
    }

    #[test]
    fn test_schema_serde() {
        let s = people();
        let json = serde_json::to_string(&s).unwrap();
        let back: TableSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);

        let def = IndexDef::new("emb", ["v"]).with_vector(DistanceType::L2Squared);
        let json = serde_json::to_string(&def).unwrap();
        assert!(json.contains("l2_squared"));
        let back: IndexDef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, def);
    }
}
