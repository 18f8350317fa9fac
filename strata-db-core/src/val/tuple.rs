//! Immutable byte tuples.
//!
//! ```text
//! [count: u16 LE]
//! [end offsets: count × u32 LE]   (relative to the start of field data)
//! [field data]
//! ```
//!
//! A zero-length field is NULL. Fields past `count` also read as NULL, so a
//! shorter tuple compares like one padded with trailing NULLs.

use crate::error::{Error, Result};
use std::fmt;
use std::sync::Arc;

const COUNT_LEN: usize = 2;
const OFFSET_LEN: usize = 4;

/// An immutable, cheaply clonable tuple of encoded fields.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Tuple(Arc<[u8]>);

impl Tuple {
    /// The zero-field tuple. Used as the value of every secondary index entry.
    pub fn empty() -> Self {
        Tuple(Arc::from(&[0u8, 0u8][..]))
    }

    /// Assemble a tuple from raw field bytes. `None` (or an empty slice) is NULL.
    pub fn from_fields(fields: &[Option<&[u8]>]) -> Self {
        let data_len: usize = fields.iter().map(|f| f.map_or(0, |b| b.len())).sum();
        let mut buf = Vec::with_capacity(COUNT_LEN + fields.len() * OFFSET_LEN + data_len);
        buf.extend_from_slice(&(fields.len() as u16).to_le_bytes());
        let mut end = 0u32;
        for f in fields {
            end += f.map_or(0, |b| b.len()) as u32;
            buf.extend_from_slice(&end.to_le_bytes());
        }
        for f in fields.iter().flatten() {
            buf.extend_from_slice(f);
        }
        Tuple(Arc::from(buf))
    }

    /// Wrap previously serialized tuple bytes, validating the header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < COUNT_LEN {
            return Err(Error::malformed(format!(
                "tuple too short: {} bytes",
                bytes.len()
            )));
        }
        let count = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        let data_start = COUNT_LEN + count * OFFSET_LEN;
        if bytes.len() < data_start {
            return Err(Error::malformed(format!(
                "tuple header truncated: {} fields, {} bytes",
                count,
                bytes.len()
            )));
        }
        let mut prev = 0usize;
        for i in 0..count {
            let end = read_offset(bytes, i);
            if end < prev {
                return Err(Error::malformed(format!(
                    "tuple offsets decrease at field {}",
                    i
                )));
            }
            prev = end;
        }
        if data_start + prev != bytes.len() {
            return Err(Error::malformed(format!(
                "tuple length mismatch: expected {}, got {}",
                data_start + prev,
                bytes.len()
            )));
        }
        Ok(Tuple(Arc::from(bytes)))
    }

    /// Number of encoded fields.
    #[inline]
    pub fn count(&self) -> usize {
        u16::from_le_bytes([self.0[0], self.0[1]]) as usize
    }

    /// Raw bytes of field `i`, or `None` if it is NULL or past the end.
    #[inline]
    pub fn field(&self, i: usize) -> Option<&[u8]> {
        let count = self.count();
        if i >= count {
            return None;
        }
        let start = if i == 0 { 0 } else { read_offset(&self.0, i - 1) };
        let end = read_offset(&self.0, i);
        if start == end {
            return None;
        }
        let base = COUNT_LEN + count * OFFSET_LEN;
        Some(&self.0[base + start..base + end])
    }

    #[inline]
    pub fn is_null(&self, i: usize) -> bool {
        self.field(i).is_none()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Serialized size in bytes.
    pub fn size(&self) -> usize {
        self.0.len()
    }
}

#[inline]
fn read_offset(bytes: &[u8], i: usize) -> usize {
    let at = COUNT_LEN + i * OFFSET_LEN;
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]) as usize
}

impl fmt::Debug for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields: Vec<String> = (0..self.count())
            .map(|i| self.field(i).map_or_else(|| "NULL".to_string(), hex::encode))
            .collect();
        write!(f, "Tuple[{}]", fields.join(", "))
    }
}
