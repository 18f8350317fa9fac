//! Field encodings and decoded values.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// On-disk encoding of a single tuple field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    Int64,
    Uint64,
    Float64,
    /// UTF-8 plus a trailing zero byte (so `""` is not NULL).
    String,
    /// Raw bytes plus a trailing zero byte.
    Bytes,
    /// 16-byte digest, used for synthetic keys of keyless tables.
    Hash128,
    /// Packed little-endian `f32` components.
    Vector,
}

impl Encoding {
    /// Compare two non-NULL encoded fields.
    pub fn compare(self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            Encoding::Int64 => read_i64(a).cmp(&read_i64(b)),
            Encoding::Uint64 => read_u64(a).cmp(&read_u64(b)),
            Encoding::Float64 => f64::from_bits(read_u64(a)).total_cmp(&f64::from_bits(read_u64(b))),
            Encoding::String | Encoding::Bytes => strip_trailer(a).cmp(strip_trailer(b)),
            Encoding::Hash128 | Encoding::Vector => a.cmp(b),
        }
    }

    /// Decode a non-NULL field.
    pub fn decode(self, raw: &[u8]) -> Result<Value> {
        let bad = |what: &str| {
            Error::type_mismatch(format!("{:?} field: {} ({} bytes)", self, what, raw.len()))
        };
        match self {
            Encoding::Int64 => fixed8(raw)
                .map(|b| Value::Int(i64::from_le_bytes(b)))
                .ok_or_else(|| bad("expected 8 bytes")),
            Encoding::Uint64 => fixed8(raw)
                .map(|b| Value::Uint(u64::from_le_bytes(b)))
                .ok_or_else(|| bad("expected 8 bytes")),
            Encoding::Float64 => fixed8(raw)
                .map(|b| Value::Float(f64::from_le_bytes(b)))
                .ok_or_else(|| bad("expected 8 bytes")),
            Encoding::String => {
                let body = trailer_body(raw).ok_or_else(|| bad("missing terminator"))?;
                std::str::from_utf8(body)
                    .map(|s| Value::Str(s.to_string()))
                    .map_err(|_| bad("invalid utf-8"))
            }
            Encoding::Bytes => trailer_body(raw)
                .map(|b| Value::Bytes(b.to_vec()))
                .ok_or_else(|| bad("missing terminator")),
            Encoding::Hash128 => <[u8; 16]>::try_from(raw)
                .map(Value::Hash)
                .map_err(|_| bad("expected 16 bytes")),
            Encoding::Vector => {
                if raw.is_empty() || raw.len() % 4 != 0 {
                    return Err(bad("expected a multiple of 4 bytes"));
                }
                Ok(Value::Vector(
                    raw.chunks_exact(4)
                        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                        .collect(),
                ))
            }
        }
    }
}

#[inline]
fn fixed8(raw: &[u8]) -> Option<[u8; 8]> {
    <[u8; 8]>::try_from(raw).ok()
}

#[inline]
fn read_i64(raw: &[u8]) -> i64 {
    fixed8(raw).map_or(0, i64::from_le_bytes)
}

#[inline]
fn read_u64(raw: &[u8]) -> u64 {
    fixed8(raw).map_or(0, u64::from_le_bytes)
}

#[inline]
fn strip_trailer(raw: &[u8]) -> &[u8] {
    trailer_body(raw).unwrap_or(raw)
}

#[inline]
fn trailer_body(raw: &[u8]) -> Option<&[u8]> {
    match raw.split_last() {
        Some((0, body)) => Some(body),
        _ => None,
    }
}

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Hash([u8; 16]),
    Vector(Vec<f32>),
}

/// A decoded row: one optional value per column, `None` is NULL.
pub type Row = Vec<Option<Value>>;

impl Value {
    pub fn encoding(&self) -> Encoding {
        match self {
            Value::Int(_) => Encoding::Int64,
            Value::Uint(_) => Encoding::Uint64,
            Value::Float(_) => Encoding::Float64,
            Value::Str(_) => Encoding::String,
            Value::Bytes(_) => Encoding::Bytes,
            Value::Hash(_) => Encoding::Hash128,
            Value::Vector(_) => Encoding::Vector,
        }
    }

    /// Append the encoded form of this value to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Value::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Uint(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Str(s) => {
                out.extend_from_slice(s.as_bytes());
                out.push(0);
            }
            Value::Bytes(b) => {
                out.extend_from_slice(b);
                out.push(0);
            }
            Value::Hash(h) => out.extend_from_slice(h),
            Value::Vector(v) => {
                for x in v {
                    out.extend_from_slice(&x.to_le_bytes());
                }
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::Uint(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "'{}'", s),
            Value::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            Value::Hash(h) => write!(f, "#{}", hex::encode(h)),
            Value::Vector(v) => write!(f, "{:?}", v),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<Vec<f32>> for Value {
    fn from(v: Vec<f32>) -> Self {
        Value::Vector(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_int_order_is_numeric() {
        let a = Value::Int(-5).encode();
        let b = Value::Int(3).encode();
        assert_eq!(Encoding::Int64.compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_string_prefix_orders_first() {
        let a = Value::from("ab").encode();
        let b = Value::from("abc").encode();
        assert_eq!(Encoding::String.compare(&a, &b), Ordering::Less);
        let empty = Value::from("").encode();
        assert_eq!(empty, vec![0]);
        assert_eq!(Encoding::String.decode(&empty).unwrap(), Value::from(""));
    }

    #[test]
    fn test_float_total_order() {
        let neg = Value::Float(-0.5).encode();
        let pos = Value::Float(2.0).encode();
        assert_eq!(Encoding::Float64.compare(&neg, &pos), Ordering::Less);
    }

    #[test]
    fn test_decode_rejects_wrong_width() {
        assert!(Encoding::Int64.decode(&[1, 2, 3]).is_err());
        assert!(Encoding::Vector.decode(&[1, 2, 3]).is_err());
        assert!(Encoding::String.decode(b"abc").is_err());
    }

    #[test]
    fn test_vector_decode() {
        let raw = Value::Vector(vec![1.0, -2.5]).encode();
        assert_eq!(
            Encoding::Vector.decode(&raw).unwrap(),
            Value::Vector(vec![1.0, -2.5])
        );
    }
}
