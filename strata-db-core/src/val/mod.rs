//! Tuple encoding.
//!
//! Keys and values of every map are [`Tuple`]s: opaque byte sequences whose
//! meaning and order are supplied by a [`TupleDesc`].

mod desc;
mod tuple;
mod value;

pub use desc::{FieldType, TupleBuilder, TupleDesc};
pub use tuple::Tuple;
pub use value::{Encoding, Row, Value};
