//! Vector (proximity) indexes.
//!
//! A proximity index stores one entry per row whose vector column is not
//! NULL, keyed `[vector][primary key...]` like any other secondary index, and
//! answers `nearest(query, k)` under the index's [`DistanceType`]. It
//! implements [`OrderedMap`] so it can stand in wherever a persisted map is
//! read.

use crate::config::IndexBuildConfig;
use crate::entries::{resolve, KeyEntries};
use crate::error::{IndexerError, Result};
use crate::sort::{DescOrder, TupleSorter};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use strata_db_core::{
    CancelToken, ChunkConfig, DistanceType, NodeStore, OrderedMap, PersistedMap, RangeIter, Range,
    Tuple, TupleDesc, Value,
};

// ============================================================================
// Distance functions
// ============================================================================

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Distance between two vectors of equal length; smaller is closer.
///
/// Cosine distance is `1 - cos(a, b)`, or `1.0` when either vector has zero
/// magnitude. Inner product distance is the negated dot product.
pub fn distance(kind: DistanceType, a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    match kind {
        DistanceType::L2Squared => a
            .iter()
            .zip(b)
            .map(|(x, y)| {
                let d = x - y;
                d * d
            })
            .sum(),
        DistanceType::Cosine => {
            let mag_a2 = dot(a, a);
            let mag_b2 = dot(b, b);
            if mag_a2 == 0.0 || mag_b2 == 0.0 {
                1.0
            } else {
                1.0 - dot(a, b) / (mag_a2.sqrt() * mag_b2.sqrt())
            }
        }
        DistanceType::InnerProduct => -dot(a, b),
    }
}

/// Reject vectors that cannot be indexed: empty, non-finite elements, or a
/// dimension different from `dims`.
fn check_vector(vec: &[f32], dims: Option<usize>) -> Result<()> {
    if vec.is_empty() {
        return Err(IndexerError::invalid_vector("vector must not be empty"));
    }
    if let Some(pos) = vec.iter().position(|v| !v.is_finite()) {
        return Err(IndexerError::invalid_vector(format!(
            "vector element [{}] is not finite: {}",
            pos, vec[pos]
        )));
    }
    match dims {
        Some(d) if d != vec.len() => Err(IndexerError::invalid_vector(format!(
            "vector dims mismatch: expected {}, got {}",
            d,
            vec.len()
        ))),
        _ => Ok(()),
    }
}

fn key_vector(desc: &TupleDesc, key: &Tuple) -> Result<Vec<f32>> {
    match desc.value(0, key)? {
        Some(Value::Vector(v)) => Ok(v),
        Some(other) => Err(IndexerError::invalid_vector(format!(
            "expected a vector, got {}",
            other
        ))),
        None => Err(IndexerError::invalid_vector("NULL vector cannot be indexed")),
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Accepts `(key, empty value)` inserts in any order and publishes a
/// [`ProximityMap`]. Callers skip rows whose vector is NULL.
pub struct ProximityMapBuilder {
    store: Arc<dyn NodeStore>,
    key_desc: TupleDesc,
    distance: DistanceType,
    dims: Option<usize>,
    sorter: TupleSorter,
    chunk: ChunkConfig,
}

impl ProximityMapBuilder {
    pub fn new(
        store: Arc<dyn NodeStore>,
        key_desc: TupleDesc,
        distance: DistanceType,
        config: &IndexBuildConfig,
    ) -> Result<Self> {
        let sorter = TupleSorter::new(DescOrder(key_desc.clone()), config)?;
        Ok(Self {
            store,
            key_desc,
            distance,
            dims: None,
            sorter,
            chunk: config.chunk.clone(),
        })
    }

    pub fn len(&self) -> u64 {
        self.sorter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sorter.is_empty()
    }

    pub fn insert(&mut self, key: Tuple, value: &Tuple, cancel: &CancelToken) -> Result<()> {
        if value.count() != 0 {
            return Err(strata_db_core::Error::malformed("proximity index values must be empty").into());
        }
        let vec = key_vector(&self.key_desc, &key)?;
        check_vector(&vec, self.dims)?;
        self.dims = Some(vec.len());
        self.sorter.insert(key, cancel)
    }

    pub fn finish(self, cancel: &CancelToken) -> Result<ProximityMap> {
        let Self {
            store,
            key_desc,
            distance,
            dims,
            sorter,
            chunk,
        } = self;
        let sorted = sorter.flush(cancel)?;
        let mut slot = None;
        let map = PersistedMap::build_from(
            store,
            key_desc,
            TupleDesc::new(Vec::new()),
            KeyEntries::new(sorted, &mut slot),
            &chunk,
            cancel,
        )
        .map_err(|e| resolve(e, &mut slot))?;
        Ok(ProximityMap {
            map,
            distance,
            dims,
        })
    }
}

// ============================================================================
// ProximityMap
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct ProximityMap {
    map: PersistedMap,
    distance: DistanceType,
    dims: Option<usize>,
}

/// Candidate in the bounded max-heap used by `nearest`.
struct Candidate {
    dist: f32,
    seq: u64,
    key: Tuple,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then(self.seq.cmp(&other.seq))
    }
}

impl ProximityMap {
    /// Wrap an already built index map, reading its dimension from the first
    /// entry.
    pub fn from_map(map: PersistedMap, distance: DistanceType, cancel: &CancelToken) -> Result<Self> {
        let dims = match map.iter_all(cancel).next() {
            Some(entry) => {
                let (key, _) = entry?;
                Some(key_vector(map.key_desc(), &key)?.len())
            }
            None => None,
        };
        Ok(Self {
            map,
            distance,
            dims,
        })
    }

    pub fn map(&self) -> &PersistedMap {
        &self.map
    }

    pub fn into_map(self) -> PersistedMap {
        self.map
    }

    pub fn distance(&self) -> DistanceType {
        self.distance
    }

    /// Vector dimension, `None` for an empty index.
    pub fn dims(&self) -> Option<usize> {
        self.dims
    }

    /// The `k` keys closest to `query`, closest first. Ties keep key order.
    pub fn nearest(&self, query: &[f32], k: usize, cancel: &CancelToken) -> Result<Vec<(Tuple, f32)>> {
        check_vector(query, self.dims)?;
        if k == 0 || self.map.is_empty() {
            return Ok(Vec::new());
        }
        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);
        for (seq, entry) in self.map.iter_all(cancel).enumerate() {
            let (key, _) = entry?;
            let vec = key_vector(self.map.key_desc(), &key)?;
            let dist = distance(self.distance, query, &vec);
            let cand = Candidate {
                dist,
                seq: seq as u64,
                key,
            };
            if heap.len() < k {
                heap.push(cand);
            } else if heap.peek().is_some_and(|worst| cand < *worst) {
                heap.pop();
                heap.push(cand);
            }
        }
        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| (c.key, c.dist))
            .collect())
    }
}

impl OrderedMap for ProximityMap {
    type Iter = RangeIter;

    fn key_desc(&self) -> &TupleDesc {
        self.map.key_desc()
    }

    fn value_desc(&self) -> &TupleDesc {
        self.map.value_desc()
    }

    fn get(&self, key: &Tuple, cancel: &CancelToken) -> strata_db_core::Result<Option<Tuple>> {
        self.map.get(key, cancel)
    }

    fn iter_range(&self, range: &Range, cancel: &CancelToken) -> strata_db_core::Result<RangeIter> {
        self.map.iter_range(range, cancel)
    }

    fn count(&self) -> u64 {
        self.map.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_db_core::{Encoding, FieldType, MemoryNodeStore};

    fn desc() -> TupleDesc {
        TupleDesc::new(vec![
            FieldType::required(Encoding::Vector),
            FieldType::required(Encoding::Int64),
        ])
    }

    fn key(v: &[f32], id: i64) -> Tuple {
        desc()
            .tuple_of(&[Some(Value::Vector(v.to_vec())), Some(Value::Int(id))])
            .unwrap()
    }

    fn id_of(t: &Tuple) -> i64 {
        desc().value(1, t).unwrap().unwrap().as_int().unwrap()
    }

    fn builder(kind: DistanceType) -> ProximityMapBuilder {
        ProximityMapBuilder::new(
            Arc::new(MemoryNodeStore::new()),
            desc(),
            kind,
            &IndexBuildConfig::small(),
        )
        .unwrap()
    }

    #[test]
    fn test_distances() {
        assert_eq!(distance(DistanceType::L2Squared, &[0.0, 0.0], &[3.0, 4.0]), 25.0);
        assert_eq!(distance(DistanceType::InnerProduct, &[1.0, 2.0], &[3.0, 4.0]), -11.0);
        assert!(distance(DistanceType::Cosine, &[1.0, 0.0], &[2.0, 0.0]).abs() < 1e-6);
        assert_eq!(distance(DistanceType::Cosine, &[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }

    #[test]
    fn test_nearest_l2() {
        let cancel = CancelToken::new();
        let mut b = builder(DistanceType::L2Squared);
        for i in 0..20 {
            b.insert(key(&[i as f32, 0.0], i), &Tuple::empty(), &cancel).unwrap();
        }
        let map = b.finish(&cancel).unwrap();
        assert_eq!(map.count(), 20);
        assert_eq!(map.dims(), Some(2));
        let ids: Vec<i64> = map
            .nearest(&[7.2, 0.0], 3, &cancel)
            .unwrap()
            .iter()
            .map(|(k, _)| id_of(k))
            .collect();
        assert_eq!(ids, vec![7, 8, 6]);
    }

    #[test]
    fn test_rejects_bad_vectors() {
        let cancel = CancelToken::new();
        let mut b = builder(DistanceType::Cosine);
        b.insert(key(&[1.0, 2.0], 1), &Tuple::empty(), &cancel).unwrap();
        assert!(matches!(
            b.insert(key(&[1.0, 2.0, 3.0], 2), &Tuple::empty(), &cancel),
            Err(IndexerError::InvalidVector(_))
        ));
        assert!(matches!(
            b.insert(key(&[f32::NAN, 2.0], 3), &Tuple::empty(), &cancel),
            Err(IndexerError::InvalidVector(_))
        ));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_empty_proximity_map() {
        let cancel = CancelToken::new();
        let map = builder(DistanceType::InnerProduct).finish(&cancel).unwrap();
        assert_eq!(map.count(), 0);
        assert_eq!(map.dims(), None);
        assert!(map.nearest(&[1.0], 5, &cancel).unwrap().is_empty());
    }

    #[test]
    fn test_from_map_reads_dims() {
        let cancel = CancelToken::new();
        let mut b = builder(DistanceType::L2Squared);
        b.insert(key(&[1.0, 2.0, 3.0], 1), &Tuple::empty(), &cancel).unwrap();
        let built = b.finish(&cancel).unwrap();
        let reopened = ProximityMap::from_map(built.map().clone(), DistanceType::L2Squared, &cancel).unwrap();
        assert_eq!(reopened.dims(), Some(3));
        assert_eq!(reopened, built);
    }
}
