#![allow(dead_code)]

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::Arc;
use strata_db_core::{
    CancelToken, ChunkConfig, Column, Encoding, MemoryNodeStore, NodeStore, OrderedMap,
    PersistedMap, Range, Row, TableSchema, Tuple, TupleDesc, Value,
};

/// Install a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `(pk INT64 PRIMARY KEY, v1 INT64 NULL, name STRING NULL)`
pub fn scores_schema() -> TableSchema {
    TableSchema::new(
        "scores",
        vec![
            Column::key("pk", Encoding::Int64),
            Column::new("v1", Encoding::Int64),
            Column::new("name", Encoding::String),
        ],
    )
    .expect("valid schema")
}

pub fn score_row(pk: i64, v1: Option<i64>) -> Row {
    vec![
        Some(Value::Int(pk)),
        v1.map(Value::Int),
        Some(Value::Str(format!("row {}", pk))),
    ]
}

pub fn shuffled<T>(mut items: Vec<T>, seed: u64) -> Vec<T> {
    items.shuffle(&mut SmallRng::seed_from_u64(seed));
    items
}

/// Build a primary map from rows given in any order.
pub fn primary_map(store: Arc<dyn NodeStore>, schema: &TableSchema, rows: &[Row]) -> PersistedMap {
    let kd = schema.key_desc();
    let mut entries: Vec<(Tuple, Tuple)> = rows
        .iter()
        .map(|r| schema.encode_row(r).expect("row encodes"))
        .collect();
    entries.sort_by(|a, b| kd.compare(&a.0, &b.0));
    PersistedMap::build_from(
        store,
        kd,
        schema.value_desc(),
        entries.into_iter().map(Ok),
        &ChunkConfig::small(),
        &CancelToken::new(),
    )
    .expect("primary map builds")
}

pub fn memory_store() -> Arc<dyn NodeStore> {
    Arc::new(MemoryNodeStore::new())
}

/// Decode every key of `map` into values.
pub fn scan_keys<M: OrderedMap>(map: &M) -> Vec<Vec<Option<Value>>> {
    let kd: TupleDesc = map.key_desc().clone();
    map.iter_range(&Range::all(), &CancelToken::new())
        .expect("range")
        .map(|e| {
            let (k, _) = e.expect("entry");
            (0..kd.count()).map(|i| kd.value(i, &k).expect("decodes")).collect()
        })
        .collect()
}

pub fn int(v: &Option<Value>) -> Option<i64> {
    v.as_ref().and_then(Value::as_int)
}

/// Number of entries directly under `dir`.
pub fn dir_entries(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
