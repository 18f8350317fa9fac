//! End-to-end secondary index builds.

mod support;

use strata_db_core::{
    CancelToken, Column, DistanceType, Encoding, FieldType, IndexDef, OrderedMap, TableSchema,
    Tuple, TupleDesc, Value,
};
use strata_db_indexer::{
    build_secondary_index, DescOrder, DupOutcome, IndexBuildConfig, IndexerError, TupleSorter,
    ViolationCollector,
};
use support::*;
use tempfile::TempDir;

fn example_rows() -> Vec<strata_db_core::Row> {
    vec![score_row(1, Some(10)), score_row(2, Some(10)), score_row(3, Some(20))]
}

#[test]
fn example_rows_scan_in_index_order() {
    init_tracing();
    let schema = scores_schema();
    let primary = primary_map(memory_store(), &schema, &example_rows());
    let index = build_secondary_index(
        &primary,
        &schema,
        &IndexDef::new("ix_v1", ["v1"]),
        None,
        &IndexBuildConfig::small(),
        &CancelToken::new(),
    )
    .unwrap();

    let keys = scan_keys(&index);
    let pairs: Vec<(Option<i64>, Option<i64>)> = keys.iter().map(|k| (int(&k[0]), int(&k[1]))).collect();
    assert_eq!(
        pairs,
        vec![(Some(10), Some(1)), (Some(10), Some(2)), (Some(20), Some(3))]
    );
}

#[test]
fn unique_build_reports_one_pair() {
    let schema = scores_schema();
    let primary = primary_map(memory_store(), &schema, &example_rows());
    let mut calls: Vec<(i64, i64)> = Vec::new();
    let mut handler = |a: &Tuple, b: &Tuple, desc: &TupleDesc| {
        let pk = |t: &Tuple| desc.value(1, t).unwrap().unwrap().as_int().unwrap();
        calls.push((pk(a), pk(b)));
        DupOutcome::Record
    };
    let index = build_secondary_index(
        &primary,
        &schema,
        &IndexDef::new("ux_v1", ["v1"]).unique(),
        Some(&mut handler),
        &IndexBuildConfig::small(),
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(index.count(), 3);
    assert_eq!(calls, vec![(1, 2)]);
}

#[test]
fn null_indexed_values_never_collide() {
    let schema = scores_schema();
    let rows: Vec<_> = (0..200)
        .map(|pk| score_row(pk, if pk % 2 == 0 { None } else { Some(pk) }))
        .collect();
    let primary = primary_map(memory_store(), &schema, &rows);
    let mut seen = ViolationCollector::new();
    let index = build_secondary_index(
        &primary,
        &schema,
        &IndexDef::new("ux_v1", ["v1"]).unique(),
        Some(&mut seen),
        &IndexBuildConfig::small(),
        &CancelToken::new(),
    )
    .unwrap();
    assert!(seen.is_empty());
    assert_eq!(index.count(), 200);
}

#[test]
fn non_unique_build_is_independent_of_input_order() {
    let schema = scores_schema();
    let rows: Vec<_> = (0..500).map(|pk| score_row(pk, Some(pk % 17))).collect();
    let def = IndexDef::new("ix_v1", ["v1"]);
    let config = IndexBuildConfig::small();
    let cancel = CancelToken::new();

    let a = primary_map(memory_store(), &schema, &shuffled(rows.clone(), 1));
    let b = primary_map(memory_store(), &schema, &shuffled(rows, 2));
    let ia = build_secondary_index(&a, &schema, &def, None, &config, &cancel).unwrap();
    let ib = build_secondary_index(&b, &schema, &def, None, &config, &cancel).unwrap();

    assert_eq!(ia.count(), 500);
    assert_eq!(ia.id(), ib.id());
    let keys = scan_keys(&ia);
    assert!(keys
        .windows(2)
        .all(|w| (int(&w[0][0]), int(&w[0][1])) < (int(&w[1][0]), int(&w[1][1]))));
}

#[test]
fn zero_rows_build_an_empty_index() {
    let schema = scores_schema();
    let primary = primary_map(memory_store(), &schema, &[]);
    let index = build_secondary_index(
        &primary,
        &schema,
        &IndexDef::new("ux_name", ["name"]).unique(),
        None,
        &IndexBuildConfig::small(),
        &CancelToken::new(),
    )
    .unwrap();
    assert_eq!(index.count(), 0);
    assert!(scan_keys(&index).is_empty());
}

#[test]
fn spilled_sort_equals_memory_sort() {
    let tmp = TempDir::new().unwrap();
    let desc = TupleDesc::new(vec![
        FieldType::nullable(Encoding::String),
        FieldType::required(Encoding::Int64),
    ]);
    let tuples: Vec<Tuple> = shuffled((0..2000).collect::<Vec<i64>>(), 7)
        .into_iter()
        .map(|i| {
            let s = (i % 13 != 0).then(|| Value::Str(format!("k{}", i % 97)));
            desc.tuple_of(&[s, Some(Value::Int(i))]).unwrap()
        })
        .collect();

    let config = IndexBuildConfig::small()
        .with_sort_budget_bytes(2048)
        .with_temp_dir(tmp.path());
    let cancel = CancelToken::new();
    let mut sorter = TupleSorter::new(DescOrder(desc.clone()), &config).unwrap();
    for t in &tuples {
        sorter.insert(t.clone(), &cancel).unwrap();
    }
    assert!(sorter.spilled_runs() >= 2);

    let external: Vec<Tuple> = sorter.flush(&cancel).unwrap().map(Result::unwrap).collect();
    let mut memory = tuples;
    memory.sort_by(|a, b| desc.compare(a, b));
    assert_eq!(external, memory);
    assert_eq!(dir_entries(tmp.path()), 0);
}

#[test]
fn aborted_build_leaves_no_run_files() {
    let tmp = TempDir::new().unwrap();
    let schema = scores_schema();
    let rows: Vec<_> = (0..400).map(|pk| score_row(pk, Some(pk / 2))).collect();
    let primary = primary_map(memory_store(), &schema, &rows);
    let before = primary.id();
    let config = IndexBuildConfig::small().with_temp_dir(tmp.path());

    let err = build_secondary_index(
        &primary,
        &schema,
        &IndexDef::new("ux_v1", ["v1"]).unique(),
        None,
        &config,
        &CancelToken::new(),
    )
    .unwrap_err();

    assert!(matches!(err, IndexerError::UniqueViolation { .. }));
    assert_eq!(dir_entries(tmp.path()), 0);
    assert_eq!(primary.id(), before);
    assert_eq!(primary.count(), 400);
}

#[test]
fn cancelled_build_reports_cancellation() {
    let tmp = TempDir::new().unwrap();
    let schema = scores_schema();
    let rows: Vec<_> = (0..300).map(|pk| score_row(pk, Some(pk))).collect();
    let primary = primary_map(memory_store(), &schema, &rows);
    let cancel = CancelToken::new();
    cancel.cancel();

    let err = build_secondary_index(
        &primary,
        &schema,
        &IndexDef::new("ix_v1", ["v1"]),
        None,
        &IndexBuildConfig::small().with_temp_dir(tmp.path()),
        &cancel,
    )
    .unwrap_err();
    assert!(err.is_cancellation());
    assert_eq!(dir_entries(tmp.path()), 0);
}

#[test]
fn keyless_table_index_carries_row_hash() {
    let schema = TableSchema::new(
        "log",
        vec![Column::new("level", Encoding::Int64), Column::new("msg", Encoding::String)],
    )
    .unwrap();
    let rows: Vec<_> = (0..20)
        .map(|i| vec![Some(Value::Int(i % 3)), Some(Value::Str(format!("m{}", i)))])
        .collect();
    let primary = primary_map(memory_store(), &schema, &rows);
    let index = build_secondary_index(
        &primary,
        &schema,
        &IndexDef::new("ix_level", ["level"]),
        None,
        &IndexBuildConfig::small(),
        &CancelToken::new(),
    )
    .unwrap();
    let keys = scan_keys(&index);
    assert_eq!(keys.len(), 20);
    assert!(keys.iter().all(|k| matches!(k[1], Some(Value::Hash(_)))));
}

#[test]
fn vector_index_skips_nulls_and_answers_nearest() {
    let schema = TableSchema::new(
        "docs",
        vec![
            Column::key("id", Encoding::Int64),
            Column::new("embedding", Encoding::Vector),
        ],
    )
    .unwrap();
    let rows: Vec<_> = (0..50)
        .map(|i| {
            let v = (i % 10 != 0).then(|| Value::Vector(vec![i as f32, 1.0]));
            vec![Some(Value::Int(i)), v]
        })
        .collect();
    let primary = primary_map(memory_store(), &schema, &rows);
    let cancel = CancelToken::new();
    let index = build_secondary_index(
        &primary,
        &schema,
        &IndexDef::new("vx", ["embedding"]).with_vector(DistanceType::L2Squared),
        None,
        &IndexBuildConfig::small(),
        &cancel,
    )
    .unwrap();

    assert_eq!(index.count(), 45);
    let prox = index.as_proximity().expect("proximity index");
    let near = prox.nearest(&[20.4, 1.0], 2, &cancel).unwrap();
    let ids: Vec<i64> = near
        .iter()
        .map(|(k, _)| prox.key_desc().value(1, k).unwrap().unwrap().as_int().unwrap())
        .collect();
    // Row 20 has a NULL vector.
    assert_eq!(ids, vec![21, 19]);
}
