//! Write sessions over a file-backed store.

use std::sync::Arc;
use strata_db_core::{
    CancelToken, ChunkConfig, Column, Encoding, FileNodeStore, NodeStore, OrderedMap,
    PersistedMap, Range, TableSchema, Value,
};
use strata_db_staging::{StagingConfig, WriteSession};

fn schema() -> TableSchema {
    TableSchema::new(
        "items",
        vec![
            Column::key("id", Encoding::Int64),
            Column::new("label", Encoding::String),
        ],
    )
    .unwrap()
}

#[test]
fn session_rows_survive_reopen() {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let cancel = CancelToken::new();
    let s = schema();

    let root = {
        let store: Arc<dyn NodeStore> = Arc::new(FileNodeStore::open(dir.path()).unwrap());
        let base = PersistedMap::empty(store, s.key_desc(), s.value_desc()).unwrap();
        let session = WriteSession::new(StagingConfig::new(16, usize::MAX), ChunkConfig::small());
        session.open_table("items", base);
        for i in (0..100).rev() {
            let (k, v) = s
                .encode_row(&[Some(Value::Int(i)), Some(Value::Str(format!("item {}", i)))])
                .unwrap();
            session.put("items", k, v, &cancel).unwrap();
        }
        let (k, _) = s.encode_row(&[Some(Value::Int(50)), None]).unwrap();
        session.delete("items", k, &cancel).unwrap();
        let versions = session.close(&cancel).unwrap();
        versions[0].1.id()
    };

    let store: Arc<dyn NodeStore> = Arc::new(FileNodeStore::open(dir.path()).unwrap());
    let map = PersistedMap::load(store, root, s.key_desc(), s.value_desc()).unwrap();
    assert_eq!(map.count(), 99);
    let ids: Vec<i64> = map
        .iter_range(&Range::all(), &cancel)
        .unwrap()
        .map(|r| {
            let (k, v) = r.unwrap();
            s.decode_row(&k, &v).unwrap()[0].as_ref().unwrap().as_int().unwrap()
        })
        .collect();
    let expected: Vec<i64> = (0..100).filter(|&i| i != 50).collect();
    assert_eq!(ids, expected);
}
