//! Verification of an existing secondary index against its primary map.
//!
//! The expected keys are re-derived from the primary map through the same
//! sort path a build uses, then compared entry by entry with the index. Any
//! difference is a hard error; nothing is rebuilt here.

use crate::build::{sort_keys, SecondaryIndex};
use crate::config::IndexBuildConfig;
use crate::error::{IndexerError, Result};
use crate::secondary::{ColumnKeyBuilder, SecondaryKeyBuilder};
use strata_db_core::{CancelToken, IndexDef, OrderedMap, PersistedMap, Range, TableSchema};

/// Check that `index` holds exactly the entries `def` derives from
/// `primary`.
pub fn verify_secondary_index<M: OrderedMap>(
    primary: &PersistedMap,
    schema: &TableSchema,
    def: &IndexDef,
    index: &M,
    config: &IndexBuildConfig,
    cancel: &CancelToken,
) -> Result<()> {
    let _span = tracing::info_span!("verify_secondary_index", index = %def.name).entered();
    let mut keys = ColumnKeyBuilder::new(schema, def)?;
    let kd = keys.key_desc().clone();
    if index.key_desc() != &kd {
        return Err(IndexerError::verification(format!(
            "index {}: key layout does not match its definition",
            def.name
        )));
    }
    if index.value_desc().count() != 0 {
        return Err(IndexerError::verification(format!(
            "index {}: entries carry values",
            def.name
        )));
    }

    let mut expected = sort_keys(primary, &mut keys, config, cancel)?;
    let actual = index.iter_range(&Range::all(), cancel)?;
    let prefix = keys.prefix_desc();
    let vector = def.is_vector();
    let mut checked: u64 = 0;
    for entry in actual {
        let (key, _) = entry?;
        // Vector indexes leave out rows whose vector is NULL.
        let want = loop {
            match expected.next().transpose()? {
                Some(k) if vector && prefix.has_nulls(&k) => continue,
                other => break other,
            }
        };
        match want {
            Some(want) if kd.compare(&want, &key).is_eq() => checked += 1,
            Some(want) => {
                return Err(IndexerError::verification(format!(
                    "index {}: expected entry {}, found {}",
                    def.name,
                    kd.format(&want),
                    kd.format(&key)
                )));
            }
            None => {
                return Err(IndexerError::verification(format!(
                    "index {}: unexpected entry {}",
                    def.name,
                    kd.format(&key)
                )));
            }
        }
    }
    while let Some(k) = expected.next().transpose()? {
        if vector && prefix.has_nulls(&k) {
            continue;
        }
        return Err(IndexerError::verification(format!(
            "index {}: missing entry {}",
            def.name,
            kd.format(&k)
        )));
    }
    tracing::debug!(index = %def.name, entries = checked, "index verified");
    Ok(())
}

/// Verify a previously built index before putting it back into service.
///
/// Returns the index unchanged when it matches the primary map. A mismatch
/// fails with [`IndexerError::Verification`]; callers that want a fresh
/// index must build one explicitly.
pub fn adopt_secondary_index(
    candidate: SecondaryIndex,
    primary: &PersistedMap,
    schema: &TableSchema,
    def: &IndexDef,
    config: &IndexBuildConfig,
    cancel: &CancelToken,
) -> Result<SecondaryIndex> {
    match (&candidate, def.is_vector()) {
        (SecondaryIndex::Proximity(_), false) | (SecondaryIndex::Ordered(_), true) => {
            return Err(IndexerError::verification(format!(
                "index {}: index kind does not match its definition",
                def.name
            )));
        }
        _ => {}
    }
    verify_secondary_index(primary, schema, def, &candidate, config, cancel)?;
    Ok(candidate)
}
