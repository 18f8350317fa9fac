//! Folding staged edits into a persisted map.

use crate::staging::StagingMap;
use strata_db_core::{CancelToken, ChunkConfig, Error, OrderedMap, PersistedMap, Result};

impl StagingMap {
    /// Produce a new version of `base` with every staged edit applied.
    ///
    /// `base` is left untouched. Staged deletes of keys that `base` does not
    /// hold are ignored.
    pub fn apply_to(
        &self,
        base: &PersistedMap,
        chunk: &ChunkConfig,
        cancel: &CancelToken,
    ) -> Result<PersistedMap> {
        if base.key_desc() != self.key_desc() || base.value_desc() != self.value_desc() {
            return Err(Error::type_mismatch(
                "staging map and base map have different descriptors",
            ));
        }
        if self.is_empty() {
            return Ok(base.clone());
        }
        let _span = tracing::debug_span!(
            "apply_staged",
            edits = self.edit_count(),
            bytes = self.bytes()
        )
        .entered();
        base.apply_edits(self.edits().map(Ok), chunk, cancel)
    }
}
