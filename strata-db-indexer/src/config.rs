//! Index build configuration

use crate::error::{IndexerError, Result};
use std::path::PathBuf;
use strata_db_core::ChunkConfig;

/// Default sort buffer budget: 32 MB.
pub const DEFAULT_SORT_BUDGET_BYTES: usize = 32 * 1024 * 1024;

/// Default bound on spilled runs before they are merged down.
pub const DEFAULT_MAX_OPEN_RUNS: usize = 128;

/// Default tuples read per run-file refill.
pub const DEFAULT_READ_BATCH: usize = 1024;

/// Configuration for secondary index builds
#[derive(Debug, Clone)]
pub struct IndexBuildConfig {
    /// Memory budget (bytes) for buffered keys before a sorted run is spilled.
    ///
    /// Default: 32 MB.
    pub sort_budget_bytes: usize,

    /// Maximum number of spilled runs kept open at once.
    ///
    /// When a spill would reach this many runs, the existing runs are first
    /// merged into one. Bounds open file handles during the final merge.
    /// Default: 128
    pub max_open_runs: usize,

    /// Directory for run files.
    ///
    /// Each sorter creates a private subdirectory here and removes it when
    /// done. If `None`, the system temp directory is used.
    pub temp_dir: Option<PathBuf>,

    /// Tuples buffered per run file during the merge.
    ///
    /// Default: 1024
    pub read_batch: usize,

    /// Node sizing of the published index map.
    pub chunk: ChunkConfig,
}

impl Default for IndexBuildConfig {
    fn default() -> Self {
        Self {
            sort_budget_bytes: DEFAULT_SORT_BUDGET_BYTES,
            max_open_runs: DEFAULT_MAX_OPEN_RUNS,
            temp_dir: None,
            read_batch: DEFAULT_READ_BATCH,
            chunk: ChunkConfig::default(),
        }
    }
}

impl IndexBuildConfig {
    /// Tiny budgets that force spills and merge-downs on small inputs.
    pub fn small() -> Self {
        Self {
            sort_budget_bytes: 4 * 1024,
            max_open_runs: 4,
            temp_dir: None,
            read_batch: 16,
            chunk: ChunkConfig::small(),
        }
    }

    /// Builder method to set the sort buffer budget
    pub fn with_sort_budget_bytes(mut self, bytes: usize) -> Self {
        self.sort_budget_bytes = bytes;
        self
    }

    /// Builder method to set the open run bound
    pub fn with_max_open_runs(mut self, runs: usize) -> Self {
        self.max_open_runs = runs;
        self
    }

    /// Builder method to set the run file directory
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Builder method to set the run reader batch size
    pub fn with_read_batch(mut self, tuples: usize) -> Self {
        self.read_batch = tuples;
        self
    }

    /// Builder method to set node sizing of the output map
    pub fn with_chunk(mut self, chunk: ChunkConfig) -> Self {
        self.chunk = chunk;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.sort_budget_bytes == 0 {
            return Err(IndexerError::invalid_config("sort_budget_bytes must be > 0"));
        }
        if self.max_open_runs < 2 {
            return Err(IndexerError::invalid_config(format!(
                "max_open_runs must be >= 2, got {}",
                self.max_open_runs
            )));
        }
        if self.read_batch == 0 {
            return Err(IndexerError::invalid_config("read_batch must be > 0"));
        }
        self.chunk.validate()?;
        Ok(())
    }
}
