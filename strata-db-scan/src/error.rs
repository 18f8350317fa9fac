//! Error types for index scans

use thiserror::Error;

/// Scan errors
#[derive(Error, Debug)]
pub enum ScanError {
    /// Error from strata-db-core (storage, decoding, dangling entries)
    #[error("Core error: {0}")]
    Core(#[from] strata_db_core::Error),

    /// Projection names a column the table does not have
    #[error("Invalid projection: {0}")]
    InvalidProjection(String),

    /// Index does not belong to the table being scanned
    #[error("Index mismatch: {0}")]
    IndexMismatch(String),
}

impl ScanError {
    pub fn invalid_projection(msg: impl Into<String>) -> Self {
        Self::InvalidProjection(msg.into())
    }

    pub fn index_mismatch(msg: impl Into<String>) -> Self {
        Self::IndexMismatch(msg.into())
    }

    /// True when an index entry had no primary row.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Core(strata_db_core::Error::NotFound(_)))
    }
}

/// Result type for scan operations
pub type Result<T> = std::result::Result<T, ScanError>;
