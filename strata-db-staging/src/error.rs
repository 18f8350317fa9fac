//! Error types for the staging crate

use thiserror::Error;

/// Result type for staging operations
pub type Result<T> = std::result::Result<T, StagingError>;

/// Errors that can occur while staging writes
#[derive(Error, Debug)]
pub enum StagingError {
    /// A single entry is larger than an empty staging buffer can hold
    #[error("Staging overflow: {0}")]
    Overflow(String),

    /// No table registered under this name
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// Core error wrapper
    #[error("Core error: {0}")]
    Core(#[from] strata_db_core::Error),
}

impl StagingError {
    /// Create an overflow error
    pub fn overflow(msg: impl Into<String>) -> Self {
        Self::Overflow(msg.into())
    }

    /// Create an unknown table error
    pub fn unknown_table(name: impl Into<String>) -> Self {
        Self::UnknownTable(name.into())
    }
}
