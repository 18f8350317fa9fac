//! Error types for the indexer

use thiserror::Error;

/// Indexer errors
#[derive(Error, Debug)]
pub enum IndexerError {
    /// Error from strata-db-core
    #[error("Core error: {0}")]
    Core(#[from] strata_db_core::Error),

    /// Run file or temp directory I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A duplicate handler aborted a unique index build
    #[error("Unique index {index} violated: {message}")]
    UniqueViolation { index: String, message: String },

    /// A vector value cannot be indexed
    #[error("Invalid vector: {0}")]
    InvalidVector(String),

    /// An existing index does not match its primary map
    #[error("Index verification failed: {0}")]
    Verification(String),

    /// The sorter was used after `close`
    #[error("Sorter is closed")]
    SorterClosed,
}

impl IndexerError {
    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an invalid vector error
    pub fn invalid_vector(msg: impl Into<String>) -> Self {
        Self::InvalidVector(msg.into())
    }

    /// Create a verification error
    pub fn verification(msg: impl Into<String>) -> Self {
        Self::Verification(msg.into())
    }

    /// True for cancellation and deadline errors.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Core(e) if e.is_cancellation())
    }
}

/// Result type for indexer operations
pub type Result<T> = std::result::Result<T, IndexerError>;
