//! Error types for strata-db-core

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// Node store errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored node failed to decode or did not match its content id
    #[error("Corrupt node: {0}")]
    Corrupt(String),

    /// Keys handed to a bulk build were not strictly ascending
    #[error("Keys out of order: {0}")]
    UnorderedKeys(String),

    /// Structurally invalid input (e.g. odd-length key/value sequence)
    #[error("Malformed input: {0}")]
    Malformed(String),

    /// A field value does not match the declared encoding
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// NULL written to a non-nullable field
    #[error("Null not allowed: {0}")]
    NullNotAllowed(String),

    /// Invalid range bounds
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Invalid table or index definition
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// A bounded buffer rejected a write
    #[error("Capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// The operation was cancelled by its caller
    #[error("Operation cancelled")]
    Cancelled,

    /// The operation ran past its deadline
    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// A consumer asked a producer to stop
    #[error("Aborted: {0}")]
    Aborted(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a corrupt node error
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Error::Corrupt(msg.into())
    }

    /// Create an unordered keys error
    pub fn unordered(msg: impl Into<String>) -> Self {
        Error::UnorderedKeys(msg.into())
    }

    /// Create a malformed input error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Error::Malformed(msg.into())
    }

    /// Create a type mismatch error
    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Error::TypeMismatch(msg.into())
    }

    /// Create an invalid range error
    pub fn invalid_range(msg: impl Into<String>) -> Self {
        Error::InvalidRange(msg.into())
    }

    /// Create an invalid schema error
    pub fn invalid_schema(msg: impl Into<String>) -> Self {
        Error::InvalidSchema(msg.into())
    }

    /// Create an aborted error
    pub fn aborted(msg: impl Into<String>) -> Self {
        Error::Aborted(msg.into())
    }

    /// True for cancellation and deadline errors.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::Cancelled | Error::DeadlineExceeded)
    }
}
