//! Error types for local storage and offline queries.

use entisync_core::SyncError;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the local datastore.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The storage collaborator failed.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A stored entry could not be parsed.
    #[error("stored entry {key} is corrupted: {reason}")]
    Corrupted {
        /// The storage key of the entry.
        key: String,
        /// Why it could not be read.
        reason: String,
    },

    /// The query uses an unsupported operator or a malformed constraint.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The object is not in the local datastore.
    #[error("object not found in the local datastore: {0}")]
    NotFound(String),

    /// JSON encoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An object-level operation failed.
    #[error(transparent)]
    Object(#[from] SyncError),
}

impl StoreError {
    /// Creates an invalid query error.
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery(message.into())
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidQuery(message) => SyncError::InvalidQuery(message),
            StoreError::NotFound(key) => SyncError::ObjectNotFound(key),
            StoreError::Object(err) => err,
            StoreError::Serialization(err) => SyncError::Codec(err.to_string()),
            other => SyncError::Storage(other.to_string()),
        }
    }
}
