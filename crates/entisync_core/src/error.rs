//! Error types for EntiSync.

use crate::object::TrackedObject;
use thiserror::Error;

/// Result type for EntiSync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Numeric error codes shared with the server.
pub mod codes {
    /// Unclassified failure (cycles, transaction misuse, aborted requests).
    pub const OTHER_CAUSE: i32 = -1;
    /// The server could not be reached.
    pub const CONNECTION_FAILED: i32 = 100;
    /// The object does not exist on the server.
    pub const OBJECT_NOT_FOUND: i32 = 101;
    /// The query is malformed or uses an unsupported operator.
    pub const INVALID_QUERY: i32 = 102;
    /// Invalid or mismatched class name.
    pub const INVALID_CLASS_NAME: i32 = 103;
    /// An object id was required but missing.
    pub const MISSING_OBJECT_ID: i32 = 104;
    /// Attribute key is not a valid field name.
    pub const INVALID_KEY_NAME: i32 = 105;
    /// Value has the wrong type for the requested operation.
    pub const INCORRECT_TYPE: i32 = 111;
    /// Several objects failed in one array operation.
    pub const AGGREGATE_ERROR: i32 = 600;
}

/// A failure attributed to one object of a batched save or destroy.
#[derive(Debug, Clone)]
pub struct ObjectError {
    /// The object the failure belongs to.
    pub object: TrackedObject,
    /// The failure itself.
    pub error: SyncError,
}

/// Errors that can occur in EntiSync operations.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// Unclassified local failure.
    #[error("{message}")]
    Other {
        /// Description of the failure.
        message: String,
    },

    /// The server could not be reached.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Object not found.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// Query could not be evaluated.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Invalid class name.
    #[error("invalid class name: {0}")]
    InvalidClassName(String),

    /// Missing object id.
    #[error("missing object id: {0}")]
    MissingObjectId(String),

    /// Invalid attribute key name.
    #[error("invalid key name: {0}")]
    InvalidKeyName(String),

    /// Value of the wrong type for the operation.
    #[error("incorrect type: {0}")]
    IncorrectType(String),

    /// A nested pointer targets an object that has never been saved.
    #[error("cannot create a pointer to an unsaved object")]
    PointerToUnsavedObject,

    /// Error reported by the server for one request.
    #[error("server error {code}: {message}")]
    Server {
        /// Server error code.
        code: i32,
        /// Server error message.
        message: String,
    },

    /// Several objects failed in one array operation.
    #[error("{} object(s) failed", .0.len())]
    Aggregate(Vec<ObjectError>),

    /// The request was aborted through its request task.
    #[error("request aborted")]
    Aborted,

    /// JSON encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The local storage collaborator failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl SyncError {
    /// Creates an unclassified error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Creates an incorrect type error.
    pub fn incorrect_type(message: impl Into<String>) -> Self {
        Self::IncorrectType(message.into())
    }

    /// Creates an error from a server `{code, error}` payload.
    ///
    /// Connection failures are mapped to their own variant so callers can
    /// defer and retry.
    pub fn from_server(code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            codes::CONNECTION_FAILED => Self::ConnectionFailed(message),
            codes::OBJECT_NOT_FOUND => Self::ObjectNotFound(message),
            _ => Self::Server { code, message },
        }
    }

    /// Returns the numeric error code.
    pub fn code(&self) -> i32 {
        match self {
            SyncError::Other { .. } => codes::OTHER_CAUSE,
            SyncError::ConnectionFailed(_) => codes::CONNECTION_FAILED,
            SyncError::ObjectNotFound(_) => codes::OBJECT_NOT_FOUND,
            SyncError::InvalidQuery(_) => codes::INVALID_QUERY,
            SyncError::InvalidClassName(_) => codes::INVALID_CLASS_NAME,
            SyncError::MissingObjectId(_) => codes::MISSING_OBJECT_ID,
            SyncError::InvalidKeyName(_) => codes::INVALID_KEY_NAME,
            SyncError::IncorrectType(_) => codes::INCORRECT_TYPE,
            SyncError::PointerToUnsavedObject => codes::OTHER_CAUSE,
            SyncError::Server { code, .. } => *code,
            SyncError::Aggregate(_) => codes::AGGREGATE_ERROR,
            SyncError::Aborted | SyncError::Codec(_) | SyncError::Storage(_) => {
                codes::OTHER_CAUSE
            }
        }
    }

    /// Returns true if the failure is a connection failure.
    ///
    /// These are the only failures callers are expected to defer and retry.
    pub fn is_connection_failure(&self) -> bool {
        self.code() == codes::CONNECTION_FAILED
    }

    /// Returns the per-object errors of an aggregate error.
    pub fn object_errors(&self) -> &[ObjectError] {
        match self {
            SyncError::Aggregate(errors) => errors,
            _ => &[],
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Codec(err.to_string())
    }
}
