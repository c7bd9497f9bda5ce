use thiserror::Error;

/// Result type for operations exposed through [`RedirectionStorage`][crate::RedirectionStorage].
pub type Result<T> = std::result::Result<T, RedirectionError>;

/// Validation errors raised while parsing paths, host patterns and status codes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("invalid host pattern: {0}")]
    InvalidHostPattern(String),
    #[error("invalid status code: {0}")]
    InvalidStatusCode(String),
}

#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("write conflicts with a concurrent modification: {0}")]
    Conflict(String),
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
    #[error("storage operation timed out: {0}")]
    Timeout(String),
    #[error("storage query failed: {0}")]
    Query(String),
    #[error("stored data is invalid: {0}")]
    InvalidData(String),
    #[error("storage operation failed: {0}")]
    Operation(String),
}

/// Errors surfaced to callers of the redirection engine.
#[derive(Debug, Clone, Error)]
pub enum RedirectionError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("redirection not found: {0}")]
    NotFound(String),
    #[error("concurrent modification: {0}")]
    ConcurrentModification(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<CoreError> for RedirectionError {
    fn from(value: CoreError) -> Self {
        Self::InvalidInput(value.to_string())
    }
}

impl From<StorageError> for RedirectionError {
    fn from(value: StorageError) -> Self {
        match value {
            StorageError::Conflict(message) => Self::ConcurrentModification(message),
            StorageError::Unavailable(message) | StorageError::Timeout(message) => {
                Self::StorageUnavailable(message)
            }
            other => Self::Storage(other.to_string()),
        }
    }
}
