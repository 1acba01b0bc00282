//! Error types for the Tasksync engine.

use crate::RecordId;
use thiserror::Error;

/// Failures reported by the remote store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("record not found: {0}")]
    NotFound(RecordId),

    #[error("store connection closed")]
    Closed,
}

/// No authenticated owner is available.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("no user found")]
    NoSession,
}

/// All possible errors from the engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    // Lifecycle errors
    #[error("channel already held by a live collection: {0}")]
    ChannelInUse(String),

    #[error("collection already initialized")]
    AlreadyInitialized,

    #[error("collection has been torn down")]
    TornDown,
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::from(StoreError::NotFound("task-1".into()));
        assert_eq!(err.to_string(), "record not found: task-1");

        let err = Error::from(AuthError::NoSession);
        assert_eq!(err.to_string(), "no user found");

        let err = Error::ChannelInUse("todos-channel:all-items".into());
        assert_eq!(
            err.to_string(),
            "channel already held by a live collection: todos-channel:all-items"
        );
    }

    #[test]
    fn store_errors_convert() {
        let err: Error = StoreError::Constraint("title must not be empty".into()).into();
        assert!(matches!(err, Error::Store(StoreError::Constraint(_))));
    }
}
