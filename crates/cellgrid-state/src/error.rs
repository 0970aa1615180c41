//! Error types for the cellgrid state store.

use cellgrid_core::{SourceError, TopologyError, WorkloadError};
use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl From<StateError> for SourceError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::Deserialize(reason) => SourceError::Corrupt {
                table: "entries".to_string(),
                reason,
            },
            other => SourceError::Unavailable(other.to_string()),
        }
    }
}

impl From<StateError> for TopologyError {
    fn from(err: StateError) -> Self {
        TopologyError::Unavailable(err.to_string())
    }
}

impl From<StateError> for WorkloadError {
    fn from(err: StateError) -> Self {
        match err {
            StateError::NotFound(what) => WorkloadError::NotFound(what),
            other => WorkloadError::Store(other.to_string()),
        }
    }
}
