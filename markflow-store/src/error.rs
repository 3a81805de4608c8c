//! Repository error types.

use markflow_core::StoreError;
use thiserror::Error;

/// Errors from record repositories.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("record already exists: {0}")]
    AlreadyExists(String),

    #[error("precondition failed on record {id}: {reason}")]
    PreconditionFailed { id: String, reason: String },

    #[error("data corruption: {0}")]
    Corruption(String),
}

impl From<RepositoryError> for StoreError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::Io(e) => StoreError::Io(e),
            RepositoryError::NotFound(id) => StoreError::RecordNotFound(id),
            RepositoryError::PreconditionFailed { id, reason } => StoreError::Conflict { id, reason },
            other => StoreError::Backend(other.to_string()),
        }
    }
}
