//! Repository error types.

use thiserror::Error;

use crate::storage::{InvalidNameError, StorageError};
use crate::transaction::TransactionError;

/// Result type for repository and facade operations.
pub type RepoResult<T> = Result<T, RepositoryError>;

/// Errors surfaced by repositories and facades.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    /// A uniqueness, reference or check constraint was violated.
    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<InvalidNameError> for RepositoryError {
    fn from(err: InvalidNameError) -> Self {
        RepositoryError::InvalidInput(err.to_string())
    }
}

impl RepositoryError {
    /// Check if retrying the whole unit of work may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            RepositoryError::Storage(e) => e.is_retryable(),
            RepositoryError::Transaction(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// The data was committed but a post-commit callback failed.
    pub fn is_after_commit(&self) -> bool {
        matches!(self, RepositoryError::Transaction(e) if e.is_after_commit())
    }
}
