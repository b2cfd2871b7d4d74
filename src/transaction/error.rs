//! Transaction error types.

use thiserror::Error;

use crate::storage::StorageError;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Error returned by a post-commit hook.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised by the transaction manager itself.
///
/// Failures of a unit of work are never wrapped in this type: they propagate
/// in the caller's own error type.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Storage layer error while opening, committing or rolling back.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A post-commit hook was registered outside of any transaction.
    #[error("no active transaction: post-commit hooks can only be registered inside with_transaction")]
    NoActiveTransaction,

    /// A post-commit hook failed.
    ///
    /// The transaction had already committed when this happened; its data
    /// changes stay in place.
    #[error("post-commit hook failed after the transaction committed: {0}")]
    Hook(BoxError),

    /// Invalid operation for the given handle.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl TransactionError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransactionError::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Whether the transaction committed before this error was raised.
    pub fn is_after_commit(&self) -> bool {
        matches!(self, TransactionError::Hook(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_retryable() {
        let timeout = TransactionError::from(StorageError::PoolTimeout(Duration::from_secs(1)));
        assert!(timeout.is_retryable());
        assert!(!TransactionError::NoActiveTransaction.is_retryable());
    }

    #[test]
    fn test_hook_error_is_after_commit() {
        let err = TransactionError::Hook("mail server down".into());
        assert!(err.is_after_commit());
        assert!(err.to_string().contains("mail server down"));
        assert!(!TransactionError::NoActiveTransaction.is_after_commit());
    }
}
