//! Storage layer error types
//!
//! All errors that can occur while executing statements against the store or
//! managing physical transactions are defined here.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::storage::types::{InvalidNameError, RowKey, RowPath, TableName};

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// the row already exists (duplicate primary key or unique value)
    #[error("row already exists: table={table}, key={key}")]
    RowAlreadyExists { table: TableName, key: RowKey },

    /// invalid table name or row key
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// row payload was not a JSON object
    #[error("schema violation: {0}")]
    SchemaViolation(String),

    /// a concurrent transaction committed a row this transaction also wrote
    #[error("write conflict on rows: {}", paths_display(.paths))]
    Conflict { paths: Vec<RowPath> },

    /// statement issued on a transaction that already finished
    #[error("transaction {tx_id} is no longer active (state: {state})")]
    TransactionNotActive { tx_id: String, state: String },

    /// no connection became available in time
    #[error("timed out after {0:?} waiting for a pooled connection")]
    PoolTimeout(Duration),

    /// the pool was shut down
    #[error("connection pool is closed")]
    PoolClosed,

    /// data integrity check failed while loading a snapshot
    #[error("corrupted data at {path}: {reason}")]
    CorruptedData { path: PathBuf, reason: String },

    /// I/O error (filesystem level)
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

fn paths_display(paths: &[RowPath]) -> String {
    paths
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl StorageError {
    /// Check if retrying the whole transaction may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Conflict { .. } | StorageError::PoolTimeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_display() {
        let err = StorageError::Conflict {
            paths: vec![RowPath::new(
                TableName::new("user").unwrap(),
                RowKey::new("u1").unwrap(),
            )],
        };
        assert_eq!(err.to_string(), "write conflict on rows: user/u1");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_not_retryable() {
        assert!(!StorageError::PoolClosed.is_retryable());
        let err = StorageError::RowAlreadyExists {
            table: TableName::new("user").unwrap(),
            key: RowKey::new("u1").unwrap(),
        };
        assert!(!err.is_retryable());
    }
}
