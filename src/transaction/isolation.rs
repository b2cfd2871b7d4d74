//! Transaction isolation levels.
//!
//! - ReadCommitted: reads see the latest committed state plus own writes
//! - RepeatableRead: reads see the snapshot taken at begin; conflicting
//!   commits fail (first committer wins)

use std::fmt;

use thiserror::Error;

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IsolationLevel {
    /// Each statement reads the most recently committed data.
    ///
    /// Two statements in the same transaction may observe different data if
    /// another transaction commits in between. Concurrent writes to the same
    /// row are resolved by commit order (last writer wins).
    #[default]
    ReadCommitted,

    /// Snapshot isolation.
    ///
    /// Every read sees the database as of `begin`. If another transaction
    /// commits a write to a row this one also wrote, this commit fails with a
    /// retryable conflict.
    RepeatableRead,
}

impl IsolationLevel {
    /// Check if this isolation level reads from a fixed snapshot.
    pub fn uses_snapshot(&self) -> bool {
        matches!(self, IsolationLevel::RepeatableRead)
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IsolationLevel::ReadCommitted => write!(f, "READ COMMITTED"),
            IsolationLevel::RepeatableRead => write!(f, "REPEATABLE READ"),
        }
    }
}

/// Unrecognized isolation level name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown isolation level: {0}")]
pub struct ParseIsolationError(pub String);

/// Parse isolation level from its SQL spelling (or a few common variants).
impl std::str::FromStr for IsolationLevel {
    type Err = ParseIsolationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "READ COMMITTED" | "READ_COMMITTED" | "READCOMMITTED" => {
                Ok(IsolationLevel::ReadCommitted)
            }
            "REPEATABLE READ" | "REPEATABLE_READ" | "REPEATABLEREAD" | "SNAPSHOT" => {
                Ok(IsolationLevel::RepeatableRead)
            }
            _ => Err(ParseIsolationError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_isolation() {
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
        assert!(!IsolationLevel::ReadCommitted.uses_snapshot());
        assert!(IsolationLevel::RepeatableRead.uses_snapshot());
    }

    #[test]
    fn test_parse_isolation() {
        assert_eq!(
            "read committed".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::ReadCommitted
        );
        assert_eq!(
            " SNAPSHOT ".parse::<IsolationLevel>().unwrap(),
            IsolationLevel::RepeatableRead
        );
        assert_eq!(
            "serializable".parse::<IsolationLevel>(),
            Err(ParseIsolationError("serializable".to_string()))
        );
    }
}
