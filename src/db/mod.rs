//! Database access: configuration, connection provider and query handles.
//!
//! The [`ConnectionProvider`] owns the embedded store and a bounded
//! connection pool. It implements
//! [`TransactionalConnection`](crate::transaction::TransactionalConnection),
//! which is all the transaction manager needs from it.

mod config;
mod connection;
mod handle;

pub use config::{ConfigError, ConfigResult, DatabaseConfig, DatabaseUrl, EnvAccessor};
pub use connection::{ConnectionProvider, DatabaseStats};
pub use handle::{QueryHandle, RootHandle, Transaction, TransactionMetadata};
