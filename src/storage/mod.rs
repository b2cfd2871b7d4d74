//! storage layer for chatcore
//!
//! An embedded, transactional JSON row store. This is the part the rest of
//! the crate treats as "the database": repositories issue statements through
//! a query handle, and the connection provider turns those into reads and
//! buffered writes against a [`MemoryStore`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       MemoryStore                           │
//! │   (committed snapshot, commit sequence, conflict tracking)  │
//! └─────────────────────────────────────────────────────────────┘
//!                               ▲ commit
//!                               │
//!                       ┌───────────────┐
//!                       │   WriteSet    │  one per transaction
//!                       └───────────────┘
//!                               │
//!                               ▼
//!                       ┌───────────────┐
//!                       │  Row / keys   │
//!                       └───────────────┘
//! ```

mod error;
mod row;
mod store;
mod types;

pub use error::{StorageError, StorageResult};
pub use row::Row;
pub use store::{MemoryStore, StoreStats, Tables, WriteSet};
pub use types::{InvalidNameError, RowKey, RowPath, TableName};
