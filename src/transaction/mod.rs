//! Scoped transaction management.
//!
//! A unit of work runs inside [`TransactionManager::with_transaction`]. The
//! physical transaction it opens is published to the ambient context of the
//! current call chain, so every repository called underneath picks it up via
//! [`TransactionManager::get_transaction`] without it being passed around.
//! Callbacks registered with
//! [`TransactionManager::on_after_transaction_commit`] run once the commit
//! has succeeded, and never if it rolls back.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionManager                        │
//! │      (join or open, publish, commit/rollback, drain)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌──────────────────────┐
//!  │  Ambient    │       │    Hook     │       │ TransactionalConnection│
//!  │  Context    │       │ Collection  │       │  (begin/commit/...)  │
//!  └─────────────┘       └─────────────┘       └──────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use chatcore::transaction::{TransactionManager, TransactionOptions};
//!
//! let manager = TransactionManager::new(provider);
//!
//! manager
//!     .with_transaction(|| async {
//!         conversations.create(new_conversation).await?;
//!         messages.create(first_message).await?;
//!         manager.on_after_transaction_commit(|| async {
//!             notify().await;
//!             Ok(())
//!         })?;
//!         Ok::<_, RepositoryError>(())
//!     })
//!     .await?;
//! ```

mod connection;
mod context;
mod error;
mod hooks;
mod isolation;
mod manager;

pub use connection::TransactionalConnection;
pub use context::{AmbientContext, TransactionId};
pub use error::{BoxError, TransactionError, TransactionResult};
pub use hooks::HookCollection;
pub use isolation::{IsolationLevel, ParseIsolationError};
pub use manager::{TransactionManager, TransactionOptions};
