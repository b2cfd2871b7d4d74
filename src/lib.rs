//! chatcore - transactional backend core for a team chat application
//!
//! Units of work run inside [`transaction::TransactionManager::with_transaction`].
//! The open transaction is carried by the ambient context of the current
//! task, so repositories pick it up on their own and nothing has to pass a
//! transaction handle around. Callbacks registered with
//! `on_after_transaction_commit` run only once the commit has succeeded.
//!
//! # Example
//!
//! ```no_run
//! use chatcore::app::Backend;
//! use chatcore::db::DatabaseConfig;
//! use chatcore::facade::VerifiedIdentity;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Backend::bootstrap(DatabaseConfig::in_memory())?;
//! let identity = VerifiedIdentity::new("ada@example.com", "Ada")?;
//! let (_, user) = backend.iam.sync_identity(identity).await?;
//! backend
//!     .conversations
//!     .start_conversation(&user.id, "general", "hello")
//!     .await?;
//! backend.close()?;
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod db;
pub mod facade;
pub mod repository;
pub mod storage;
pub mod transaction;
