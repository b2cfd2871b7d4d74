//! The capability a backend must offer to be driven by the transaction manager.

use async_trait::async_trait;

use crate::transaction::error::TransactionResult;
use crate::transaction::isolation::IsolationLevel;

/// Minimal transactional interface: a root handle for auto-committing
/// statements, plus begin / commit / rollback of physical transactions.
///
/// Handles are cheap clones that repositories borrow to issue statements.
/// `commit` and `rollback` finish the physical transaction behind a handle;
/// a handle that is dropped without either must discard its writes.
#[async_trait]
pub trait TransactionalConnection: Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;

    /// Handle whose statements each run as their own transaction.
    fn root(&self) -> Self::Handle;

    /// Open a new physical transaction.
    async fn begin(&self, isolation: IsolationLevel) -> TransactionResult<Self::Handle>;

    /// Make the transaction's writes visible to everyone.
    async fn commit(&self, handle: &Self::Handle) -> TransactionResult<()>;

    /// Discard the transaction's writes.
    async fn rollback(&self, handle: &Self::Handle) -> TransactionResult<()>;
}
