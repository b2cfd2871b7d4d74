//! Transaction manager - scoped units of work over an ambient transaction.
//!
//! The TransactionManager is the main entry point for transactions.
//! It handles:
//! - Opening a physical transaction per unit of work, or joining the current one
//! - Publishing the transaction to the ambient context of the call chain
//! - Committing on success, rolling back on failure
//! - Running post-commit hooks once the commit has succeeded
//!
//! # Hook failures
//!
//! Hooks run after the physical commit. If one fails, `with_transaction`
//! returns that failure even though the data changes are already committed
//! and stay committed. Callers that need to tell the two apart can check
//! [`TransactionError::is_after_commit`].

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::transaction::connection::TransactionalConnection;
use crate::transaction::context::{AmbientContext, TransactionId};
use crate::transaction::error::{BoxError, TransactionError, TransactionResult};
use crate::transaction::hooks::HookCollection;
use crate::transaction::isolation::IsolationLevel;

/// Options for [`TransactionManager::with_transaction_opts`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Join the current transaction instead of opening a new one, if there is one.
    pub reuse: bool,
    /// Isolation for a newly opened transaction. Ignored when joining.
    pub isolation: Option<IsolationLevel>,
}

impl TransactionOptions {
    /// Options that join an already active transaction.
    pub fn reuse() -> Self {
        Self {
            reuse: true,
            isolation: None,
        }
    }

    pub fn isolation(mut self, isolation: IsolationLevel) -> Self {
        self.isolation = Some(isolation);
        self
    }
}

/// Runs units of work inside transactions shared through the ambient context.
///
/// Cheap to clone: clones share the same connection.
pub struct TransactionManager<C: TransactionalConnection> {
    connection: Arc<C>,
    default_isolation: IsolationLevel,
}

impl<C: TransactionalConnection> Clone for TransactionManager<C> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            default_isolation: self.default_isolation,
        }
    }
}

impl<C: TransactionalConnection> TransactionManager<C> {
    /// Create a transaction manager over the given connection.
    pub fn new(connection: Arc<C>) -> Self {
        Self {
            connection,
            default_isolation: IsolationLevel::default(),
        }
    }

    /// Set the isolation level used when options don't specify one.
    pub fn with_default_isolation(mut self, isolation: IsolationLevel) -> Self {
        self.default_isolation = isolation;
        self
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    /// Execute `work` in a new transaction, committing on `Ok` and rolling
    /// back on `Err`.
    pub async fn with_transaction<F, Fut, T, E>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TransactionError>,
    {
        self.with_transaction_opts(TransactionOptions::default(), work)
            .await
    }

    /// Execute `work` in a transaction.
    ///
    /// With `options.reuse` set and a transaction already active on this
    /// call chain, `work` simply runs inside it: no new physical transaction,
    /// and hooks it registers run when the outer transaction commits.
    ///
    /// Otherwise a new physical transaction is opened and published with a
    /// fresh hook collection for as long as `work` runs. If `work` returns
    /// `Ok` the transaction commits and then its hooks run in registration
    /// order before this returns. If `work` returns `Err` the transaction
    /// rolls back, its hooks are dropped, and the error is returned as is.
    pub async fn with_transaction_opts<F, Fut, T, E>(
        &self,
        options: TransactionOptions,
        work: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<TransactionError>,
    {
        if options.reuse && self.is_in_transaction() {
            return work().await;
        }

        let isolation = options.isolation.unwrap_or(self.default_isolation);
        let handle = self.connection.begin(isolation).await.map_err(E::from)?;
        let hooks = HookCollection::new();
        let context = AmbientContext::new(handle.clone(), hooks.clone());
        let tx_id = context.transaction_id();
        debug!(%tx_id, %isolation, "transaction started");

        let outcome = context.scope(async move { work().await }).await;

        match outcome {
            Ok(value) => {
                if let Err(e) = self.connection.commit(&handle).await {
                    let discarded = hooks.discard();
                    warn!(%tx_id, discarded_hooks = discarded, error = %e, "commit failed");
                    return Err(E::from(e));
                }
                drop(handle);
                debug!(%tx_id, hooks = hooks.len(), "transaction committed");

                hooks.drain().await.map_err(E::from)?;
                Ok(value)
            }
            Err(err) => {
                let discarded = hooks.discard();
                if let Err(rollback_err) = self.connection.rollback(&handle).await {
                    warn!(%tx_id, error = %rollback_err, "rollback failed");
                }
                debug!(%tx_id, discarded_hooks = discarded, "transaction rolled back");
                Err(err)
            }
        }
    }

    /// Check if a transaction of this manager's connection is active on the
    /// current call chain.
    pub fn is_in_transaction(&self) -> bool {
        AmbientContext::current().is_some_and(|ctx| ctx.transaction::<C::Handle>().is_some())
    }

    /// The active transaction handle, or the root handle outside of one.
    pub fn get_transaction(&self) -> C::Handle {
        AmbientContext::current()
            .and_then(|ctx| ctx.transaction::<C::Handle>().cloned())
            .unwrap_or_else(|| self.connection.root())
    }

    /// Id of the active transaction, if any.
    pub fn transaction_id(&self) -> Option<TransactionId> {
        AmbientContext::current().map(|ctx| ctx.transaction_id())
    }

    /// Register `callback` to run after the active transaction commits.
    ///
    /// Fails with [`TransactionError::NoActiveTransaction`] when called
    /// outside of `with_transaction`.
    pub fn on_after_transaction_commit<F, Fut>(&self, callback: F) -> TransactionResult<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        let ctx = AmbientContext::current().ok_or(TransactionError::NoActiveTransaction)?;
        ctx.hooks().register(callback);
        Ok(())
    }
}

impl<C: TransactionalConnection> std::fmt::Debug for TransactionManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("default_isolation", &self.default_isolation)
            .finish()
    }
}
