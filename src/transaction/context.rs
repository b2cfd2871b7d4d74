//! Ambient transaction context.
//!
//! Each logical call chain (one request, one job) gets its own context slot
//! through a tokio task-local. Code running anywhere below a
//! [`TransactionManager::with_transaction`](super::TransactionManager::with_transaction)
//! call on the same task sees the published transaction without it being
//! passed down as a parameter. Other tasks, including ones spawned from
//! inside the scope, never see it.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use ulid::Ulid;

use crate::transaction::hooks::HookCollection;

tokio::task_local! {
    static AMBIENT: AmbientContext;
}

/// Opaque unique token for one physical transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(Ulid);

impl TransactionId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_string().to_lowercase())
    }
}

/// What is published for the duration of one transaction.
///
/// The transaction handle is type-erased so that a single task-local slot
/// serves every connection type; the manager that published it downcasts it
/// back.
#[derive(Clone)]
pub struct AmbientContext {
    transaction: Arc<dyn Any + Send + Sync>,
    hooks: HookCollection,
    transaction_id: TransactionId,
}

impl AmbientContext {
    pub fn new<H>(transaction: H, hooks: HookCollection) -> Self
    where
        H: Any + Send + Sync,
    {
        Self {
            transaction: Arc::new(transaction),
            hooks,
            transaction_id: TransactionId::generate(),
        }
    }

    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    pub fn hooks(&self) -> &HookCollection {
        &self.hooks
    }

    /// The published handle, if it is of type `H`.
    pub fn transaction<H>(&self) -> Option<&H>
    where
        H: Any,
    {
        self.transaction.downcast_ref::<H>()
    }

    /// Run `fut` with this context published, shadowing any outer one.
    pub async fn scope<F>(self, fut: F) -> F::Output
    where
        F: Future,
    {
        AMBIENT.scope(self, fut).await
    }

    /// Clone of the current context, if any.
    pub fn current() -> Option<AmbientContext> {
        AMBIENT.try_with(Clone::clone).ok()
    }

    /// Whether a transaction is published on the current call chain.
    pub fn is_set() -> bool {
        AMBIENT.try_with(|_| ()).is_ok()
    }
}

impl fmt::Debug for AmbientContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmbientContext")
            .field("transaction_id", &self.transaction_id)
            .field("hooks", &self.hooks)
            .finish()
    }
}
