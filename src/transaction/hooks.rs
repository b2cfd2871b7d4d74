//! Post-commit hooks.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::transaction::error::{BoxError, TransactionError, TransactionResult};

type HookFuture = Pin<Box<dyn Future<Output = Result<(), BoxError>> + Send + 'static>>;
type Hook = Box<dyn FnOnce() -> HookFuture + Send + 'static>;

/// Ordered callbacks deferred until their transaction commits.
///
/// Clones share the same list: the manager keeps one handle to drain it, and
/// the ambient context carries another so nested code can register hooks.
#[derive(Clone, Default)]
pub struct HookCollection {
    hooks: Arc<Mutex<Vec<Hook>>>,
}

impl HookCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook. Duplicates are not filtered and run once per registration.
    pub fn register<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.hooks
            .lock()
            .push(Box::new(move || Box::pin(callback()) as HookFuture));
    }

    pub fn len(&self) -> usize {
        self.hooks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.lock().is_empty()
    }

    /// Run every registered hook in registration order, one at a time.
    ///
    /// The list is emptied first, so a collection never runs a hook twice.
    /// The first failing hook stops the drain; hooks after it never run.
    pub async fn drain(&self) -> TransactionResult<()> {
        let hooks = std::mem::take(&mut *self.hooks.lock());
        let total = hooks.len();

        for (index, hook) in hooks.into_iter().enumerate() {
            if let Err(e) = hook().await {
                warn!(
                    hook = index,
                    skipped = total - index - 1,
                    error = %e,
                    "post-commit hook failed"
                );
                return Err(TransactionError::Hook(e));
            }
        }

        if total > 0 {
            debug!(hooks = total, "post-commit hooks executed");
        }
        Ok(())
    }

    /// Drop all pending hooks without running them.
    pub fn discard(&self) -> usize {
        let discarded = std::mem::take(&mut *self.hooks.lock());
        discarded.len()
    }
}

impl std::fmt::Debug for HookCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookCollection")
            .field("pending", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder() -> Arc<Mutex<Vec<&'static str>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[tokio::test]
    async fn test_drain_runs_in_order_once() {
        let log = recorder();
        let hooks = HookCollection::new();
        for name in ["a", "b", "c"] {
            let log = log.clone();
            hooks.register(move || async move {
                log.lock().push(name);
                Ok(())
            });
        }
        assert_eq!(hooks.len(), 3);

        hooks.drain().await.unwrap();
        hooks.drain().await.unwrap();

        assert_eq!(*log.lock(), vec!["a", "b", "c"]);
        assert!(hooks.is_empty());
    }

    #[tokio::test]
    async fn test_hooks_never_overlap() {
        let log = recorder();
        let hooks = HookCollection::new();
        for (start, end) in [("a-start", "a-end"), ("b-start", "b-end")] {
            let log = log.clone();
            hooks.register(move || async move {
                log.lock().push(start);
                tokio::task::yield_now().await;
                log.lock().push(end);
                Ok(())
            });
        }

        hooks.drain().await.unwrap();
        assert_eq!(*log.lock(), vec!["a-start", "a-end", "b-start", "b-end"]);
    }

    #[tokio::test]
    async fn test_failing_hook_stops_drain() {
        let log = recorder();
        let hooks = HookCollection::new();
        {
            let log = log.clone();
            hooks.register(move || async move {
                log.lock().push("first");
                Ok(())
            });
        }
        hooks.register(|| async { Err::<(), BoxError>("boom".into()) });
        {
            let log = log.clone();
            hooks.register(move || async move {
                log.lock().push("never");
                Ok(())
            });
        }

        let result = hooks.drain().await;
        assert!(matches!(result, Err(TransactionError::Hook(_))));
        assert_eq!(*log.lock(), vec!["first"]);
    }

    #[tokio::test]
    async fn test_duplicates_run_each_time() {
        let log = recorder();
        let hooks = HookCollection::new();
        for _ in 0..2 {
            let log = log.clone();
            hooks.register(move || async move {
                log.lock().push("same");
                Ok(())
            });
        }
        hooks.drain().await.unwrap();
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_discard() {
        let hooks = HookCollection::new();
        hooks.register(|| async { Ok(()) });
        assert_eq!(hooks.discard(), 1);
        assert!(hooks.is_empty());
    }
}
