//! Connection pooling and the connection provider.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::db::config::DatabaseConfig;
use crate::db::handle::{QueryHandle, Registry, RootHandle, Transaction, TransactionMetadata};
use crate::storage::{MemoryStore, StorageError, StorageResult, StoreStats};
use crate::transaction::{IsolationLevel, TransactionError, TransactionResult, TransactionalConnection};

/// Bounded set of connections.
///
/// A connection is a permit: holding one is what allows a statement or a
/// transaction to touch the store.
#[derive(Debug, Clone)]
pub(crate) struct ConnectionPool {
    semaphore: Arc<Semaphore>,
    max_connections: usize,
    acquire_timeout: Duration,
}

impl ConnectionPool {
    pub(crate) fn new(max_connections: usize, acquire_timeout: Duration) -> Self {
        let max_connections = max_connections.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            semaphore: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            acquire_timeout,
        }
    }

    /// Check out a connection, waiting at most `acquire_timeout`.
    pub(crate) async fn acquire(&self) -> StorageResult<OwnedSemaphorePermit> {
        let acquire = self.semaphore.clone().acquire_owned();
        match tokio::time::timeout(self.acquire_timeout, acquire).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(StorageError::PoolClosed),
            Err(_) => Err(StorageError::PoolTimeout(self.acquire_timeout)),
        }
    }

    /// Number of connections currently checked out.
    pub(crate) fn in_use(&self) -> usize {
        self.max_connections - self.semaphore.available_permits()
    }

    pub(crate) fn close(&self) {
        self.semaphore.close();
    }
}

/// Provider statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    pub store: StoreStats,
    pub active_transactions: usize,
    pub connections_in_use: usize,
    pub max_connections: usize,
}

struct ProviderInner {
    config: DatabaseConfig,
    store: Arc<MemoryStore>,
    pool: ConnectionPool,
    active: Registry,
    shut_down: AtomicBool,
}

/// Owns the store and the pool; the one place physical transactions come from.
#[derive(Clone)]
pub struct ConnectionProvider {
    inner: Arc<ProviderInner>,
}

impl ConnectionProvider {
    /// Open the database described by `config`.
    ///
    /// For `file://` urls the snapshot is loaded if it exists.
    pub fn open(config: DatabaseConfig) -> StorageResult<Self> {
        let store = match config.url.snapshot_path() {
            Some(path) => MemoryStore::load(path)?,
            None => MemoryStore::new(),
        };
        let pool = ConnectionPool::new(config.max_connections, config.acquire_timeout);

        info!(
            url = %config.url,
            max_connections = config.max_connections,
            isolation = %config.isolation,
            rows = store.stats().total_rows,
            "database opened"
        );

        Ok(Self {
            inner: Arc::new(ProviderInner {
                config,
                store: Arc::new(store),
                pool,
                active: Registry::default(),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// Root handle: each statement runs as its own transaction.
    pub fn root_handle(&self) -> QueryHandle {
        QueryHandle::Root(RootHandle::new(
            self.inner.store.clone(),
            self.inner.pool.clone(),
        ))
    }

    /// Open a physical transaction on a pooled connection.
    pub async fn begin_transaction(&self, isolation: IsolationLevel) -> StorageResult<Transaction> {
        let permit = self.inner.pool.acquire().await?;
        let (snapshot, base_seq) = if isolation.uses_snapshot() {
            self.inner.store.pin_snapshot()
        } else {
            self.inner.store.snapshot()
        };
        let metadata = TransactionMetadata {
            tx_id: Ulid::new().to_string().to_lowercase(),
            isolation,
            base_seq,
            started_at: chrono::Utc::now(),
        };
        debug!(tx_id = %metadata.tx_id, %isolation, base_seq, "physical transaction opened");

        Ok(Transaction::start(
            metadata,
            self.inner.store.clone(),
            snapshot,
            permit,
            self.inner.active.clone(),
        ))
    }

    /// Number of open physical transactions.
    pub fn active_count(&self) -> usize {
        self.inner.active.read().len()
    }

    /// Open physical transactions, oldest first.
    pub fn active_transactions(&self) -> Vec<TransactionMetadata> {
        let mut active: Vec<TransactionMetadata> =
            self.inner.active.read().values().cloned().collect();
        active.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.tx_id.cmp(&b.tx_id)));
        active
    }

    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            store: self.inner.store.stats(),
            active_transactions: self.active_count(),
            connections_in_use: self.inner.pool.in_use(),
            max_connections: self.inner.pool.max_connections,
        }
    }

    /// Lightweight probe: check out a connection and read the committed
    /// snapshot. Never fails, just reports.
    pub async fn is_healthy(&self) -> bool {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return false;
        }
        match self.inner.pool.acquire().await {
            Ok(_permit) => {
                let _ = self.inner.store.snapshot();
                true
            }
            Err(e) => {
                warn!(error = %e, "health check failed");
                false
            }
        }
    }

    /// Close the pool and flush file-backed data.
    ///
    /// Must be called exactly once; a second call fails with `PoolClosed`.
    pub fn shutdown(&self) -> StorageResult<()> {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return Err(StorageError::PoolClosed);
        }
        self.inner.pool.close();

        let active = self.active_count();
        if active > 0 {
            warn!(active, "shutting down with open transactions, their writes are lost");
        }
        if let Some(path) = self.inner.config.url.snapshot_path() {
            self.inner.store.flush(path)?;
        }

        info!(url = %self.inner.config.url, "database closed");
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProvider")
            .field("url", &self.inner.config.url)
            .field("stats", &self.stats())
            .finish()
    }
}

#[async_trait]
impl TransactionalConnection for ConnectionProvider {
    type Handle = QueryHandle;

    fn root(&self) -> QueryHandle {
        self.root_handle()
    }

    async fn begin(&self, isolation: IsolationLevel) -> TransactionResult<QueryHandle> {
        let tx = self.begin_transaction(isolation).await?;
        Ok(QueryHandle::Transaction(tx))
    }

    async fn commit(&self, handle: &QueryHandle) -> TransactionResult<()> {
        match handle {
            QueryHandle::Transaction(tx) => {
                tx.commit()?;
                Ok(())
            }
            QueryHandle::Root(_) => Err(TransactionError::InvalidOperation(
                "the root handle cannot be committed".to_string(),
            )),
        }
    }

    async fn rollback(&self, handle: &QueryHandle) -> TransactionResult<()> {
        match handle {
            QueryHandle::Transaction(tx) => Ok(tx.rollback()?),
            QueryHandle::Root(_) => Err(TransactionError::InvalidOperation(
                "the root handle cannot be rolled back".to_string(),
            )),
        }
    }
}
