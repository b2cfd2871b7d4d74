//! Query handles: what repositories issue statements through.
//!
//! A [`QueryHandle`] is either the root handle, where every statement
//! auto-commits on its own pooled connection, or an open [`Transaction`]
//! holding one connection until it commits or rolls back.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::OwnedSemaphorePermit;
use tracing::debug;

use crate::db::connection::ConnectionPool;
use crate::storage::{MemoryStore, Row, RowKey, StorageError, StorageResult, TableName, Tables, WriteSet};
use crate::transaction::IsolationLevel;

/// Active transactions of a provider, by id.
pub(crate) type Registry = Arc<RwLock<HashMap<String, TransactionMetadata>>>;

/// What is known about an open physical transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionMetadata {
    pub tx_id: String,
    pub isolation: IsolationLevel,
    /// commit sequence the transaction started from
    pub base_seq: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    RolledBack,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxState::Active => write!(f, "active"),
            TxState::Committed => write!(f, "committed"),
            TxState::RolledBack => write!(f, "rolled back"),
        }
    }
}

struct TxBody {
    state: TxState,
    writes: WriteSet,
    permit: Option<OwnedSemaphorePermit>,
}

struct TransactionInner {
    metadata: TransactionMetadata,
    store: Arc<MemoryStore>,
    /// fixed read snapshot, pinned in the store, only for snapshot isolation
    snapshot: Option<Arc<Tables>>,
    body: Mutex<TxBody>,
    registry: Registry,
}

impl Drop for TransactionInner {
    fn drop(&mut self) {
        let body = self.body.get_mut();
        if body.state == TxState::Active && !body.writes.is_empty() {
            debug!(
                tx_id = %self.metadata.tx_id,
                writes = body.writes.len(),
                "transaction dropped without commit, discarding writes"
            );
        }
        if body.state == TxState::Active && self.snapshot.is_some() {
            self.store.release_snapshot(self.metadata.base_seq);
        }
        self.registry.write().remove(&self.metadata.tx_id);
    }
}

/// An open physical transaction.
///
/// Clones share the same transaction. Writes are buffered until
/// [`commit`](Transaction::commit); dropping the last clone without
/// committing discards them and gives the connection back to the pool.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    pub(crate) fn start(
        metadata: TransactionMetadata,
        store: Arc<MemoryStore>,
        snapshot: Arc<Tables>,
        permit: OwnedSemaphorePermit,
        registry: Registry,
    ) -> Self {
        registry
            .write()
            .insert(metadata.tx_id.clone(), metadata.clone());
        let snapshot = metadata.isolation.uses_snapshot().then_some(snapshot);
        Self {
            inner: Arc::new(TransactionInner {
                metadata,
                store,
                snapshot,
                body: Mutex::new(TxBody {
                    state: TxState::Active,
                    writes: WriteSet::new(),
                    permit: Some(permit),
                }),
                registry,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.metadata.tx_id
    }

    pub fn isolation(&self) -> IsolationLevel {
        self.inner.metadata.isolation
    }

    pub fn metadata(&self) -> &TransactionMetadata {
        &self.inner.metadata
    }

    pub fn is_active(&self) -> bool {
        self.inner.body.lock().state == TxState::Active
    }

    /// Number of buffered writes.
    pub fn pending_writes(&self) -> usize {
        self.inner.body.lock().writes.len()
    }

    fn read_base(&self) -> Arc<Tables> {
        match &self.inner.snapshot {
            Some(snapshot) => snapshot.clone(),
            None => self.inner.store.snapshot().0,
        }
    }

    fn not_active(&self, state: TxState) -> StorageError {
        StorageError::TransactionNotActive {
            tx_id: self.id().to_string(),
            state: state.to_string(),
        }
    }

    fn run<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Tables, &mut WriteSet) -> StorageResult<T>,
    {
        let mut body = self.inner.body.lock();
        if body.state != TxState::Active {
            return Err(self.not_active(body.state));
        }
        let base = self.read_base();
        f(&base, &mut body.writes)
    }

    /// Apply the buffered writes atomically.
    ///
    /// Whatever the outcome, the transaction is finished afterwards: a
    /// failed commit leaves it rolled back with nothing applied.
    pub fn commit(&self) -> StorageResult<u64> {
        let mut body = self.inner.body.lock();
        if body.state != TxState::Active {
            return Err(self.not_active(body.state));
        }

        let metadata = &self.inner.metadata;
        let result = self
            .inner
            .store
            .commit(metadata.base_seq, metadata.isolation, &body.writes);
        body.state = match result {
            Ok(_) => TxState::Committed,
            Err(_) => TxState::RolledBack,
        };
        self.finish(&mut body);

        if let Ok(seq) = result {
            debug!(tx_id = %metadata.tx_id, seq, "physical transaction committed");
        }
        result
    }

    /// Discard the buffered writes.
    pub fn rollback(&self) -> StorageResult<()> {
        let mut body = self.inner.body.lock();
        if body.state != TxState::Active {
            return Err(self.not_active(body.state));
        }
        body.state = TxState::RolledBack;
        let discarded = body.writes.len();
        self.finish(&mut body);
        debug!(tx_id = %self.id(), discarded, "physical transaction rolled back");
        Ok(())
    }

    fn finish(&self, body: &mut TxBody) {
        body.writes.clear();
        body.permit.take();
        if self.inner.snapshot.is_some() {
            self.inner.store.release_snapshot(self.inner.metadata.base_seq);
        }
        self.inner.registry.write().remove(&self.inner.metadata.tx_id);
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("tx_id", &self.inner.metadata.tx_id)
            .field("isolation", &self.inner.metadata.isolation)
            .field("state", &self.inner.body.lock().state)
            .finish()
    }
}

/// Handle for auto-committing statements outside of any transaction.
#[derive(Clone)]
pub struct RootHandle {
    store: Arc<MemoryStore>,
    pool: ConnectionPool,
}

impl RootHandle {
    pub(crate) fn new(store: Arc<MemoryStore>, pool: ConnectionPool) -> Self {
        Self { store, pool }
    }

    async fn run<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Tables, &mut WriteSet) -> StorageResult<T>,
    {
        let _permit = self.pool.acquire().await?;
        let (base, seq) = self.store.snapshot();
        let mut writes = WriteSet::new();
        let out = f(&base, &mut writes)?;
        self.store
            .commit(seq, IsolationLevel::ReadCommitted, &writes)?;
        Ok(out)
    }
}

impl fmt::Debug for RootHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RootHandle").finish_non_exhaustive()
    }
}

/// Where a statement runs: the root handle or an open transaction.
#[derive(Debug, Clone)]
pub enum QueryHandle {
    Root(RootHandle),
    Transaction(Transaction),
}

impl QueryHandle {
    pub fn is_transaction(&self) -> bool {
        matches!(self, QueryHandle::Transaction(_))
    }

    /// Id of the physical transaction behind this handle.
    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            QueryHandle::Root(_) => None,
            QueryHandle::Transaction(tx) => Some(tx.id()),
        }
    }

    async fn run<T, F>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Tables, &mut WriteSet) -> StorageResult<T>,
    {
        // statements are a suspension point, like a round trip to a server
        tokio::task::yield_now().await;
        match self {
            QueryHandle::Root(root) => root.run(f).await,
            QueryHandle::Transaction(tx) => tx.run(f),
        }
    }

    /// Insert a new row. Fails with `RowAlreadyExists` if the key is taken.
    pub async fn insert(&self, table: &TableName, row: Row) -> StorageResult<Row> {
        self.run(|base, writes| writes.insert(base, table, row)).await
    }

    pub async fn get(&self, table: &TableName, key: &RowKey) -> StorageResult<Option<Row>> {
        self.run(|base, writes| Ok(writes.get(base, table, key)))
            .await
    }

    /// Merge `changes` into a row. `None` if the row does not exist.
    pub async fn update(
        &self,
        table: &TableName,
        key: &RowKey,
        changes: BTreeMap<String, Value>,
    ) -> StorageResult<Option<Row>> {
        self.run(|base, writes| Ok(writes.update(base, table, key, changes)))
            .await
    }

    /// Delete a row. `false` if it did not exist.
    pub async fn delete(&self, table: &TableName, key: &RowKey) -> StorageResult<bool> {
        self.run(|base, writes| Ok(writes.delete(base, table, key)))
            .await
    }

    /// Rows of `table` matching `filter`, ordered by key.
    pub async fn scan<F>(&self, table: &TableName, filter: F) -> StorageResult<Vec<Row>>
    where
        F: Fn(&Row) -> bool + Send,
    {
        self.run(|base, writes| Ok(writes.scan(base, table, filter)))
            .await
    }

    /// Delete every row of `table` matching `filter`, returning how many.
    pub async fn delete_where<F>(&self, table: &TableName, filter: F) -> StorageResult<usize>
    where
        F: Fn(&Row) -> bool + Send,
    {
        self.run(|base, writes| Ok(writes.delete_where(base, table, filter)))
            .await
    }
}
