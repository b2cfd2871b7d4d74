//! Embedded transactional row store.
//!
//! The committed state is an immutable snapshot (`Arc<Tables>`) that is
//! swapped on every commit. Transactions never touch it directly: they
//! buffer writes in a [`WriteSet`] and read through it, so uncommitted
//! changes are invisible to everyone else until [`MemoryStore::commit`]
//! applies the whole set atomically.
//!
//! ```text
//!   reader ──► WriteSet (own writes) ──► base snapshot (Arc<Tables>)
//!                                             ▲
//!   commit ──► conflict + uniqueness checks ──┘ swap under write lock
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::row::{Row, RowJson};
use crate::storage::types::{RowKey, RowPath, TableName};
use crate::transaction::IsolationLevel;

/// All committed rows, grouped by table.
pub type Tables = BTreeMap<TableName, BTreeMap<RowKey, Row>>;

/// A buffered write.
#[derive(Debug, Clone)]
enum Write {
    /// New row; the key must still be free at commit time.
    Insert(Row),
    /// Replacement of a row that existed when the write was made.
    Put(Row),
    Delete,
}

/// Writes buffered by one transaction, overlaid on a base snapshot.
#[derive(Debug, Default)]
pub struct WriteSet {
    writes: BTreeMap<RowPath, Write>,
}

impl WriteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Drop every buffered write.
    pub fn clear(&mut self) {
        self.writes.clear();
    }

    /// Read a row as this transaction sees it.
    pub fn get(&self, base: &Tables, table: &TableName, key: &RowKey) -> Option<Row> {
        let path = RowPath::new(table.clone(), key.clone());
        match self.writes.get(&path) {
            Some(Write::Insert(row)) | Some(Write::Put(row)) => Some(row.clone()),
            Some(Write::Delete) => None,
            None => base.get(table).and_then(|rows| rows.get(key)).cloned(),
        }
    }

    /// Insert a new row; fails if the key is already visible.
    pub fn insert(&mut self, base: &Tables, table: &TableName, row: Row) -> StorageResult<Row> {
        if self.get(base, table, &row.key).is_some() {
            return Err(StorageError::RowAlreadyExists {
                table: table.clone(),
                key: row.key,
            });
        }
        let path = RowPath::new(table.clone(), row.key.clone());
        let write = match self.writes.get(&path) {
            // deleted earlier in this transaction, so the key exists in base
            Some(Write::Delete) => Write::Put(row.clone()),
            _ => Write::Insert(row.clone()),
        };
        self.writes.insert(path, write);
        Ok(row)
    }

    /// Merge `changes` into an existing row. Returns `None` if it is absent.
    pub fn update(
        &mut self,
        base: &Tables,
        table: &TableName,
        key: &RowKey,
        changes: BTreeMap<String, Value>,
    ) -> Option<Row> {
        let mut row = self.get(base, table, key)?;
        row.merge_data(changes);
        let path = RowPath::new(table.clone(), key.clone());
        let write = match self.writes.get(&path) {
            Some(Write::Insert(_)) => Write::Insert(row.clone()),
            _ => Write::Put(row.clone()),
        };
        self.writes.insert(path, write);
        Some(row)
    }

    /// Delete a row. Returns `false` if it was not visible.
    pub fn delete(&mut self, base: &Tables, table: &TableName, key: &RowKey) -> bool {
        if self.get(base, table, key).is_none() {
            return false;
        }
        let path = RowPath::new(table.clone(), key.clone());
        match self.writes.get(&path) {
            // never reached the base snapshot, forget it entirely
            Some(Write::Insert(_)) => {
                self.writes.remove(&path);
            }
            _ => {
                self.writes.insert(path, Write::Delete);
            }
        }
        true
    }

    /// All visible rows of `table` matching `filter`, ordered by key.
    pub fn scan<F>(&self, base: &Tables, table: &TableName, filter: F) -> Vec<Row>
    where
        F: Fn(&Row) -> bool,
    {
        let mut visible: BTreeMap<RowKey, Row> = base.get(table).cloned().unwrap_or_default();
        for (path, write) in &self.writes {
            if &path.table != table {
                continue;
            }
            match write {
                Write::Insert(row) | Write::Put(row) => {
                    visible.insert(path.key.clone(), row.clone());
                }
                Write::Delete => {
                    visible.remove(&path.key);
                }
            }
        }
        visible.into_values().filter(|row| filter(row)).collect()
    }

    /// Delete all visible rows of `table` matching `filter`.
    pub fn delete_where<F>(&mut self, base: &Tables, table: &TableName, filter: F) -> usize
    where
        F: Fn(&Row) -> bool,
    {
        let keys: Vec<RowKey> = self
            .scan(base, table, filter)
            .into_iter()
            .map(|row| row.key)
            .collect();
        keys.iter()
            .filter(|key| self.delete(base, table, key))
            .count()
    }
}

struct Committed {
    tables: Arc<Tables>,
    /// sequence number of the latest commit
    seq: u64,
    /// commit sequence that last wrote each row, newer than the oldest pin
    last_write: HashMap<RowPath, u64>,
    /// base sequences of open snapshot readers, with reader counts
    pinned: BTreeMap<u64, usize>,
}

impl Committed {
    /// Forget writes no pinned reader can conflict with.
    fn prune(&mut self) {
        match self.pinned.keys().next().copied() {
            Some(floor) => self.last_write.retain(|_, seq| *seq > floor),
            None => self.last_write.clear(),
        }
    }
}

/// Store statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub tables: usize,
    pub total_rows: usize,
    pub commit_seq: u64,
}

/// The committed state shared by every connection of a provider.
pub struct MemoryStore {
    committed: RwLock<Committed>,
}

/// On-disk snapshot layout.
#[derive(Serialize, Deserialize)]
struct SnapshotJson {
    seq: u64,
    tables: BTreeMap<String, Vec<RowJson>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_tables(Tables::new(), 0)
    }

    fn with_tables(tables: Tables, seq: u64) -> Self {
        Self {
            committed: RwLock::new(Committed {
                tables: Arc::new(tables),
                seq,
                last_write: HashMap::new(),
                pinned: BTreeMap::new(),
            }),
        }
    }

    /// Load a store from a snapshot file, or start empty if it does not exist.
    pub fn load(path: &Path) -> StorageResult<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no snapshot found, starting empty");
            return Ok(Self::new());
        }

        let bytes = fs::read(path)?;
        let snapshot: SnapshotJson = serde_json::from_slice(&bytes)?;

        let mut tables = Tables::new();
        for (name, rows) in snapshot.tables {
            let table = TableName::new(name)?;
            let mut by_key = BTreeMap::new();
            for json in rows {
                let row = Row::try_from(json)?;
                if by_key.contains_key(&row.key) {
                    return Err(StorageError::CorruptedData {
                        path: path.to_path_buf(),
                        reason: format!("duplicate key {} in table {}", row.key, table),
                    });
                }
                by_key.insert(row.key.clone(), row);
            }
            tables.insert(table, by_key);
        }

        debug!(path = %path.display(), tables = tables.len(), "snapshot loaded");
        Ok(Self::with_tables(tables, snapshot.seq))
    }

    /// Write the committed state to `path`.
    ///
    /// The snapshot goes to a temporary file in the same directory first and
    /// is then renamed over the target, so readers never see a partial file.
    pub fn flush(&self, path: &Path) -> StorageResult<()> {
        let (tables, seq) = self.snapshot();
        let snapshot = SnapshotJson {
            seq,
            tables: tables
                .iter()
                .map(|(name, rows)| {
                    (
                        name.as_str().to_string(),
                        rows.values().map(RowJson::from).collect(),
                    )
                })
                .collect(),
        };

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        serde_json::to_writer_pretty(&mut file, &snapshot)?;
        file.flush()?;
        file.persist(path).map_err(|e| StorageError::Io(e.error))?;

        debug!(path = %path.display(), seq, "snapshot flushed");
        Ok(())
    }

    /// The latest committed snapshot and its sequence number.
    pub fn snapshot(&self) -> (Arc<Tables>, u64) {
        let committed = self.committed.read();
        (committed.tables.clone(), committed.seq)
    }

    /// Like [`snapshot`](Self::snapshot), but keeps the write history
    /// needed to detect conflicts against it until
    /// [`release_snapshot`](Self::release_snapshot) is called with the
    /// returned sequence.
    pub fn pin_snapshot(&self) -> (Arc<Tables>, u64) {
        let mut committed = self.committed.write();
        let seq = committed.seq;
        *committed.pinned.entry(seq).or_insert(0) += 1;
        (committed.tables.clone(), seq)
    }

    pub fn release_snapshot(&self, seq: u64) {
        let mut committed = self.committed.write();
        match committed.pinned.get_mut(&seq) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                committed.pinned.remove(&seq);
                committed.prune();
            }
            None => {}
        }
    }

    /// Row paths whose last write is still remembered for conflict checks.
    pub fn tracked_writes(&self) -> usize {
        self.committed.read().last_write.len()
    }

    pub fn stats(&self) -> StoreStats {
        let committed = self.committed.read();
        StoreStats {
            tables: committed.tables.len(),
            total_rows: committed.tables.values().map(BTreeMap::len).sum(),
            commit_seq: committed.seq,
        }
    }

    /// Atomically apply a write set.
    ///
    /// `base_seq` is the commit sequence the transaction started from. Under
    /// [`IsolationLevel::RepeatableRead`] any row written by a later commit
    /// is a conflict; such callers must hold a pin on `base_seq` from
    /// [`pin_snapshot`](Self::pin_snapshot). Inserts are re-checked against
    /// the current state. On error nothing is applied.
    pub fn commit(
        &self,
        base_seq: u64,
        isolation: IsolationLevel,
        writes: &WriteSet,
    ) -> StorageResult<u64> {
        let mut committed = self.committed.write();
        if writes.is_empty() {
            return Ok(committed.seq);
        }

        if isolation.uses_snapshot() {
            let conflicts: Vec<RowPath> = writes
                .writes
                .keys()
                .filter(|path| {
                    committed
                        .last_write
                        .get(*path)
                        .is_some_and(|seq| *seq > base_seq)
                })
                .cloned()
                .collect();
            if !conflicts.is_empty() {
                return Err(StorageError::Conflict { paths: conflicts });
            }
        }

        for (path, write) in &writes.writes {
            if let Write::Insert(_) = write {
                let exists = committed
                    .tables
                    .get(&path.table)
                    .is_some_and(|rows| rows.contains_key(&path.key));
                if exists {
                    return Err(StorageError::RowAlreadyExists {
                        table: path.table.clone(),
                        key: path.key.clone(),
                    });
                }
            }
        }

        let mut tables = (*committed.tables).clone();
        for (path, write) in &writes.writes {
            match write {
                Write::Insert(row) | Write::Put(row) => {
                    tables
                        .entry(path.table.clone())
                        .or_default()
                        .insert(path.key.clone(), row.clone());
                }
                Write::Delete => {
                    if let Some(rows) = tables.get_mut(&path.table) {
                        rows.remove(&path.key);
                    }
                }
            }
        }

        let seq = committed.seq + 1;
        for path in writes.writes.keys() {
            committed.last_write.insert(path.clone(), seq);
        }
        committed.tables = Arc::new(tables);
        committed.seq = seq;
        committed.prune();
        Ok(seq)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("stats", &self.stats())
            .finish()
    }
}
