//! Repositories: typed access to one table each.
//!
//! Every statement a repository issues goes through the handle returned by
//! [`TransactionManager::get_transaction`](crate::transaction::TransactionManager::get_transaction)
//! at the time of the call. Inside `with_transaction` that is the ambient
//! transaction; outside it is the root handle and each statement commits on
//! its own. Repositories therefore never take a transaction parameter.

mod conversation;
mod error;
mod message;
mod team;
mod team_access;
mod user;

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

use crate::db::{ConnectionProvider, QueryHandle};
use crate::storage::{Row, RowKey, StorageError, TableName};
use crate::transaction::TransactionManager;

pub use conversation::{AccessTarget, Conversation, ConversationAccess, ConversationRepository, NewConversation};
pub use error::{RepoResult, RepositoryError};
pub use message::{Message, MessagePatch, MessageQuery, MessageRepository, MessageRole, NewMessage, SortOrder};
pub use team::{NewTeam, Team, TeamRepository};
pub use team_access::{TeamAccess, TeamAccessRepository};
pub use user::{NewUser, User, UserPatch, UserRepository};

/// The transaction manager the application runs on.
pub type AppTransactionManager = TransactionManager<ConnectionProvider>;

pub(crate) const USER_TABLE: &str = "user";
pub(crate) const TEAM_TABLE: &str = "team";
pub(crate) const TEAM_ACCESS_TABLE: &str = "team_access";
pub(crate) const CONVERSATION_TABLE: &str = "conversation";
pub(crate) const CONVERSATION_ACCESS_TABLE: &str = "conversation_access";
pub(crate) const MESSAGE_TABLE: &str = "message";

/// Shared plumbing for a repository over one table.
///
/// Entities are stored as their JSON serialization, so every field of `T`
/// is a column that filters can look at.
#[derive(Debug, Clone)]
pub struct Repository {
    transactions: AppTransactionManager,
    table: TableName,
}

impl Repository {
    pub fn new(transactions: AppTransactionManager, table: &str) -> RepoResult<Self> {
        Ok(Self {
            transactions,
            table: TableName::new(table)?,
        })
    }

    pub fn transactions(&self) -> &AppTransactionManager {
        &self.transactions
    }

    pub fn table(&self) -> &TableName {
        &self.table
    }

    /// Handle for the next statement: the ambient transaction, or root.
    pub fn handle(&self) -> QueryHandle {
        self.transactions.get_transaction()
    }

    pub async fn insert<T>(&self, key: RowKey, entity: &T) -> RepoResult<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let row = Row::from_value(key, serde_json::to_value(entity)?)?;
        trace!(table = %self.table, key = %row.key, "insert");
        match self.handle().insert(&self.table, row).await {
            Ok(row) => decode(&row),
            Err(StorageError::RowAlreadyExists { table, key }) => Err(RepositoryError::Constraint(
                format!("{table} {key} already exists"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn find<T>(&self, key: &RowKey) -> RepoResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        self.handle()
            .get(&self.table, key)
            .await?
            .map(|row| decode(&row))
            .transpose()
    }

    pub async fn exists(&self, key: &RowKey) -> RepoResult<bool> {
        Ok(self.handle().get(&self.table, key).await?.is_some())
    }

    /// Rows matching `filter`, in key order.
    pub async fn find_where<T, F>(&self, filter: F) -> RepoResult<Vec<T>>
    where
        T: DeserializeOwned,
        F: Fn(&Row) -> bool + Send,
    {
        self.handle()
            .scan(&self.table, filter)
            .await?
            .iter()
            .map(decode)
            .collect()
    }

    /// Merge `changes` into the row, returning the updated entity.
    pub async fn patch<T>(&self, key: &RowKey, changes: BTreeMap<String, Value>) -> RepoResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        trace!(table = %self.table, %key, columns = changes.len(), "update");
        self.handle()
            .update(&self.table, key, changes)
            .await?
            .map(|row| decode(&row))
            .transpose()
    }

    pub async fn remove(&self, key: &RowKey) -> RepoResult<bool> {
        trace!(table = %self.table, %key, "delete");
        Ok(self.handle().delete(&self.table, key).await?)
    }

    pub async fn remove_where<F>(&self, filter: F) -> RepoResult<usize>
    where
        F: Fn(&Row) -> bool + Send,
    {
        Ok(self.handle().delete_where(&self.table, filter).await?)
    }
}

fn decode<T: DeserializeOwned>(row: &Row) -> RepoResult<T> {
    Ok(serde_json::from_value(row.to_value())?)
}

/// Column changes from a patch struct. `None` fields are left out, and
/// `updated_at` is always bumped.
pub(crate) fn changes_with_timestamp<P: Serialize>(patch: &P) -> RepoResult<BTreeMap<String, Value>> {
    let mut changes: BTreeMap<String, Value> = match serde_json::to_value(patch)? {
        Value::Object(map) => map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
        _ => {
            return Err(RepositoryError::InvalidInput(
                "patch must serialize to an object".to_string(),
            ))
        }
    };
    changes.insert("updated_at".to_string(), serde_json::to_value(chrono::Utc::now())?);
    Ok(changes)
}

/// Parse a caller supplied id into a row key.
pub(crate) fn key_of(id: &str) -> RepoResult<RowKey> {
    Ok(RowKey::new(id)?)
}

/// Id for a new row: the one supplied, or a fresh ULID.
pub(crate) fn new_key(id: Option<&str>) -> RepoResult<RowKey> {
    match id {
        Some(id) => key_of(id),
        None => Ok(RowKey::generate()),
    }
}

/// Filter on a string column.
pub(crate) fn column_eq<'a>(column: &'a str, value: &'a str) -> impl Fn(&Row) -> bool + Send + 'a {
    move |row| row.get_str(column) == Some(value)
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Note {
        id: String,
        text: String,
    }

    #[derive(Serialize)]
    struct NotePatch {
        text: Option<String>,
    }

    #[tokio::test]
    async fn test_generic_crud() {
        let repo = Repository::new(testing::transactions(), "note").unwrap();
        let note = Note {
            id: "n1".into(),
            text: "hello".into(),
        };
        let stored: Note = repo.insert(key_of("n1").unwrap(), &note).await.unwrap();
        assert_eq!(stored, note);

        let err = repo.insert(key_of("n1").unwrap(), &note).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Constraint(_)));

        let changes = changes_with_timestamp(&NotePatch { text: Some("bye".into()) }).unwrap();
        let updated: Note = repo.patch(&key_of("n1").unwrap(), changes).await.unwrap().unwrap();
        assert_eq!(updated.text, "bye");

        let found: Vec<Note> = repo.find_where(column_eq("text", "bye")).await.unwrap();
        assert_eq!(found.len(), 1);

        assert!(repo.remove(&key_of("n1").unwrap()).await.unwrap());
        assert!(repo.find::<Note>(&key_of("n1").unwrap()).await.unwrap().is_none());
    }

    #[test]
    fn test_patch_skips_unset_fields() {
        let changes = changes_with_timestamp(&NotePatch { text: None }).unwrap();
        assert_eq!(changes.len(), 1);
        assert!(changes.contains_key("updated_at"));
    }

    #[test]
    fn test_invalid_id_is_rejected() {
        assert!(matches!(key_of("not an id"), Err(RepositoryError::InvalidInput(_))));
        assert_eq!(new_key(None).unwrap().as_str().len(), 26);
    }
}
