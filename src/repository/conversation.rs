use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::repository::error::{RepoResult, RepositoryError};
use crate::repository::{
    changes_with_timestamp, column_eq, key_of, new_key, AppTransactionManager, Repository,
    CONVERSATION_ACCESS_TABLE, CONVERSATION_TABLE, MESSAGE_TABLE, TEAM_TABLE, USER_TABLE,
};
use crate::storage::{Row, RowKey};
use crate::transaction::TransactionOptions;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewConversation {
    pub id: Option<String>,
    pub name: String,
}

impl NewConversation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Who a conversation is shared with: exactly one user or one team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccessTarget {
    User { user_id: String },
    Team { team_id: String },
}

impl AccessTarget {
    pub fn user(id: impl Into<String>) -> Self {
        AccessTarget::User { user_id: id.into() }
    }

    pub fn team(id: impl Into<String>) -> Self {
        AccessTarget::Team { team_id: id.into() }
    }

    pub fn id(&self) -> &str {
        match self {
            AccessTarget::User { user_id } => user_id,
            AccessTarget::Team { team_id } => team_id,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AccessTarget::User { .. } => "user",
            AccessTarget::Team { .. } => "team",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationAccess {
    pub id: String,
    pub conversation_id: String,
    #[serde(flatten)]
    pub target: AccessTarget,
    pub role: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct ConversationPatch<'a> {
    name: &'a str,
}

#[derive(Debug, Clone)]
pub struct ConversationRepository {
    conversations: Repository,
    access: Repository,
    messages: Repository,
    users: Repository,
    teams: Repository,
}

impl ConversationRepository {
    pub fn new(transactions: AppTransactionManager) -> RepoResult<Self> {
        Ok(Self {
            conversations: Repository::new(transactions.clone(), CONVERSATION_TABLE)?,
            access: Repository::new(transactions.clone(), CONVERSATION_ACCESS_TABLE)?,
            messages: Repository::new(transactions.clone(), MESSAGE_TABLE)?,
            users: Repository::new(transactions.clone(), USER_TABLE)?,
            teams: Repository::new(transactions, TEAM_TABLE)?,
        })
    }

    pub async fn create(&self, new: NewConversation) -> RepoResult<Conversation> {
        let key = new_key(new.id.as_deref())?;
        let now = Utc::now();
        let conversation = Conversation {
            id: key.as_str().to_string(),
            name: new.name,
            created_at: now,
            updated_at: now,
        };
        self.conversations.insert(key, &conversation).await
    }

    pub async fn find_by_id(&self, id: &str) -> RepoResult<Option<Conversation>> {
        self.conversations.find(&key_of(id)?).await
    }

    pub async fn update(&self, id: &str, name: &str) -> RepoResult<Option<Conversation>> {
        let changes = changes_with_timestamp(&ConversationPatch { name })?;
        self.conversations.patch(&key_of(id)?, changes).await
    }

    /// Delete a conversation with its messages and accesses.
    pub async fn delete(&self, id: &str) -> RepoResult<bool> {
        let key = key_of(id)?;
        self.conversations
            .transactions()
            .with_transaction_opts(TransactionOptions::reuse(), || async {
                self.messages
                    .remove_where(column_eq("conversation_id", id))
                    .await?;
                self.access
                    .remove_where(column_eq("conversation_id", id))
                    .await?;
                self.conversations.remove(&key).await
            })
            .await
    }

    /// Share a conversation with a user or a team.
    ///
    /// The conversation and the target must exist, and a target can hold
    /// only one access per conversation.
    pub async fn add_access(
        &self,
        conversation_id: &str,
        target: AccessTarget,
        role: Option<&str>,
    ) -> RepoResult<ConversationAccess> {
        if !self.conversations.exists(&key_of(conversation_id)?).await? {
            return Err(RepositoryError::Constraint(format!(
                "conversation {conversation_id} does not exist"
            )));
        }
        let target_repo = match target {
            AccessTarget::User { .. } => &self.users,
            AccessTarget::Team { .. } => &self.teams,
        };
        if !target_repo.exists(&key_of(target.id())?).await? {
            return Err(RepositoryError::Constraint(format!(
                "{} {} does not exist",
                target.kind(),
                target.id()
            )));
        }

        let now = Utc::now();
        let access = ConversationAccess {
            id: RowKey::generate().into_string(),
            conversation_id: conversation_id.to_string(),
            target,
            role: role.map(str::to_string),
            created_at: now,
            updated_at: now,
        };
        let key = access_key(conversation_id, &access.target)?;
        self.access.insert(key, &access).await
    }

    /// Remove whatever access `participant_id` has, as a user or as a team.
    pub async fn remove_access(&self, conversation_id: &str, participant_id: &str) -> RepoResult<bool> {
        let removed = self
            .access
            .remove_where(|row: &Row| {
                row.get_str("conversation_id") == Some(conversation_id)
                    && (row.get_str("user_id") == Some(participant_id)
                        || row.get_str("team_id") == Some(participant_id))
            })
            .await?;
        Ok(removed > 0)
    }

    pub async fn find_accesses(&self, conversation_id: &str) -> RepoResult<Vec<ConversationAccess>> {
        self.access
            .find_where(column_eq("conversation_id", conversation_id))
            .await
    }
}

fn access_key(conversation_id: &str, target: &AccessTarget) -> RepoResult<RowKey> {
    Ok(RowKey::composite(
        conversation_id,
        &format!("{}-{}", target.kind(), target.id()),
    )?)
}
