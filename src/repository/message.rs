use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::repository::error::{RepoResult, RepositoryError};
use crate::repository::{
    changes_with_timestamp, column_eq, key_of, new_key, AppTransactionManager, Repository,
    CONVERSATION_TABLE, MESSAGE_TABLE, USER_TABLE,
};

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// A human; the message carries their user id.
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(RepositoryError::InvalidInput(format!(
                "unknown message role: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    /// Set iff `role` is [`MessageRole::User`].
    pub user_id: Option<String>,
    pub content: String,
    pub role: MessageRole,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Option<String>,
    pub conversation_id: String,
    pub user_id: Option<String>,
    pub content: String,
    pub role: MessageRole,
    /// Defaults to `"text"`.
    pub kind: Option<String>,
}

impl NewMessage {
    /// A message written by a user.
    pub fn from_user(
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            conversation_id: conversation_id.into(),
            user_id: Some(user_id.into()),
            content: content.into(),
            role: MessageRole::User,
            kind: None,
        }
    }

    /// An assistant or system message.
    pub fn from_agent(
        conversation_id: impl Into<String>,
        role: MessageRole,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            conversation_id: conversation_id.into(),
            user_id: None,
            content: content.into(),
            role,
            kind: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Paging for [`MessageRepository::find_by_conversation_id`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageQuery {
    pub limit: usize,
    pub offset: usize,
    pub sort: SortOrder,
}

impl Default for MessageQuery {
    fn default() -> Self {
        Self {
            limit: 10,
            offset: 0,
            sort: SortOrder::Asc,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MessagePatch {
    pub content: Option<String>,
    pub kind: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MessageRepository {
    messages: Repository,
    conversations: Repository,
    users: Repository,
}

impl MessageRepository {
    pub const DEFAULT_KIND: &'static str = "text";

    pub fn new(transactions: AppTransactionManager) -> RepoResult<Self> {
        Ok(Self {
            messages: Repository::new(transactions.clone(), MESSAGE_TABLE)?,
            conversations: Repository::new(transactions.clone(), CONVERSATION_TABLE)?,
            users: Repository::new(transactions, USER_TABLE)?,
        })
    }

    /// Create a message in an existing conversation.
    pub async fn create(&self, new: NewMessage) -> RepoResult<Message> {
        match (new.role, &new.user_id) {
            (MessageRole::User, None) => {
                return Err(RepositoryError::Constraint(
                    "user messages must carry a user id".to_string(),
                ))
            }
            (MessageRole::Assistant | MessageRole::System, Some(_)) => {
                return Err(RepositoryError::Constraint(format!(
                    "{} messages must not carry a user id",
                    new.role
                )))
            }
            _ => {}
        }

        if !self.conversations.exists(&key_of(&new.conversation_id)?).await? {
            return Err(RepositoryError::Constraint(format!(
                "conversation {} does not exist",
                new.conversation_id
            )));
        }
        if let Some(user_id) = &new.user_id {
            if !self.users.exists(&key_of(user_id)?).await? {
                return Err(RepositoryError::Constraint(format!("user {user_id} does not exist")));
            }
        }

        let key = new_key(new.id.as_deref())?;
        let now = Utc::now();
        let message = Message {
            id: key.as_str().to_string(),
            conversation_id: new.conversation_id,
            user_id: new.user_id,
            content: new.content,
            role: new.role,
            kind: new.kind.unwrap_or_else(|| Self::DEFAULT_KIND.to_string()),
            created_at: now,
            updated_at: now,
        };
        self.messages.insert(key, &message).await
    }

    pub async fn find_by_id(&self, id: &str) -> RepoResult<Option<Message>> {
        self.messages.find(&key_of(id)?).await
    }

    pub async fn update(&self, id: &str, patch: MessagePatch) -> RepoResult<Option<Message>> {
        let changes = changes_with_timestamp(&patch)?;
        self.messages.patch(&key_of(id)?, changes).await
    }

    pub async fn delete(&self, id: &str) -> RepoResult<bool> {
        self.messages.remove(&key_of(id)?).await
    }

    /// One page of a conversation's messages, ordered by creation time.
    pub async fn find_by_conversation_id(
        &self,
        conversation_id: &str,
        query: MessageQuery,
    ) -> RepoResult<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .messages
            .find_where(column_eq("conversation_id", conversation_id))
            .await?;

        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if query.sort == SortOrder::Desc {
            messages.reverse();
        }

        Ok(messages
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect())
    }
}
