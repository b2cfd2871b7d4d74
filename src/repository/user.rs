use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::repository::error::{RepoResult, RepositoryError};
use crate::repository::{
    changes_with_timestamp, column_eq, key_of, new_key, AppTransactionManager, Repository,
    CONVERSATION_ACCESS_TABLE, MESSAGE_TABLE, TEAM_ACCESS_TABLE, USER_TABLE,
};
use crate::transaction::TransactionOptions;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    /// Generated when not given.
    pub id: Option<String>,
    pub email: String,
    pub name: String,
}

impl NewUser {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: None,
            email: email.into(),
            name: name.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UserPatch {
    pub email: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct UserRepository {
    users: Repository,
    team_access: Repository,
    conversation_access: Repository,
    messages: Repository,
}

impl UserRepository {
    pub fn new(transactions: AppTransactionManager) -> RepoResult<Self> {
        Ok(Self {
            users: Repository::new(transactions.clone(), USER_TABLE)?,
            team_access: Repository::new(transactions.clone(), TEAM_ACCESS_TABLE)?,
            conversation_access: Repository::new(transactions.clone(), CONVERSATION_ACCESS_TABLE)?,
            messages: Repository::new(transactions, MESSAGE_TABLE)?,
        })
    }

    /// Create a user. The email must not be in use.
    pub async fn create(&self, new: NewUser) -> RepoResult<User> {
        if new.email.trim().is_empty() {
            return Err(RepositoryError::InvalidInput("email must not be empty".to_string()));
        }
        self.ensure_email_free(&new.email, None).await?;

        let key = new_key(new.id.as_deref())?;
        let now = Utc::now();
        let user = User {
            id: key.as_str().to_string(),
            email: new.email,
            name: new.name,
            created_at: now,
            updated_at: now,
        };
        self.users.insert(key, &user).await
    }

    pub async fn find_by_id(&self, id: &str) -> RepoResult<Option<User>> {
        self.users.find(&key_of(id)?).await
    }

    pub async fn find_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let mut found: Vec<User> = self.users.find_where(column_eq("email", email)).await?;
        Ok(found.pop())
    }

    /// Apply `patch`, bumping `updated_at`. `None` if there is no such user.
    pub async fn update(&self, id: &str, patch: UserPatch) -> RepoResult<Option<User>> {
        if let Some(email) = &patch.email {
            self.ensure_email_free(email, Some(id)).await?;
        }
        let changes = changes_with_timestamp(&patch)?;
        self.users.patch(&key_of(id)?, changes).await
    }

    /// Delete a user with their team memberships, conversation accesses and
    /// messages. `true` iff the user existed.
    pub async fn delete(&self, id: &str) -> RepoResult<bool> {
        let key = key_of(id)?;
        self.users
            .transactions()
            .with_transaction_opts(TransactionOptions::reuse(), || async {
                self.team_access.remove_where(column_eq("user_id", id)).await?;
                self.conversation_access
                    .remove_where(column_eq("user_id", id))
                    .await?;
                self.messages.remove_where(column_eq("user_id", id)).await?;
                self.users.remove(&key).await
            })
            .await
    }

    async fn ensure_email_free(&self, email: &str, owner: Option<&str>) -> RepoResult<()> {
        match self.find_by_email(email).await? {
            Some(existing) if Some(existing.id.as_str()) != owner => Err(RepositoryError::Constraint(
                format!("email {email} is already in use"),
            )),
            _ => Ok(()),
        }
    }
}
