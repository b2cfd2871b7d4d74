use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::repository::error::RepoResult;
use crate::repository::{
    changes_with_timestamp, column_eq, key_of, new_key, AppTransactionManager, Repository,
    CONVERSATION_ACCESS_TABLE, TEAM_ACCESS_TABLE, TEAM_TABLE,
};
use crate::transaction::TransactionOptions;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct NewTeam {
    pub id: Option<String>,
    pub name: String,
}

impl NewTeam {
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

#[derive(Serialize)]
struct TeamPatch<'a> {
    name: &'a str,
}

#[derive(Debug, Clone)]
pub struct TeamRepository {
    teams: Repository,
    team_access: Repository,
    conversation_access: Repository,
}

impl TeamRepository {
    pub fn new(transactions: AppTransactionManager) -> RepoResult<Self> {
        Ok(Self {
            teams: Repository::new(transactions.clone(), TEAM_TABLE)?,
            team_access: Repository::new(transactions.clone(), TEAM_ACCESS_TABLE)?,
            conversation_access: Repository::new(transactions, CONVERSATION_ACCESS_TABLE)?,
        })
    }

    pub async fn create(&self, new: NewTeam) -> RepoResult<Team> {
        let key = new_key(new.id.as_deref())?;
        let now = Utc::now();
        let team = Team {
            id: key.as_str().to_string(),
            name: new.name,
            created_at: now,
            updated_at: now,
        };
        self.teams.insert(key, &team).await
    }

    pub async fn find_by_id(&self, id: &str) -> RepoResult<Option<Team>> {
        self.teams.find(&key_of(id)?).await
    }

    /// Rename a team. `None` if there is no such team.
    pub async fn update(&self, id: &str, name: &str) -> RepoResult<Option<Team>> {
        let changes = changes_with_timestamp(&TeamPatch { name })?;
        self.teams.patch(&key_of(id)?, changes).await
    }

    /// Delete a team with its memberships and conversation accesses.
    pub async fn delete(&self, id: &str) -> RepoResult<bool> {
        let key = key_of(id)?;
        self.teams
            .transactions()
            .with_transaction_opts(TransactionOptions::reuse(), || async {
                self.team_access.remove_where(column_eq("team_id", id)).await?;
                self.conversation_access
                    .remove_where(column_eq("team_id", id))
                    .await?;
                self.teams.remove(&key).await
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::testing;

    #[tokio::test]
    async fn test_team_lifecycle() {
        let repo = TeamRepository::new(testing::transactions()).unwrap();
        let team = repo.create(NewTeam::new("core").with_id("t1")).await.unwrap();
        assert_eq!(repo.find_by_id("t1").await.unwrap(), Some(team));

        let renamed = repo.update("t1", "platform").await.unwrap().unwrap();
        assert_eq!(renamed.name, "platform");
        assert!(repo.update("t2", "nope").await.unwrap().is_none());

        assert!(repo.delete("t1").await.unwrap());
        assert!(repo.find_by_id("t1").await.unwrap().is_none());
    }
}
