use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::repository::error::{RepoResult, RepositoryError};
use crate::repository::{
    column_eq, key_of, AppTransactionManager, Repository, TEAM_ACCESS_TABLE, TEAM_TABLE, USER_TABLE,
};
use crate::storage::RowKey;

/// Membership of a user in a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamAccess {
    pub user_id: String,
    pub team_id: String,
    pub role: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Memberships are keyed by `(user_id, team_id)`.
#[derive(Debug, Clone)]
pub struct TeamAccessRepository {
    access: Repository,
    users: Repository,
    teams: Repository,
}

impl TeamAccessRepository {
    pub fn new(transactions: AppTransactionManager) -> RepoResult<Self> {
        Ok(Self {
            access: Repository::new(transactions.clone(), TEAM_ACCESS_TABLE)?,
            users: Repository::new(transactions.clone(), USER_TABLE)?,
            teams: Repository::new(transactions, TEAM_TABLE)?,
        })
    }

    /// Add a user to a team. Both must exist and the user must not be a
    /// member already.
    pub async fn add_user_to_team(
        &self,
        user_id: &str,
        team_id: &str,
        role: Option<&str>,
    ) -> RepoResult<TeamAccess> {
        if !self.users.exists(&key_of(user_id)?).await? {
            return Err(RepositoryError::Constraint(format!("user {user_id} does not exist")));
        }
        if !self.teams.exists(&key_of(team_id)?).await? {
            return Err(RepositoryError::Constraint(format!("team {team_id} does not exist")));
        }

        let access = TeamAccess {
            user_id: user_id.to_string(),
            team_id: team_id.to_string(),
            role: role.map(str::to_string),
            created_at: Utc::now(),
        };
        self.access.insert(membership_key(user_id, team_id)?, &access).await
    }

    pub async fn remove_user_from_team(&self, user_id: &str, team_id: &str) -> RepoResult<bool> {
        self.access.remove(&membership_key(user_id, team_id)?).await
    }

    pub async fn find_by_user_and_team(
        &self,
        user_id: &str,
        team_id: &str,
    ) -> RepoResult<Option<TeamAccess>> {
        self.access.find(&membership_key(user_id, team_id)?).await
    }

    pub async fn find_teams_by_user_id(&self, user_id: &str) -> RepoResult<Vec<TeamAccess>> {
        self.access.find_where(column_eq("user_id", user_id)).await
    }

    pub async fn find_users_by_team_id(&self, team_id: &str) -> RepoResult<Vec<TeamAccess>> {
        self.access.find_where(column_eq("team_id", team_id)).await
    }

    /// Set or clear a member's role. `None` if the user is not a member.
    pub async fn set_role(
        &self,
        user_id: &str,
        team_id: &str,
        role: Option<&str>,
    ) -> RepoResult<Option<TeamAccess>> {
        let mut changes = BTreeMap::new();
        changes.insert(
            "role".to_string(),
            role.map_or(Value::Null, |r| Value::String(r.to_string())),
        );
        self.access
            .patch(&membership_key(user_id, team_id)?, changes)
            .await
    }
}

fn membership_key(user_id: &str, team_id: &str) -> RepoResult<RowKey> {
    Ok(RowKey::composite(user_id, team_id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{testing, NewTeam, NewUser, TeamRepository, UserRepository};

    async fn setup() -> TeamAccessRepository {
        let transactions = testing::transactions();
        let users = UserRepository::new(transactions.clone()).unwrap();
        let teams = TeamRepository::new(transactions.clone()).unwrap();
        for (id, email) in [("u1", "u1@example.com"), ("u2", "u2@example.com")] {
            users.create(NewUser::new(email, id).with_id(id)).await.unwrap();
        }
        for id in ["t1", "t2"] {
            teams.create(NewTeam::new(id).with_id(id)).await.unwrap();
        }
        TeamAccessRepository::new(transactions).unwrap()
    }

    #[tokio::test]
    async fn test_add_then_find_returns_role() {
        let repo = setup().await;
        repo.add_user_to_team("u1", "t1", Some("member")).await.unwrap();

        let access = repo.find_by_user_and_team("u1", "t1").await.unwrap().unwrap();
        assert_eq!(access.role.as_deref(), Some("member"));
        assert!(repo.find_by_user_and_team("u1", "t2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_membership_is_unique() {
        let repo = setup().await;
        repo.add_user_to_team("u1", "t1", None).await.unwrap();
        let err = repo.add_user_to_team("u1", "t1", Some("admin")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_references_must_exist() {
        let repo = setup().await;
        let err = repo.add_user_to_team("ghost", "t1", None).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Constraint(_)));
        let err = repo.add_user_to_team("u1", "ghost", None).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_listing_and_roles() {
        let repo = setup().await;
        repo.add_user_to_team("u1", "t1", Some("owner")).await.unwrap();
        repo.add_user_to_team("u1", "t2", None).await.unwrap();
        repo.add_user_to_team("u2", "t1", None).await.unwrap();

        let teams: Vec<String> = repo
            .find_teams_by_user_id("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.team_id)
            .collect();
        assert_eq!(teams, vec!["t1", "t2"]);
        assert_eq!(repo.find_users_by_team_id("t1").await.unwrap().len(), 2);

        let cleared = repo.set_role("u1", "t1", None).await.unwrap().unwrap();
        assert_eq!(cleared.role, None);
        assert!(repo.set_role("u2", "t2", Some("x")).await.unwrap().is_none());

        assert!(repo.remove_user_from_team("u2", "t1").await.unwrap());
        assert!(!repo.remove_user_from_team("u2", "t1").await.unwrap());
    }
}
