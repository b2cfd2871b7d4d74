//! Identity and access: users, teams and memberships.

use std::fmt;

use tracing::debug;

use crate::repository::{
    AppTransactionManager, NewTeam, NewUser, RepoResult, RepositoryError, Team, TeamAccess,
    TeamAccessRepository, TeamRepository, User, UserPatch, UserRepository,
};
use crate::transaction::TransactionOptions;

#[derive(Debug, Clone)]
pub struct UserFacade {
    repo: UserRepository,
}

impl UserFacade {
    pub fn new(repo: UserRepository) -> Self {
        Self { repo }
    }

    pub async fn create(&self, new: NewUser) -> RepoResult<User> {
        self.repo.create(new).await
    }

    pub async fn find_by_id(&self, id: &str) -> RepoResult<Option<User>> {
        self.repo.find_by_id(id).await
    }

    pub async fn find_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        self.repo.find_by_email(email).await
    }

    pub async fn update(&self, id: &str, patch: UserPatch) -> RepoResult<Option<User>> {
        self.repo.update(id, patch).await
    }

    pub async fn delete(&self, id: &str) -> RepoResult<bool> {
        self.repo.delete(id).await
    }
}

#[derive(Debug, Clone)]
pub struct TeamFacade {
    repo: TeamRepository,
}

impl TeamFacade {
    pub fn new(repo: TeamRepository) -> Self {
        Self { repo }
    }

    pub async fn create(&self, new: NewTeam) -> RepoResult<Team> {
        self.repo.create(new).await
    }

    pub async fn find_by_id(&self, id: &str) -> RepoResult<Option<Team>> {
        self.repo.find_by_id(id).await
    }

    pub async fn rename(&self, id: &str, name: &str) -> RepoResult<Option<Team>> {
        self.repo.update(id, name).await
    }

    pub async fn delete(&self, id: &str) -> RepoResult<bool> {
        self.repo.delete(id).await
    }
}

#[derive(Debug, Clone)]
pub struct TeamAccessFacade {
    repo: TeamAccessRepository,
}

impl TeamAccessFacade {
    pub fn new(repo: TeamAccessRepository) -> Self {
        Self { repo }
    }

    pub async fn add_user_to_team(
        &self,
        user_id: &str,
        team_id: &str,
        role: Option<&str>,
    ) -> RepoResult<TeamAccess> {
        self.repo.add_user_to_team(user_id, team_id, role).await
    }

    pub async fn remove_user_from_team(&self, user_id: &str, team_id: &str) -> RepoResult<bool> {
        self.repo.remove_user_from_team(user_id, team_id).await
    }

    pub async fn find_by_user_and_team(
        &self,
        user_id: &str,
        team_id: &str,
    ) -> RepoResult<Option<TeamAccess>> {
        self.repo.find_by_user_and_team(user_id, team_id).await
    }

    pub async fn find_teams_by_user_id(&self, user_id: &str) -> RepoResult<Vec<TeamAccess>> {
        self.repo.find_teams_by_user_id(user_id).await
    }

    pub async fn find_users_by_team_id(&self, team_id: &str) -> RepoResult<Vec<TeamAccess>> {
        self.repo.find_users_by_team_id(team_id).await
    }

    pub async fn set_role(
        &self,
        user_id: &str,
        team_id: &str,
        role: Option<&str>,
    ) -> RepoResult<Option<TeamAccess>> {
        self.repo.set_role(user_id, team_id, role).await
    }
}

/// Profile fields as handed over by an identity provider.
#[derive(Debug, Clone, Default)]
pub struct IdentityProfile {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

/// An authenticated identity to mirror into the user table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub email: String,
    pub name: String,
}

impl VerifiedIdentity {
    pub fn new(email: impl Into<String>, name: impl Into<String>) -> RepoResult<Self> {
        let email = email.into().trim().to_string();
        if email.is_empty() {
            return Err(RepositoryError::InvalidInput("identity has no email".to_string()));
        }
        Ok(Self {
            email,
            name: name.into(),
        })
    }

    /// Derive the display name from the profile: first and last name, else
    /// the username, else the email itself.
    pub fn from_profile(profile: &IdentityProfile) -> RepoResult<Self> {
        let email = profile.email.as_deref().unwrap_or_default().trim();
        if email.is_empty() {
            return Err(RepositoryError::InvalidInput("identity has no email".to_string()));
        }

        let full_name = [&profile.first_name, &profile.last_name]
            .into_iter()
            .flatten()
            .map(|part| part.trim())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let name = if !full_name.is_empty() {
            full_name
        } else {
            match profile.username.as_deref().map(str::trim) {
                Some(username) if !username.is_empty() => username.to_string(),
                _ => email.to_string(),
            }
        };

        Self::new(email, name)
    }
}

/// What [`IamFacade::sync_identity`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Updated,
    Unchanged,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncOutcome::Created => write!(f, "created"),
            SyncOutcome::Updated => write!(f, "updated"),
            SyncOutcome::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Groups the identity facades.
#[derive(Debug, Clone)]
pub struct IamFacade {
    pub users: UserFacade,
    pub teams: TeamFacade,
    pub team_access: TeamAccessFacade,
    transactions: AppTransactionManager,
}

impl IamFacade {
    pub fn new(
        users: UserFacade,
        teams: TeamFacade,
        team_access: TeamAccessFacade,
        transactions: AppTransactionManager,
    ) -> Self {
        Self {
            users,
            teams,
            team_access,
            transactions,
        }
    }

    /// Make sure a user exists for `identity` and carries its current name.
    ///
    /// Users are matched by email. Runs in the caller's transaction if there
    /// is one, otherwise in its own.
    pub async fn sync_identity(&self, identity: VerifiedIdentity) -> RepoResult<(SyncOutcome, User)> {
        let (outcome, user) = self
            .transactions
            .with_transaction_opts(TransactionOptions::reuse(), || self.upsert_identity(&identity))
            .await?;

        debug!(email = %user.email, user_id = %user.id, %outcome, "identity synced");
        Ok((outcome, user))
    }

    async fn upsert_identity(&self, identity: &VerifiedIdentity) -> RepoResult<(SyncOutcome, User)> {
        match self.users.find_by_email(&identity.email).await? {
            None => {
                let new = NewUser::new(identity.email.clone(), identity.name.clone());
                Ok((SyncOutcome::Created, self.users.create(new).await?))
            }
            Some(existing) if existing.name != identity.name => {
                let patch = UserPatch {
                    email: None,
                    name: Some(identity.name.clone()),
                };
                let updated = self.users.update(&existing.id, patch).await?.ok_or_else(|| {
                    RepositoryError::Constraint(format!("user {} disappeared during sync", existing.id))
                })?;
                Ok((SyncOutcome::Updated, updated))
            }
            Some(existing) => Ok((SyncOutcome::Unchanged, existing)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::testing;

    fn facade() -> IamFacade {
        let transactions = testing::transactions();
        IamFacade::new(
            UserFacade::new(UserRepository::new(transactions.clone()).unwrap()),
            TeamFacade::new(TeamRepository::new(transactions.clone()).unwrap()),
            TeamAccessFacade::new(TeamAccessRepository::new(transactions.clone()).unwrap()),
            transactions,
        )
    }

    fn profile(email: &str, first: Option<&str>, last: Option<&str>, username: Option<&str>) -> IdentityProfile {
        IdentityProfile {
            email: Some(email.to_string()),
            first_name: first.map(str::to_string),
            last_name: last.map(str::to_string),
            username: username.map(str::to_string),
        }
    }

    #[test]
    fn test_name_fallbacks() {
        let full = VerifiedIdentity::from_profile(&profile("a@x.io", Some("Ada"), Some("Lovelace"), Some("ada"))).unwrap();
        assert_eq!(full.name, "Ada Lovelace");

        let first_only = VerifiedIdentity::from_profile(&profile("a@x.io", Some("Ada"), None, None)).unwrap();
        assert_eq!(first_only.name, "Ada");

        let username = VerifiedIdentity::from_profile(&profile("a@x.io", Some(" "), None, Some("ada"))).unwrap();
        assert_eq!(username.name, "ada");

        let email = VerifiedIdentity::from_profile(&profile("a@x.io", None, None, None)).unwrap();
        assert_eq!(email.name, "a@x.io");

        assert!(VerifiedIdentity::from_profile(&IdentityProfile::default()).is_err());
    }

    #[tokio::test]
    async fn test_sync_identity() {
        let iam = facade();

        let (outcome, created) = iam
            .sync_identity(VerifiedIdentity::new("ada@example.com", "Ada").unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Created);

        let (outcome, same) = iam
            .sync_identity(VerifiedIdentity::new("ada@example.com", "Ada").unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Unchanged);
        assert_eq!(same.id, created.id);

        let (outcome, renamed) = iam
            .sync_identity(VerifiedIdentity::new("ada@example.com", "Ada Lovelace").unwrap())
            .await
            .unwrap();
        assert_eq!(outcome, SyncOutcome::Updated);
        assert_eq!(renamed.id, created.id);
        assert_eq!(renamed.name, "Ada Lovelace");
    }

    #[tokio::test]
    async fn test_add_user_to_team_then_find() {
        let iam = facade();
        iam.users
            .create(NewUser::new("u1@example.com", "U1").with_id("u1"))
            .await
            .unwrap();
        iam.teams.create(NewTeam::new("T1").with_id("t1")).await.unwrap();

        iam.team_access
            .add_user_to_team("u1", "t1", Some("member"))
            .await
            .unwrap();
        let access = iam
            .team_access
            .find_by_user_and_team("u1", "t1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(access.role.as_deref(), Some("member"));
    }

    #[tokio::test]
    async fn test_deleting_user_or_team_cascades_memberships() {
        let iam = facade();
        for id in ["u1", "u2"] {
            iam.users
                .create(NewUser::new(format!("{id}@example.com"), id).with_id(id))
                .await
                .unwrap();
        }
        iam.teams.create(NewTeam::new("T1").with_id("t1")).await.unwrap();
        iam.team_access.add_user_to_team("u1", "t1", None).await.unwrap();
        iam.team_access.add_user_to_team("u2", "t1", None).await.unwrap();

        assert!(iam.users.delete("u1").await.unwrap());
        assert!(iam.team_access.find_teams_by_user_id("u1").await.unwrap().is_empty());
        assert_eq!(iam.team_access.find_users_by_team_id("t1").await.unwrap().len(), 1);

        assert!(iam.teams.delete("t1").await.unwrap());
        assert!(iam.team_access.find_users_by_team_id("t1").await.unwrap().is_empty());
    }
}
