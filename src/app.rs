//! Composition root: builds the provider, the transaction manager, the
//! repositories and the facades, and tears them down again.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::db::{ConfigError, ConnectionProvider, DatabaseConfig, DatabaseStats};
use crate::facade::{
    ConversationFacade, IamFacade, TeamAccessFacade, TeamFacade, UserFacade,
};
use crate::repository::{
    AppTransactionManager, ConversationRepository, MessageRepository, RepositoryError,
    TeamAccessRepository, TeamRepository, UserRepository,
};
use crate::storage::StorageError;
use crate::transaction::TransactionManager;

/// Result type for application setup and teardown.
pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// The wired application backend.
#[derive(Debug)]
pub struct Backend {
    pub iam: IamFacade,
    pub conversations: ConversationFacade,
    transactions: AppTransactionManager,
    provider: ConnectionProvider,
}

impl Backend {
    /// Open the database and wire everything on top of it.
    pub fn bootstrap(config: DatabaseConfig) -> AppResult<Self> {
        let isolation = config.isolation;
        let provider = ConnectionProvider::open(config)?;
        let transactions =
            TransactionManager::new(Arc::new(provider.clone())).with_default_isolation(isolation);

        let iam = IamFacade::new(
            UserFacade::new(UserRepository::new(transactions.clone())?),
            TeamFacade::new(TeamRepository::new(transactions.clone())?),
            TeamAccessFacade::new(TeamAccessRepository::new(transactions.clone())?),
            transactions.clone(),
        );
        let conversations = ConversationFacade::new(
            ConversationRepository::new(transactions.clone())?,
            MessageRepository::new(transactions.clone())?,
            transactions.clone(),
        );

        info!("backend ready");
        Ok(Self {
            iam,
            conversations,
            transactions,
            provider,
        })
    }

    /// Load the configuration from the environment, then bootstrap.
    pub fn from_env() -> AppResult<Self> {
        Self::bootstrap(DatabaseConfig::from_env()?)
    }

    pub fn transactions(&self) -> &AppTransactionManager {
        &self.transactions
    }

    pub fn provider(&self) -> &ConnectionProvider {
        &self.provider
    }

    pub async fn is_healthy(&self) -> bool {
        self.provider.is_healthy().await
    }

    pub fn stats(&self) -> DatabaseStats {
        self.provider.stats()
    }

    /// Release the facades and shut the provider down, in that order.
    pub fn close(self) -> AppResult<()> {
        let Backend {
            iam,
            conversations,
            transactions,
            provider,
        } = self;
        drop(iam);
        drop(conversations);
        drop(transactions);

        provider.shutdown()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tempfile::TempDir;

    use crate::db::DatabaseUrl;
    use crate::facade::VerifiedIdentity;
    use crate::repository::{NewConversation, NewMessage, NewTeam, NewUser, RepoResult};
    use crate::transaction::TransactionOptions;

    fn backend() -> Backend {
        Backend::bootstrap(DatabaseConfig::in_memory()).unwrap()
    }

    #[tokio::test]
    async fn test_failure_rolls_back_conversation_and_message() {
        let backend = backend();
        let (_, user) = backend
            .iam
            .sync_identity(VerifiedIdentity::new("ada@example.com", "Ada").unwrap())
            .await
            .unwrap();

        let conversation_id = "c-doomed";
        let result: RepoResult<()> = backend
            .transactions()
            .with_transaction(|| async {
                backend
                    .conversations
                    .create_conversation(NewConversation::new("doomed").with_id(conversation_id))
                    .await?;
                backend
                    .conversations
                    .create_message(NewMessage::from_user(conversation_id, &user.id, "hi"))
                    .await?;
                Err(RepositoryError::InvalidInput("injected failure".into()))
            })
            .await;

        assert!(matches!(result, Err(RepositoryError::InvalidInput(_))));
        assert!(backend
            .conversations
            .find_conversation_by_id(conversation_id)
            .await
            .unwrap()
            .is_none());
        assert_eq!(backend.stats().active_transactions, 0);
    }

    #[tokio::test]
    async fn test_add_user_to_team_then_find() {
        let backend = backend();
        backend
            .iam
            .users
            .create(NewUser::new("u1@example.com", "U1").with_id("u1"))
            .await
            .unwrap();
        backend.iam.teams.create(NewTeam::new("T1").with_id("t1")).await.unwrap();

        backend
            .iam
            .team_access
            .add_user_to_team("u1", "t1", Some("member"))
            .await
            .unwrap();
        let access = backend
            .iam
            .team_access
            .find_by_user_and_team("u1", "t1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(access.role.as_deref(), Some("member"));
    }

    #[tokio::test]
    async fn test_reused_transaction_is_shared_by_facades() {
        let backend = backend();
        let result: RepoResult<()> = backend
            .transactions()
            .with_transaction(|| async {
                let (_, user) = backend
                    .iam
                    .sync_identity(VerifiedIdentity::new("bob@example.com", "Bob").unwrap())
                    .await?;
                backend
                    .conversations
                    .start_conversation(&user.id, "general", "hi")
                    .await?;
                assert_eq!(backend.stats().active_transactions, 1);
                Err(RepositoryError::InvalidInput("abort".into()))
            })
            .await;
        assert!(result.is_err());

        assert!(backend
            .iam
            .users
            .find_by_email("bob@example.com")
            .await
            .unwrap()
            .is_none());
        assert_eq!(backend.stats().store.total_rows, 0);
    }

    #[tokio::test]
    async fn test_concurrent_units_are_isolated() {
        let backend = Arc::new(backend());

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let backend = backend.clone();
                tokio::spawn(async move {
                    backend
                        .transactions()
                        .with_transaction_opts(TransactionOptions::default(), || async {
                            let email = format!("user{i}@example.com");
                            let (_, user) = backend
                                .iam
                                .sync_identity(VerifiedIdentity::new(email, format!("User {i}"))?)
                                .await?;
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            let tx_id = backend.transactions().transaction_id();
                            Ok::<_, RepositoryError>((user.id, tx_id))
                        })
                        .await
                })
            })
            .collect();

        let mut tx_ids = Vec::new();
        for task in tasks {
            let (_, tx_id) = task.await.unwrap().unwrap();
            tx_ids.push(tx_id.unwrap());
        }
        tx_ids.sort_by_key(|id| id.to_string());
        tx_ids.dedup();
        assert_eq!(tx_ids.len(), 8);
        assert_eq!(backend.stats().store.total_rows, 8);
    }

    #[tokio::test]
    async fn test_close_flushes_file_database() {
        let dir = TempDir::new().unwrap();
        let url = DatabaseUrl::File(dir.path().join("chat.json"));

        let backend = Backend::bootstrap(DatabaseConfig::new(url.clone())).unwrap();
        assert!(backend.is_healthy().await);
        backend
            .iam
            .users
            .create(NewUser::new("ada@example.com", "Ada"))
            .await
            .unwrap();
        backend.close().unwrap();

        let reopened = Backend::bootstrap(DatabaseConfig::new(url)).unwrap();
        assert!(reopened
            .iam
            .users
            .find_by_email("ada@example.com")
            .await
            .unwrap()
            .is_some());
    }
}
