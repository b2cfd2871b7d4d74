//! Conversations, their messages and who they are shared with.

use tracing::info;

use crate::repository::{
    AccessTarget, AppTransactionManager, Conversation, ConversationAccess, ConversationRepository,
    Message, MessagePatch, MessageQuery, MessageRepository, NewConversation, NewMessage, RepoResult,
};
use crate::transaction::TransactionOptions;

/// Access role given to users added to a conversation.
pub const USER_ACCESS_ROLE: &str = "user";
/// Access role given to teams added to a conversation.
pub const TEAM_ACCESS_ROLE: &str = "team";

#[derive(Debug, Clone)]
pub struct ConversationFacade {
    conversations: ConversationRepository,
    messages: MessageRepository,
    transactions: AppTransactionManager,
}

impl ConversationFacade {
    pub fn new(
        conversations: ConversationRepository,
        messages: MessageRepository,
        transactions: AppTransactionManager,
    ) -> Self {
        Self {
            conversations,
            messages,
            transactions,
        }
    }

    pub async fn create_conversation(&self, new: NewConversation) -> RepoResult<Conversation> {
        self.conversations.create(new).await
    }

    pub async fn find_conversation_by_id(&self, id: &str) -> RepoResult<Option<Conversation>> {
        self.conversations.find_by_id(id).await
    }

    pub async fn rename_conversation(&self, id: &str, name: &str) -> RepoResult<Option<Conversation>> {
        self.conversations.update(id, name).await
    }

    /// Delete a conversation together with its messages and accesses.
    pub async fn delete_conversation(&self, id: &str) -> RepoResult<bool> {
        self.conversations.delete(id).await
    }

    /// Create a conversation owned by `owner_id` with its first message.
    ///
    /// All three rows are written atomically; the start is logged once the
    /// transaction has committed.
    pub async fn start_conversation(
        &self,
        owner_id: &str,
        name: &str,
        first_message: &str,
    ) -> RepoResult<(Conversation, Message)> {
        self.transactions
            .with_transaction_opts(TransactionOptions::reuse(), || async {
                let conversation = self
                    .conversations
                    .create(NewConversation::new(name))
                    .await?;
                self.conversations
                    .add_access(&conversation.id, AccessTarget::user(owner_id), Some(USER_ACCESS_ROLE))
                    .await?;
                let message = self
                    .messages
                    .create(NewMessage::from_user(&conversation.id, owner_id, first_message))
                    .await?;

                let conversation_id = conversation.id.clone();
                let owner_id = owner_id.to_string();
                self.transactions.on_after_transaction_commit(move || async move {
                    info!(%conversation_id, %owner_id, "conversation started");
                    Ok(())
                })?;

                Ok((conversation, message))
            })
            .await
    }

    pub async fn find_messages_by_conversation_id(
        &self,
        conversation_id: &str,
        query: MessageQuery,
    ) -> RepoResult<Vec<Message>> {
        self.messages
            .find_by_conversation_id(conversation_id, query)
            .await
    }

    pub async fn find_message_by_id(&self, id: &str) -> RepoResult<Option<Message>> {
        self.messages.find_by_id(id).await
    }

    pub async fn create_message(&self, new: NewMessage) -> RepoResult<Message> {
        self.messages.create(new).await
    }

    pub async fn update_message(&self, id: &str, patch: MessagePatch) -> RepoResult<Option<Message>> {
        self.messages.update(id, patch).await
    }

    pub async fn delete_message(&self, id: &str) -> RepoResult<bool> {
        self.messages.delete(id).await
    }

    pub async fn add_user_to_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> RepoResult<ConversationAccess> {
        self.conversations
            .add_access(conversation_id, AccessTarget::user(user_id), Some(USER_ACCESS_ROLE))
            .await
    }

    pub async fn remove_user_from_conversation(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> RepoResult<bool> {
        self.conversations
            .remove_access(conversation_id, user_id)
            .await
    }

    pub async fn add_team_to_conversation(
        &self,
        conversation_id: &str,
        team_id: &str,
    ) -> RepoResult<ConversationAccess> {
        self.conversations
            .add_access(conversation_id, AccessTarget::team(team_id), Some(TEAM_ACCESS_ROLE))
            .await
    }

    pub async fn remove_team_from_conversation(
        &self,
        conversation_id: &str,
        team_id: &str,
    ) -> RepoResult<bool> {
        self.conversations
            .remove_access(conversation_id, team_id)
            .await
    }

    pub async fn find_accesses(&self, conversation_id: &str) -> RepoResult<Vec<ConversationAccess>> {
        self.conversations.find_accesses(conversation_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{testing, MessageRole, NewUser, RepositoryError, UserRepository};

    async fn setup() -> ConversationFacade {
        let transactions = testing::transactions();
        UserRepository::new(transactions.clone())
            .unwrap()
            .create(NewUser::new("u1@example.com", "U1").with_id("u1"))
            .await
            .unwrap();
        ConversationFacade::new(
            ConversationRepository::new(transactions.clone()).unwrap(),
            MessageRepository::new(transactions.clone()).unwrap(),
            transactions,
        )
    }

    #[tokio::test]
    async fn test_start_conversation() {
        let facade = setup().await;
        let (conversation, message) = facade
            .start_conversation("u1", "planning", "hello")
            .await
            .unwrap();

        assert_eq!(message.conversation_id, conversation.id);
        assert_eq!(message.role, MessageRole::User);
        let accesses = facade.find_accesses(&conversation.id).await.unwrap();
        assert_eq!(accesses.len(), 1);
        assert_eq!(accesses[0].role.as_deref(), Some(USER_ACCESS_ROLE));
    }

    #[tokio::test]
    async fn test_start_conversation_is_atomic() {
        let facade = setup().await;
        let err = facade
            .start_conversation("ghost", "planning", "hello")
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::Constraint(_)));

        // the conversation row was written before the failing access insert
        let conversations =
            crate::repository::Repository::new(facade.transactions.clone(), "conversation").unwrap();
        let leftovers: Vec<Conversation> = conversations.find_where(|_| true).await.unwrap();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_failed_unit_of_work_leaves_nothing_behind() {
        let facade = setup().await;
        let created = std::sync::Mutex::new(None);

        let result: RepoResult<()> = facade
            .transactions
            .with_transaction(|| async {
                let conversation = facade
                    .create_conversation(NewConversation::new("doomed"))
                    .await?;
                facade
                    .create_message(NewMessage::from_user(&conversation.id, "u1", "hi"))
                    .await?;
                *created.lock().unwrap() = Some(conversation.id);
                Err(RepositoryError::InvalidInput("injected failure".into()))
            })
            .await;
        assert!(result.is_err());

        let id = created.lock().unwrap().clone().unwrap();
        assert!(facade.find_conversation_by_id(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_membership_and_messages() {
        let facade = setup().await;
        let c = facade
            .create_conversation(NewConversation::new("c").with_id("c1"))
            .await
            .unwrap();

        let access = facade.add_user_to_conversation(&c.id, "u1").await.unwrap();
        assert_eq!(access.target, AccessTarget::user("u1"));

        facade
            .create_message(NewMessage::from_agent(&c.id, MessageRole::System, "welcome"))
            .await
            .unwrap();
        let message = facade
            .create_message(NewMessage::from_user(&c.id, "u1", "hi"))
            .await
            .unwrap();

        let patched = facade
            .update_message(
                &message.id,
                MessagePatch {
                    content: Some("hi all".into()),
                    kind: None,
                },
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(patched.content, "hi all");

        let listed = facade
            .find_messages_by_conversation_id(&c.id, MessageQuery::default())
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);

        assert!(facade.remove_user_from_conversation(&c.id, "u1").await.unwrap());
        assert!(facade.delete_conversation(&c.id).await.unwrap());
        assert!(facade.find_message_by_id(&message.id).await.unwrap().is_none());
    }
}
