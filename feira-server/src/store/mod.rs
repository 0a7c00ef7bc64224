//! Durable message store and the collaborator directory.
//!
//! The durable store is the source of truth for conversations and messages.
//! Two implementations exist: [`postgres::PgStore`] for deployments and
//! [`memory::MemoryStore`] for local development and tests.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use shared::models::{Conversation, ListingRef, Message, UserProfile};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::Identity;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("conversation {0} not found")]
    ConversationNotFound(Uuid),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Outcome of an idempotent conversation create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationInsert {
    /// This call created the conversation and its welcome message.
    Created {
        conversation: Conversation,
        seed: Message,
    },
    /// A concurrent call won; nothing was written.
    Existing(Conversation),
}

impl ConversationInsert {
    #[must_use]
    pub fn conversation(&self) -> &Conversation {
        match self {
            Self::Created { conversation, .. } | Self::Existing(conversation) => conversation,
        }
    }
}

/// A message to append. `created_at` is always assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
}

/// A conversation row together with its newest message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationRow {
    pub conversation: Conversation,
    pub last_message: Option<Message>,
}

#[async_trait]
pub trait ChatStore: Send + Sync + 'static {
    /// Conversation for a listing and an unordered participant pair.
    async fn find_conversation_for(
        &self,
        listing_id: Uuid,
        a: Uuid,
        b: Uuid,
    ) -> StoreResult<Option<Conversation>>;

    /// Creates the conversation and its seed message (`requester` to `owner`)
    /// in one transaction. Returns [`ConversationInsert::Existing`] without
    /// writing anything when the pair already has a conversation for the listing.
    async fn create_conversation(
        &self,
        listing_id: Uuid,
        requester: Uuid,
        owner: Uuid,
        seed_content: &str,
    ) -> StoreResult<ConversationInsert>;

    async fn get_conversation(&self, conversation_id: Uuid) -> StoreResult<Option<Conversation>>;

    /// Conversations the user participates in, newest activity first.
    async fn list_conversations_for(&self, user_id: Uuid) -> StoreResult<Vec<ConversationRow>>;

    /// Persists the message and bumps `last_message_at` in one transaction.
    async fn append_message(&self, message: NewMessage) -> StoreResult<(Message, Conversation)>;

    /// Messages in creation order, ties broken by insertion sequence.
    async fn list_messages(&self, conversation_id: Uuid) -> StoreResult<Vec<Message>>;

    async fn last_message(&self, conversation_id: Uuid) -> StoreResult<Option<Message>>;

    /// Flips unseen messages addressed to `reader_id` to seen and returns their ids.
    async fn mark_seen(&self, conversation_id: Uuid, reader_id: Uuid) -> StoreResult<Vec<Uuid>>;

    /// Whether the two users share at least one conversation.
    async fn shares_conversation(&self, a: Uuid, b: Uuid) -> StoreResult<bool>;

    /// Readiness check.
    async fn ping(&self) -> StoreResult<()>;
}

/// Read-only access to data owned by the surrounding marketplace.
#[async_trait]
pub trait Directory: Send + Sync + 'static {
    /// Resolves a raw session token. Expired or unknown tokens yield `None`.
    async fn identity_for_token(&self, token: &str) -> StoreResult<Option<Identity>>;

    async fn listing(&self, listing_id: Uuid) -> StoreResult<Option<ListingRef>>;

    async fn user_profiles(&self, user_ids: &[Uuid]) -> StoreResult<Vec<UserProfile>>;
}
