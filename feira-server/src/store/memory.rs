use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use shared::models::{Conversation, ListingRef, Message, Timestamp, UserProfile, normalized_pair};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    ChatStore, ConversationInsert, ConversationRow, Directory, NewMessage, StoreError, StoreResult,
};
use crate::auth::{Identity, session::hash_token};

#[derive(Debug, Default)]
struct MemoryState {
    conversations: HashMap<Uuid, Conversation>,
    pairs: HashMap<(Uuid, Uuid, Uuid), Uuid>,
    messages: HashMap<Uuid, Vec<Message>>,
    users: HashMap<Uuid, UserProfile>,
    sessions: HashMap<Vec<u8>, (Uuid, DateTime<Utc>)>,
    listings: HashMap<Uuid, ListingRef>,
}

/// Process-local store used by the `memory` backend and by tests.
///
/// Messages within a conversation are kept in insertion order and their
/// timestamps never go backwards, matching the `(created_at, seq)` order of
/// the PostgreSQL store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_user(&self, profile: UserProfile) {
        self.state.write().await.users.insert(profile.id, profile);
    }

    pub async fn insert_listing(&self, listing: ListingRef) {
        self.state.write().await.listings.insert(listing.id, listing);
    }

    /// Registers a session token valid for `ttl`.
    pub async fn insert_session(&self, token: &str, user_id: Uuid, ttl: Duration) {
        self.state
            .write()
            .await
            .sessions
            .insert(hash_token(token), (user_id, Utc::now() + ttl));
    }

    /// Makes every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store disabled".to_string()));
        }
        Ok(())
    }
}

impl MemoryState {
    fn next_timestamp(&self, conversation_id: Uuid) -> Timestamp {
        let now = Utc::now();
        let floor = self
            .messages
            .get(&conversation_id)
            .and_then(|messages| messages.last())
            .map(|message| message.created_at.0)
            .or_else(|| {
                self.conversations
                    .get(&conversation_id)
                    .map(|conversation| conversation.created_at.0)
            });
        Timestamp(floor.map_or(now, |floor| now.max(floor)))
    }

    fn push_message(&mut self, new: NewMessage) -> StoreResult<(Message, Conversation)> {
        let created_at = self.next_timestamp(new.conversation_id);
        let conversation = self
            .conversations
            .get_mut(&new.conversation_id)
            .ok_or(StoreError::ConversationNotFound(new.conversation_id))?;

        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            content: new.content,
            seen: false,
            created_at,
        };

        conversation.last_message_at = conversation.last_message_at.max(created_at);
        let conversation = conversation.clone();
        self.messages
            .entry(new.conversation_id)
            .or_default()
            .push(message.clone());

        Ok((message, conversation))
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn find_conversation_for(
        &self,
        listing_id: Uuid,
        a: Uuid,
        b: Uuid,
    ) -> StoreResult<Option<Conversation>> {
        self.check_available()?;
        let (low, high) = normalized_pair(a, b);
        let state = self.state.read().await;
        Ok(state
            .pairs
            .get(&(listing_id, low, high))
            .and_then(|id| state.conversations.get(id))
            .cloned())
    }

    async fn create_conversation(
        &self,
        listing_id: Uuid,
        requester: Uuid,
        owner: Uuid,
        seed_content: &str,
    ) -> StoreResult<ConversationInsert> {
        self.check_available()?;
        let (low, high) = normalized_pair(requester, owner);
        let mut state = self.state.write().await;

        if let Some(existing) = state
            .pairs
            .get(&(listing_id, low, high))
            .and_then(|id| state.conversations.get(id))
        {
            return Ok(ConversationInsert::Existing(existing.clone()));
        }

        let now = Timestamp::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            listing_id,
            participant_ids: vec![low, high],
            created_at: now,
            last_message_at: now,
        };
        state.pairs.insert((listing_id, low, high), conversation.id);
        state
            .conversations
            .insert(conversation.id, conversation.clone());

        let (seed, conversation) = state.push_message(NewMessage {
            conversation_id: conversation.id,
            sender_id: requester,
            receiver_id: owner,
            content: seed_content.to_string(),
        })?;

        Ok(ConversationInsert::Created { conversation, seed })
    }

    async fn get_conversation(&self, conversation_id: Uuid) -> StoreResult<Option<Conversation>> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .cloned())
    }

    async fn list_conversations_for(&self, user_id: Uuid) -> StoreResult<Vec<ConversationRow>> {
        self.check_available()?;
        let state = self.state.read().await;
        let mut rows: Vec<ConversationRow> = state
            .conversations
            .values()
            .filter(|conversation| conversation.is_participant(user_id))
            .map(|conversation| ConversationRow {
                conversation: conversation.clone(),
                last_message: state
                    .messages
                    .get(&conversation.id)
                    .and_then(|messages| messages.last())
                    .cloned(),
            })
            .collect();

        rows.sort_by(|a, b| {
            b.conversation
                .last_message_at
                .cmp(&a.conversation.last_message_at)
                .then_with(|| a.conversation.id.cmp(&b.conversation.id))
        });
        Ok(rows)
    }

    async fn append_message(&self, message: NewMessage) -> StoreResult<(Message, Conversation)> {
        self.check_available()?;
        self.state.write().await.push_message(message)
    }

    async fn list_messages(&self, conversation_id: Uuid) -> StoreResult<Vec<Message>> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .messages
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn last_message(&self, conversation_id: Uuid) -> StoreResult<Option<Message>> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .messages
            .get(&conversation_id)
            .and_then(|messages| messages.last())
            .cloned())
    }

    async fn mark_seen(&self, conversation_id: Uuid, reader_id: Uuid) -> StoreResult<Vec<Uuid>> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let Some(messages) = state.messages.get_mut(&conversation_id) else {
            return Ok(Vec::new());
        };

        Ok(messages
            .iter_mut()
            .filter(|message| message.receiver_id == reader_id && !message.seen)
            .map(|message| {
                message.seen = true;
                message.id
            })
            .collect())
    }

    async fn shares_conversation(&self, a: Uuid, b: Uuid) -> StoreResult<bool> {
        self.check_available()?;
        let (low, high) = normalized_pair(a, b);
        Ok(self
            .state
            .read()
            .await
            .pairs
            .keys()
            .any(|(_, l, h)| *l == low && *h == high))
    }

    async fn ping(&self) -> StoreResult<()> {
        self.check_available()
    }
}

#[async_trait]
impl Directory for MemoryStore {
    async fn identity_for_token(&self, token: &str) -> StoreResult<Option<Identity>> {
        self.check_available()?;
        let state = self.state.read().await;
        let Some((user_id, expires_at)) = state.sessions.get(&hash_token(token)) else {
            return Ok(None);
        };
        if *expires_at <= Utc::now() {
            return Ok(None);
        }
        Ok(state.users.get(user_id).map(|user| Identity {
            user_id: user.id,
            email: user.email.clone(),
        }))
    }

    async fn listing(&self, listing_id: Uuid) -> StoreResult<Option<ListingRef>> {
        self.check_available()?;
        Ok(self.state.read().await.listings.get(&listing_id).cloned())
    }

    async fn user_profiles(&self, user_ids: &[Uuid]) -> StoreResult<Vec<UserProfile>> {
        self.check_available()?;
        let state = self.state.read().await;
        Ok(user_ids
            .iter()
            .filter_map(|id| state.users.get(id))
            .cloned()
            .collect())
    }
}
