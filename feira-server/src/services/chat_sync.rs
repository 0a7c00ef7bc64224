//! Conversation and message synchronization.
//!
//! Every write lands in the durable store first. Only after it commits is the
//! change mirrored into the broadcast store; a failed mirror is logged and
//! counted but never undoes or fails the write.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    sync::Arc,
};

use metrics::counter;
use shared::{
    config::server::ChatConfig,
    models::{Conversation, ConversationSummary, Message, UserProfile},
    realtime::{
        ChannelPath, ConversationEvent, MessageEvent, NotificationEvent, RealtimeEvent, SeenEvent,
    },
};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    auth::Identity,
    realtime::{BroadcastStore, TypingIndicator},
    store::{ChatStore, ConversationInsert, Directory, NewMessage, StoreError},
};

/// Failures of chat operations, mapped onto HTTP problems by `http::error`.
#[derive(Debug, Error)]
pub enum ChatError {
    /// No live session behind the presented token.
    #[error("authentication required")]
    Unauthenticated,
    /// The caller may not follow the requested fan-out path.
    #[error("subscription denied: {0}")]
    SubscriptionDenied(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type ChatResult<T> = Result<T, ChatError>;

/// Result of [`ChatSyncService::start_or_get_conversation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedConversation {
    pub conversation: Conversation,
    /// `false` when the conversation already existed.
    pub created: bool,
}

/// Durable-first chat operations with best-effort fan-out.
pub struct ChatSyncService {
    store: Arc<dyn ChatStore>,
    directory: Arc<dyn Directory>,
    broadcast: Arc<dyn BroadcastStore>,
    typing: Arc<TypingIndicator>,
    chat: ChatConfig,
}

impl fmt::Debug for ChatSyncService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatSyncService")
            .field("chat", &self.chat)
            .finish_non_exhaustive()
    }
}

impl ChatSyncService {
    pub fn new(
        store: Arc<dyn ChatStore>,
        directory: Arc<dyn Directory>,
        broadcast: Arc<dyn BroadcastStore>,
        typing: Arc<TypingIndicator>,
        chat: ChatConfig,
    ) -> Self {
        Self {
            store,
            directory,
            broadcast,
            typing,
            chat,
        }
    }

    /// Resolves a session token to the caller's identity.
    #[instrument(name = "chat.authenticate", skip_all)]
    pub async fn authenticate(&self, token: &str) -> ChatResult<Identity> {
        self.directory
            .identity_for_token(token)
            .await?
            .ok_or(ChatError::Unauthenticated)
    }

    /// Opens the buyer/seller conversation for a listing, or returns the one
    /// that already exists. New conversations are seeded with the welcome
    /// message from the requester to the listing owner.
    #[instrument(name = "chat.start_or_get_conversation", skip(self, identity), fields(user_id = %identity.user_id), err)]
    pub async fn start_or_get_conversation(
        &self,
        identity: &Identity,
        listing_id: Uuid,
    ) -> ChatResult<StartedConversation> {
        let listing = self
            .directory
            .listing(listing_id)
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("listing {listing_id} not found")))?;

        let requester = identity.user_id;
        if listing.owner_id == requester {
            return Err(ChatError::Forbidden(
                "cannot start a conversation on your own listing".to_string(),
            ));
        }

        if let Some(conversation) = self
            .store
            .find_conversation_for(listing_id, requester, listing.owner_id)
            .await?
        {
            debug!(conversation_id = %conversation.id, "conversation already exists");
            return Ok(StartedConversation {
                conversation,
                created: false,
            });
        }

        let welcome = self.chat.welcome_message(&listing.title);
        match self
            .store
            .create_conversation(listing_id, requester, listing.owner_id, &welcome)
            .await?
        {
            ConversationInsert::Created { conversation, seed } => {
                counter!("feira_conversations_started_total").increment(1);
                self.mirror_message(&conversation, &seed).await;
                Ok(StartedConversation {
                    conversation,
                    created: true,
                })
            }
            ConversationInsert::Existing(conversation) => Ok(StartedConversation {
                conversation,
                created: false,
            }),
        }
    }

    /// Inbox for `user_id`, most recent activity first.
    #[instrument(name = "chat.list_conversations_for", skip(self), err)]
    pub async fn list_conversations_for(
        &self,
        user_id: Uuid,
    ) -> ChatResult<Vec<ConversationSummary>> {
        let rows = self.store.list_conversations_for(user_id).await?;
        let user_ids: BTreeSet<Uuid> = rows
            .iter()
            .flat_map(|row| row.conversation.participant_ids.iter().copied())
            .collect();
        let profiles = self.profiles(user_ids.into_iter().collect()).await?;

        let mut summaries: Vec<ConversationSummary> = rows
            .into_iter()
            .map(|row| summarize(row.conversation, row.last_message, &profiles))
            .collect();
        summaries.sort_by(|a, b| {
            b.conversation
                .last_message_at
                .cmp(&a.conversation.last_message_at)
                .then_with(|| a.conversation.id.cmp(&b.conversation.id))
        });
        Ok(summaries)
    }

    #[instrument(name = "chat.get_conversation", skip(self, identity), fields(user_id = %identity.user_id), err)]
    pub async fn get_conversation(
        &self,
        identity: &Identity,
        conversation_id: Uuid,
    ) -> ChatResult<ConversationSummary> {
        let conversation = self.require_participant(identity, conversation_id).await?;
        let last_message = self.store.last_message(conversation_id).await?;
        let profiles = self.profiles(conversation.participant_ids.clone()).await?;
        Ok(summarize(conversation, last_message, &profiles))
    }

    /// Persists a message from the caller to the other participant and mirrors it.
    #[instrument(name = "chat.send_message", skip(self, identity, content), fields(user_id = %identity.user_id), err)]
    pub async fn send_message(
        &self,
        identity: &Identity,
        conversation_id: Uuid,
        content: &str,
    ) -> ChatResult<Message> {
        let conversation = self.require_participant(identity, conversation_id).await?;
        let content = self.validate_content(content)?;

        let sender_id = identity.user_id;
        let receiver_id = conversation.other_participant(sender_id).ok_or_else(|| {
            ChatError::Internal(format!("conversation {conversation_id} has no other participant"))
        })?;

        let (message, conversation) = self
            .store
            .append_message(NewMessage {
                conversation_id,
                sender_id,
                receiver_id,
                content,
            })
            .await?;
        counter!("feira_messages_sent_total").increment(1);

        self.typing.stop_typing(conversation_id, sender_id).await;
        self.mirror_message(&conversation, &message).await;
        Ok(message)
    }

    /// Conversation history, oldest first. Participants only.
    #[instrument(name = "chat.list_messages", skip(self, identity), fields(user_id = %identity.user_id), err)]
    pub async fn list_messages(
        &self,
        identity: &Identity,
        conversation_id: Uuid,
    ) -> ChatResult<Vec<Message>> {
        self.require_participant(identity, conversation_id).await?;
        Ok(self.store.list_messages(conversation_id).await?)
    }

    /// Marks every unseen message addressed to the caller as seen. When the
    /// latest message is among them, both inboxes get the updated preview.
    #[instrument(name = "chat.mark_seen", skip(self, identity), fields(user_id = %identity.user_id), err)]
    pub async fn mark_seen(&self, identity: &Identity, conversation_id: Uuid) -> ChatResult<Vec<Uuid>> {
        let conversation = self.require_participant(identity, conversation_id).await?;
        let message_ids = self
            .store
            .mark_seen(conversation_id, identity.user_id)
            .await?;
        if message_ids.is_empty() {
            return Ok(message_ids);
        }

        let event = RealtimeEvent::MessagesSeen(SeenEvent {
            conversation_id,
            reader_id: identity.user_id,
            message_ids: message_ids.clone(),
        });
        self.mirror(ChannelPath::Messages { conversation_id }, event)
            .await;

        match self.store.last_message(conversation_id).await {
            Ok(Some(last)) if message_ids.contains(&last.id) => {
                self.mirror_inbox(&conversation, &last).await;
            }
            Ok(_) => {}
            Err(err) => {
                warn!(%conversation_id, error = %err, "could not load last message for inbox update");
            }
        }
        Ok(message_ids)
    }

    /// Raises or clears the caller's typing flag.
    #[instrument(name = "chat.set_typing", skip(self, identity), fields(user_id = %identity.user_id), err)]
    pub async fn set_typing(
        &self,
        identity: &Identity,
        conversation_id: Uuid,
        typing: bool,
    ) -> ChatResult<()> {
        self.require_participant(identity, conversation_id).await?;
        if typing {
            self.typing
                .start_typing(conversation_id, identity.user_id)
                .await;
        } else {
            self.typing
                .stop_typing(conversation_id, identity.user_id)
                .await;
        }
        Ok(())
    }

    /// Checks a subscription request and returns the concrete path to subscribe to.
    #[instrument(name = "chat.authorize_subscription", skip(self, identity), fields(user_id = %identity.user_id, path = %path), err)]
    pub async fn authorize_subscription(
        &self,
        identity: &Identity,
        path: ChannelPath,
    ) -> ChatResult<ChannelPath> {
        let requester = identity.user_id;
        let resolved = path.resolved_for(requester);

        let allowed = match resolved {
            ChannelPath::Messages { conversation_id }
            | ChannelPath::Typing {
                conversation_id, ..
            } => self
                .store
                .get_conversation(conversation_id)
                .await?
                .is_some_and(|conversation| conversation.is_participant(requester)),
            ChannelPath::Conversations { user_id } => user_id == Some(requester),
            ChannelPath::Notifications { user_id } => user_id == requester,
            ChannelPath::Presence { user_id } => {
                user_id == requester || self.store.shares_conversation(requester, user_id).await?
            }
        };

        if allowed {
            Ok(resolved)
        } else {
            counter!("feira_subscriptions_denied_total").increment(1);
            Err(ChatError::SubscriptionDenied(format!(
                "not allowed to subscribe to '{path}'"
            )))
        }
    }

    async fn require_participant(
        &self,
        identity: &Identity,
        conversation_id: Uuid,
    ) -> ChatResult<Conversation> {
        let conversation = self
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| {
                ChatError::NotFound(format!("conversation {conversation_id} not found"))
            })?;
        if !conversation.is_participant(identity.user_id) {
            return Err(ChatError::Forbidden(
                "not a participant of this conversation".to_string(),
            ));
        }
        Ok(conversation)
    }

    fn validate_content(&self, content: &str) -> ChatResult<String> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::InvalidArgument(
                "message content must not be blank".to_string(),
            ));
        }
        let length = content.chars().count();
        if length > self.chat.max_message_length {
            return Err(ChatError::InvalidArgument(format!(
                "message is {length} characters, the limit is {}",
                self.chat.max_message_length
            )));
        }
        Ok(content.to_string())
    }

    async fn profiles(&self, user_ids: Vec<Uuid>) -> ChatResult<HashMap<Uuid, UserProfile>> {
        if user_ids.is_empty() {
            return Ok(HashMap::new());
        }
        Ok(self
            .directory
            .user_profiles(&user_ids)
            .await?
            .into_iter()
            .map(|profile| (profile.id, profile))
            .collect())
    }

    async fn mirror_message(&self, conversation: &Conversation, message: &Message) {
        self.mirror(
            ChannelPath::Messages {
                conversation_id: conversation.id,
            },
            RealtimeEvent::MessageCreated(MessageEvent {
                message: message.clone(),
            }),
        )
        .await;

        self.mirror_inbox(conversation, message).await;

        self.mirror(
            ChannelPath::Notifications {
                user_id: message.receiver_id,
            },
            RealtimeEvent::NotificationMessage(NotificationEvent::for_message(message)),
        )
        .await;
    }

    async fn mirror_inbox(&self, conversation: &Conversation, last_message: &Message) {
        for &user_id in &conversation.participant_ids {
            self.mirror(
                ChannelPath::Conversations {
                    user_id: Some(user_id),
                },
                RealtimeEvent::ConversationUpdated(ConversationEvent {
                    conversation: conversation.clone(),
                    last_message: Some(last_message.clone()),
                }),
            )
            .await;
        }
    }

    async fn mirror(&self, path: ChannelPath, event: RealtimeEvent) {
        let event_type = event.event_type();
        if let Err(err) = self.broadcast.mirror(path, event).await {
            warn!(%path, event_type, error = %err, "broadcast mirror failed after commit");
            counter!("feira_broadcast_mirror_failures_total", "kind" => event_type).increment(1);
        }
    }
}

fn summarize(
    conversation: Conversation,
    last_message: Option<Message>,
    profiles: &HashMap<Uuid, UserProfile>,
) -> ConversationSummary {
    let participants = conversation
        .participant_ids
        .iter()
        .filter_map(|id| profiles.get(id).cloned())
        .collect();
    ConversationSummary {
        conversation,
        participants,
        last_message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        realtime::{BroadcastError, RealtimeHub},
        store::MemoryStore,
    };
    use async_trait::async_trait;
    use shared::{models::ListingRef, realtime::RealtimeEnvelope};
    use std::time::Duration;

    struct Fixture {
        store: Arc<MemoryStore>,
        hub: Arc<RealtimeHub>,
        service: ChatSyncService,
        seller: Identity,
        buyer: Identity,
        listing: ListingRef,
    }

    async fn user(store: &MemoryStore, name: &str) -> Identity {
        let profile = UserProfile {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
            image_url: None,
        };
        store.insert_user(profile.clone()).await;
        Identity {
            user_id: profile.id,
            email: profile.email,
        }
    }

    async fn fixture_with(broadcast: Option<Arc<dyn BroadcastStore>>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(RealtimeHub::new(64));
        let broadcast = broadcast.unwrap_or_else(|| hub.clone() as Arc<dyn BroadcastStore>);
        let typing = Arc::new(TypingIndicator::new(
            broadcast.clone(),
            Duration::from_secs(3),
        ));
        let service = ChatSyncService::new(
            store.clone(),
            store.clone(),
            broadcast,
            typing,
            ChatConfig::default(),
        );

        let seller = user(&store, "Ana").await;
        let buyer = user(&store, "Bruno").await;
        let listing = ListingRef {
            id: Uuid::new_v4(),
            owner_id: seller.user_id,
            title: "Égua Mangalarga".to_string(),
        };
        store.insert_listing(listing.clone()).await;

        Fixture {
            store,
            hub,
            service,
            seller,
            buyer,
            listing,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(None).await
    }

    struct FailingBroadcast;

    #[async_trait]
    impl BroadcastStore for FailingBroadcast {
        async fn mirror(
            &self,
            _path: ChannelPath,
            _event: RealtimeEvent,
        ) -> Result<RealtimeEnvelope, BroadcastError> {
            Err(BroadcastError::Unavailable("offline".to_string()))
        }
    }

    #[tokio::test]
    async fn start_is_idempotent_and_seeds_one_welcome_message() {
        let f = fixture().await;

        let first = f
            .service
            .start_or_get_conversation(&f.buyer, f.listing.id)
            .await
            .unwrap();
        let second = f
            .service
            .start_or_get_conversation(&f.buyer, f.listing.id)
            .await
            .unwrap();

        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.conversation.id, second.conversation.id);

        let messages = f
            .service
            .list_messages(&f.buyer, first.conversation.id)
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].content,
            "Olá! Tenho interesse no anúncio \"Égua Mangalarga\""
        );
        assert_eq!(messages[0].sender_id, f.buyer.user_id);
        assert_eq!(messages[0].receiver_id, f.seller.user_id);
    }

    #[tokio::test]
    async fn owner_cannot_start_a_conversation_on_their_listing() {
        let f = fixture().await;
        let err = f
            .service
            .start_or_get_conversation(&f.seller, f.listing.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Forbidden(_)));
        assert!(
            f.store
                .list_conversations_for(f.seller.user_id)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn unknown_listing_is_not_found() {
        let f = fixture().await;
        let err = f
            .service
            .start_or_get_conversation(&f.buyer, Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
    }

    #[tokio::test]
    async fn rejected_sends_write_nothing_anywhere() {
        let f = fixture().await;
        let conversation = f
            .service
            .start_or_get_conversation(&f.buyer, f.listing.id)
            .await
            .unwrap()
            .conversation;
        let mut live = f
            .hub
            .subscribe(ChannelPath::Messages {
                conversation_id: conversation.id,
            })
            .await;
        let stranger = user(&f.store, "Carla").await;

        let blank = f
            .service
            .send_message(&f.buyer, conversation.id, "   \n ")
            .await
            .unwrap_err();
        assert!(matches!(blank, ChatError::InvalidArgument(_)));

        let too_long = "a".repeat(ChatConfig::default().max_message_length + 1);
        let long = f
            .service
            .send_message(&f.buyer, conversation.id, &too_long)
            .await
            .unwrap_err();
        assert!(matches!(long, ChatError::InvalidArgument(_)));

        let outsider = f
            .service
            .send_message(&stranger, conversation.id, "oi")
            .await
            .unwrap_err();
        assert!(matches!(outsider, ChatError::Forbidden(_)));

        let missing = f
            .service
            .send_message(&f.buyer, Uuid::new_v4(), "oi")
            .await
            .unwrap_err();
        assert!(matches!(missing, ChatError::NotFound(_)));

        assert_eq!(f.store.list_messages(conversation.id).await.unwrap().len(), 1);
        assert!(
            tokio::time::timeout(Duration::from_millis(50), live.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn send_persists_then_fans_out_to_every_path() {
        let f = fixture().await;
        let conversation = f
            .service
            .start_or_get_conversation(&f.buyer, f.listing.id)
            .await
            .unwrap()
            .conversation;

        let mut thread = f
            .hub
            .subscribe(ChannelPath::Messages {
                conversation_id: conversation.id,
            })
            .await;
        let mut buyer_inbox = f
            .hub
            .subscribe(ChannelPath::Conversations {
                user_id: Some(f.buyer.user_id),
            })
            .await;
        let mut buyer_notices = f
            .hub
            .subscribe(ChannelPath::Notifications {
                user_id: f.buyer.user_id,
            })
            .await;

        let reply = f
            .service
            .send_message(&f.seller, conversation.id, "  Ainda disponível!  ")
            .await
            .unwrap();
        assert_eq!(reply.content, "Ainda disponível!");
        assert_eq!(reply.receiver_id, f.buyer.user_id);

        let created = thread.recv().await.unwrap();
        assert_eq!(
            created.event,
            RealtimeEvent::MessageCreated(MessageEvent {
                message: reply.clone()
            })
        );

        let RealtimeEvent::ConversationUpdated(update) = buyer_inbox.recv().await.unwrap().event
        else {
            panic!("expected conversation.updated");
        };
        assert_eq!(update.last_message.as_ref(), Some(&reply));
        assert!(update.conversation.last_message_at >= reply.created_at);

        let RealtimeEvent::NotificationMessage(notice) = buyer_notices.recv().await.unwrap().event
        else {
            panic!("expected notification.message");
        };
        assert_eq!(notice.message_id, reply.id);
        assert_eq!(notice.sender_id, f.seller.user_id);
    }

    #[tokio::test]
    async fn broadcast_failure_never_undoes_the_write() {
        let f = fixture_with(Some(Arc::new(FailingBroadcast))).await;
        let started = f
            .service
            .start_or_get_conversation(&f.buyer, f.listing.id)
            .await
            .unwrap();
        assert!(started.created);

        let message = f
            .service
            .send_message(&f.seller, started.conversation.id, "Sim, está disponível")
            .await
            .unwrap();

        let stored = f
            .store
            .list_messages(started.conversation.id)
            .await
            .unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].id, message.id);
    }

    #[tokio::test]
    async fn inbox_orders_by_latest_activity_with_profiles() {
        let f = fixture().await;
        let second_listing = ListingRef {
            id: Uuid::new_v4(),
            owner_id: f.seller.user_id,
            title: "Sela australiana".to_string(),
        };
        f.store.insert_listing(second_listing.clone()).await;

        let older = f
            .service
            .start_or_get_conversation(&f.buyer, f.listing.id)
            .await
            .unwrap()
            .conversation;
        let newer = f
            .service
            .start_or_get_conversation(&f.buyer, second_listing.id)
            .await
            .unwrap()
            .conversation;
        f.service
            .send_message(&f.seller, older.id, "Respondendo")
            .await
            .unwrap();

        let inbox = f
            .service
            .list_conversations_for(f.seller.user_id)
            .await
            .unwrap();
        let ids: Vec<Uuid> = inbox.iter().map(|s| s.conversation.id).collect();
        assert_eq!(ids, [older.id, newer.id]);
        assert_eq!(inbox[0].participants.len(), 2);
        assert_eq!(
            inbox[0].last_message.as_ref().map(|m| m.content.as_str()),
            Some("Respondendo")
        );
    }

    #[tokio::test]
    async fn mark_seen_flips_only_messages_addressed_to_the_reader() {
        let f = fixture().await;
        let conversation = f
            .service
            .start_or_get_conversation(&f.buyer, f.listing.id)
            .await
            .unwrap()
            .conversation;
        f.service
            .send_message(&f.seller, conversation.id, "Olá")
            .await
            .unwrap();

        let seller_seen = f
            .service
            .mark_seen(&f.seller, conversation.id)
            .await
            .unwrap();
        assert_eq!(seller_seen.len(), 1);
        assert!(
            f.service
                .mark_seen(&f.seller, conversation.id)
                .await
                .unwrap()
                .is_empty()
        );

        let messages = f
            .service
            .list_messages(&f.buyer, conversation.id)
            .await
            .unwrap();
        assert!(messages[0].seen);
        assert!(!messages[1].seen);
    }

    #[tokio::test]
    async fn subscription_acl_follows_participation() {
        let f = fixture().await;
        let conversation = f
            .service
            .start_or_get_conversation(&f.buyer, f.listing.id)
            .await
            .unwrap()
            .conversation;
        let stranger = user(&f.store, "Carla").await;
        let thread = ChannelPath::Messages {
            conversation_id: conversation.id,
        };

        assert_eq!(
            f.service
                .authorize_subscription(&f.buyer, thread)
                .await
                .unwrap(),
            thread
        );
        assert!(matches!(
            f.service.authorize_subscription(&stranger, thread).await,
            Err(ChatError::SubscriptionDenied(_))
        ));

        let bare_inbox = f
            .service
            .authorize_subscription(&stranger, ChannelPath::Conversations { user_id: None })
            .await
            .unwrap();
        assert_eq!(
            bare_inbox,
            ChannelPath::Conversations {
                user_id: Some(stranger.user_id)
            }
        );
        assert!(
            f.service
                .authorize_subscription(
                    &stranger,
                    ChannelPath::Notifications {
                        user_id: f.buyer.user_id
                    }
                )
                .await
                .is_err()
        );

        let seller_presence = ChannelPath::Presence {
            user_id: f.seller.user_id,
        };
        assert!(
            f.service
                .authorize_subscription(&f.buyer, seller_presence)
                .await
                .is_ok()
        );
        assert!(
            f.service
                .authorize_subscription(&stranger, seller_presence)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn sending_clears_the_senders_typing_flag() {
        let f = fixture().await;
        let conversation = f
            .service
            .start_or_get_conversation(&f.buyer, f.listing.id)
            .await
            .unwrap()
            .conversation;

        f.service
            .set_typing(&f.seller, conversation.id, true)
            .await
            .unwrap();
        f.service
            .send_message(&f.seller, conversation.id, "pronto")
            .await
            .unwrap();

        let flag = f
            .hub
            .retained(&ChannelPath::Typing {
                conversation_id: conversation.id,
                user_id: Some(f.seller.user_id),
            })
            .await;
        assert!(flag.is_none());
    }

    #[tokio::test]
    async fn authenticate_resolves_live_sessions_only() {
        let f = fixture().await;
        f.store
            .insert_session("live", f.buyer.user_id, chrono::Duration::hours(1))
            .await;
        f.store
            .insert_session("stale", f.buyer.user_id, chrono::Duration::seconds(-1))
            .await;

        let identity = f.service.authenticate("live").await.unwrap();
        assert_eq!(identity.user_id, f.buyer.user_id);
        assert!(matches!(
            f.service.authenticate("stale").await,
            Err(ChatError::Unauthenticated)
        ));
        assert!(matches!(
            f.service.authenticate("unknown").await,
            Err(ChatError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn seeing_the_latest_message_refreshes_both_inboxes() {
        let f = fixture().await;
        let conversation = f
            .service
            .start_or_get_conversation(&f.buyer, f.listing.id)
            .await
            .unwrap()
            .conversation;
        let reply = f
            .service
            .send_message(&f.seller, conversation.id, "Pode vir ver")
            .await
            .unwrap();

        let mut buyer_inbox = f
            .hub
            .subscribe(ChannelPath::Conversations {
                user_id: Some(f.buyer.user_id),
            })
            .await;
        let mut seller_inbox = f
            .hub
            .subscribe(ChannelPath::Conversations {
                user_id: Some(f.seller.user_id),
            })
            .await;

        let seen = f
            .service
            .mark_seen(&f.buyer, conversation.id)
            .await
            .unwrap();
        assert_eq!(seen, vec![reply.id]);

        for inbox in [&mut buyer_inbox, &mut seller_inbox] {
            let RealtimeEvent::ConversationUpdated(update) = inbox.recv().await.unwrap().event
            else {
                panic!("expected conversation.updated");
            };
            let last = update.last_message.unwrap();
            assert_eq!(last.id, reply.id);
            assert!(last.seen);
        }

        assert!(
            f.service
                .mark_seen(&f.buyer, conversation.id)
                .await
                .unwrap()
                .is_empty()
        );
        assert!(
            tokio::time::timeout(Duration::from_millis(50), buyer_inbox.recv())
                .await
                .is_err()
        );
    }
}
