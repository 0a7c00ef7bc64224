use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{Conversation, ListingRef, Message, Timestamp, UserProfile, normalized_pair};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::instrument;
use uuid::Uuid;

use super::{
    ChatStore, ConversationInsert, ConversationRow, Directory, NewMessage, StoreError, StoreResult,
};
use crate::auth::{Identity, session::hash_token};

const CONVERSATION_COLUMNS: &str =
    "id, listing_id, user_low, user_high, created_at, last_message_at";
const MESSAGE_COLUMNS: &str =
    "id, conversation_id, sender_id, receiver_id, content, seen, created_at";

#[derive(sqlx::FromRow)]
struct ConversationRecord {
    id: Uuid,
    listing_id: Uuid,
    user_low: Uuid,
    user_high: Uuid,
    created_at: DateTime<Utc>,
    last_message_at: DateTime<Utc>,
}

impl From<ConversationRecord> for Conversation {
    fn from(row: ConversationRecord) -> Self {
        Self {
            id: row.id,
            listing_id: row.listing_id,
            participant_ids: vec![row.user_low, row.user_high],
            created_at: Timestamp(row.created_at),
            last_message_at: Timestamp(row.last_message_at),
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRecord {
    id: Uuid,
    conversation_id: Uuid,
    sender_id: Uuid,
    receiver_id: Uuid,
    content: String,
    seen: bool,
    created_at: DateTime<Utc>,
}

impl From<MessageRecord> for Message {
    fn from(row: MessageRecord) -> Self {
        Self {
            id: row.id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            content: row.content,
            seen: row.seen,
            created_at: Timestamp(row.created_at),
        }
    }
}

/// PostgreSQL-backed store over the `feira` schema.
#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_message(
        tx: &mut Transaction<'_, Postgres>,
        new: &NewMessage,
    ) -> StoreResult<(Message, Conversation)> {
        let message: Message = sqlx::query_as::<_, MessageRecord>(&format!(
            "INSERT INTO feira.messages (id, conversation_id, sender_id, receiver_id, content)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {MESSAGE_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new.conversation_id)
        .bind(new.sender_id)
        .bind(new.receiver_id)
        .bind(&new.content)
        .fetch_one(&mut **tx)
        .await?
        .into();

        let conversation: Conversation = sqlx::query_as::<_, ConversationRecord>(&format!(
            "UPDATE feira.conversations
                SET last_message_at = GREATEST(last_message_at, $2)
              WHERE id = $1
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(new.conversation_id)
        .bind(message.created_at.0)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(StoreError::ConversationNotFound(new.conversation_id))?
        .into();

        Ok((message, conversation))
    }
}

#[async_trait]
impl ChatStore for PgStore {
    #[instrument(name = "store.find_conversation_for", skip(self), err)]
    async fn find_conversation_for(
        &self,
        listing_id: Uuid,
        a: Uuid,
        b: Uuid,
    ) -> StoreResult<Option<Conversation>> {
        let (low, high) = normalized_pair(a, b);
        let row = sqlx::query_as::<_, ConversationRecord>(&format!(
            "SELECT {CONVERSATION_COLUMNS}
               FROM feira.conversations
              WHERE listing_id = $1 AND user_low = $2 AND user_high = $3"
        ))
        .bind(listing_id)
        .bind(low)
        .bind(high)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Conversation::from))
    }

    #[instrument(name = "store.create_conversation", skip(self, seed_content), err)]
    async fn create_conversation(
        &self,
        listing_id: Uuid,
        requester: Uuid,
        owner: Uuid,
        seed_content: &str,
    ) -> StoreResult<ConversationInsert> {
        let (low, high) = normalized_pair(requester, owner);
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query_as::<_, ConversationRecord>(&format!(
            "INSERT INTO feira.conversations (id, listing_id, user_low, user_high)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (listing_id, user_low, user_high) DO NOTHING
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(listing_id)
        .bind(low)
        .bind(high)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(created) = inserted else {
            let existing = sqlx::query_as::<_, ConversationRecord>(&format!(
                "SELECT {CONVERSATION_COLUMNS}
                   FROM feira.conversations
                  WHERE listing_id = $1 AND user_low = $2 AND user_high = $3"
            ))
            .bind(listing_id)
            .bind(low)
            .bind(high)
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;
            return Ok(ConversationInsert::Existing(existing.into()));
        };

        let (seed, conversation) = Self::insert_message(
            &mut tx,
            &NewMessage {
                conversation_id: created.id,
                sender_id: requester,
                receiver_id: owner,
                content: seed_content.to_string(),
            },
        )
        .await?;

        tx.commit().await?;
        Ok(ConversationInsert::Created { conversation, seed })
    }

    #[instrument(name = "store.get_conversation", skip(self), err)]
    async fn get_conversation(&self, conversation_id: Uuid) -> StoreResult<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRecord>(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM feira.conversations WHERE id = $1"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Conversation::from))
    }

    #[instrument(name = "store.list_conversations_for", skip(self), err)]
    async fn list_conversations_for(&self, user_id: Uuid) -> StoreResult<Vec<ConversationRow>> {
        #[derive(sqlx::FromRow)]
        struct InboxRow {
            id: Uuid,
            listing_id: Uuid,
            user_low: Uuid,
            user_high: Uuid,
            created_at: DateTime<Utc>,
            last_message_at: DateTime<Utc>,
            message_id: Option<Uuid>,
            sender_id: Option<Uuid>,
            receiver_id: Option<Uuid>,
            content: Option<String>,
            seen: Option<bool>,
            message_created_at: Option<DateTime<Utc>>,
        }

        let rows = sqlx::query_as::<_, InboxRow>(
            "SELECT c.id, c.listing_id, c.user_low, c.user_high, c.created_at, c.last_message_at,
                    m.id AS message_id, m.sender_id, m.receiver_id, m.content, m.seen,
                    m.created_at AS message_created_at
               FROM feira.conversations c
               LEFT JOIN LATERAL (
                    SELECT id, sender_id, receiver_id, content, seen, created_at
                      FROM feira.messages
                     WHERE conversation_id = c.id
                     ORDER BY created_at DESC, seq DESC
                     LIMIT 1
               ) m ON TRUE
              WHERE c.user_low = $1 OR c.user_high = $1
              ORDER BY c.last_message_at DESC, c.id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let last_message = match (
                    row.message_id,
                    row.sender_id,
                    row.receiver_id,
                    row.content,
                    row.seen,
                    row.message_created_at,
                ) {
                    (
                        Some(id),
                        Some(sender_id),
                        Some(receiver_id),
                        Some(content),
                        Some(seen),
                        Some(created_at),
                    ) => Some(Message {
                        id,
                        conversation_id: row.id,
                        sender_id,
                        receiver_id,
                        content,
                        seen,
                        created_at: Timestamp(created_at),
                    }),
                    _ => None,
                };
                ConversationRow {
                    conversation: Conversation {
                        id: row.id,
                        listing_id: row.listing_id,
                        participant_ids: vec![row.user_low, row.user_high],
                        created_at: Timestamp(row.created_at),
                        last_message_at: Timestamp(row.last_message_at),
                    },
                    last_message,
                }
            })
            .collect())
    }

    #[instrument(name = "store.append_message", skip(self, message), fields(conversation_id = %message.conversation_id), err)]
    async fn append_message(&self, message: NewMessage) -> StoreResult<(Message, Conversation)> {
        let mut tx = self.pool.begin().await?;
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM feira.conversations WHERE id = $1)")
                .bind(message.conversation_id)
                .fetch_one(&mut *tx)
                .await?;
        if !exists {
            return Err(StoreError::ConversationNotFound(message.conversation_id));
        }

        let persisted = Self::insert_message(&mut tx, &message).await?;
        tx.commit().await?;
        Ok(persisted)
    }

    #[instrument(name = "store.list_messages", skip(self), err)]
    async fn list_messages(&self, conversation_id: Uuid) -> StoreResult<Vec<Message>> {
        let rows = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS}
               FROM feira.messages
              WHERE conversation_id = $1
              ORDER BY created_at, seq"
        ))
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    #[instrument(name = "store.last_message", skip(self), err)]
    async fn last_message(&self, conversation_id: Uuid) -> StoreResult<Option<Message>> {
        let row = sqlx::query_as::<_, MessageRecord>(&format!(
            "SELECT {MESSAGE_COLUMNS}
               FROM feira.messages
              WHERE conversation_id = $1
              ORDER BY created_at DESC, seq DESC
              LIMIT 1"
        ))
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Message::from))
    }

    #[instrument(name = "store.mark_seen", skip(self), err)]
    async fn mark_seen(&self, conversation_id: Uuid, reader_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "UPDATE feira.messages
                SET seen = TRUE
              WHERE conversation_id = $1 AND receiver_id = $2 AND NOT seen
             RETURNING id",
        )
        .bind(conversation_id)
        .bind(reader_id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(ids)
    }

    #[instrument(name = "store.shares_conversation", skip(self), err)]
    async fn shares_conversation(&self, a: Uuid, b: Uuid) -> StoreResult<bool> {
        let (low, high) = normalized_pair(a, b);
        let shared: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                SELECT 1 FROM feira.conversations WHERE user_low = $1 AND user_high = $2
             )",
        )
        .bind(low)
        .bind(high)
        .fetch_one(&self.pool)
        .await?;
        Ok(shared)
    }

    async fn ping(&self) -> StoreResult<()> {
        crate::db::bootstrap::ensure_readiness(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Directory for PgStore {
    #[instrument(name = "directory.identity_for_token", skip_all, err)]
    async fn identity_for_token(&self, token: &str) -> StoreResult<Option<Identity>> {
        #[derive(sqlx::FromRow)]
        struct SessionRow {
            user_id: Uuid,
            email: String,
        }

        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT u.id AS user_id, u.email
               FROM feira.sessions s
               JOIN feira.users u ON u.id = s.user_id
              WHERE s.token_hash = $1
                AND s.expires_at > now()",
        )
        .bind(hash_token(token))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| Identity {
            user_id: row.user_id,
            email: row.email,
        }))
    }

    #[instrument(name = "directory.listing", skip(self), err)]
    async fn listing(&self, listing_id: Uuid) -> StoreResult<Option<ListingRef>> {
        #[derive(sqlx::FromRow)]
        struct ListingRow {
            id: Uuid,
            owner_id: Uuid,
            title: String,
        }

        let row = sqlx::query_as::<_, ListingRow>(
            "SELECT id, owner_id, title FROM feira.listings WHERE id = $1",
        )
        .bind(listing_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| ListingRef {
            id: row.id,
            owner_id: row.owner_id,
            title: row.title,
        }))
    }

    #[instrument(name = "directory.user_profiles", skip(self), err)]
    async fn user_profiles(&self, user_ids: &[Uuid]) -> StoreResult<Vec<UserProfile>> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, name, email, image_url FROM feira.users WHERE id = ANY($1)",
        )
        .bind(user_ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(UserProfile::from).collect())
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    name: String,
    email: String,
    image_url: Option<String>,
}

impl From<UserRow> for UserProfile {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            email: row.email,
            image_url: row.image_url,
        }
    }
}
