use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use super::path::ChannelPath;
use crate::models::{Conversation, Message, Timestamp};

/// A message was appended to a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct MessageEvent {
    /// The persisted message.
    pub message: Message,
}

/// Messages addressed to `reader_id` were marked seen.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct SeenEvent {
    /// Conversation the messages belong to.
    pub conversation_id: Uuid,
    /// Participant who read them.
    pub reader_id: Uuid,
    /// Messages flipped to seen.
    pub message_ids: Vec<Uuid>,
}

/// A conversation was created or received a new message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ConversationEvent {
    /// Current conversation row.
    pub conversation: Conversation,
    /// Message that caused the update.
    pub last_message: Option<Message>,
}

/// A user went online or offline.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct PresenceEvent {
    /// Tracked user.
    pub user_id: Uuid,
    /// Whether at least one connection of theirs is open.
    pub online: bool,
}

/// A participant started or stopped typing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct TypingEvent {
    /// Conversation being typed into.
    pub conversation_id: Uuid,
    /// Typist.
    pub user_id: Uuid,
    /// Current flag value.
    pub typing: bool,
}

/// Notice to the receiver that a message arrived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct NotificationEvent {
    /// User being notified.
    pub recipient_id: Uuid,
    /// Conversation the message belongs to.
    pub conversation_id: Uuid,
    /// New message.
    pub message_id: Uuid,
    /// Author.
    pub sender_id: Uuid,
    /// Shortened message body.
    pub preview: String,
}

impl NotificationEvent {
    const PREVIEW_CHARS: usize = 80;

    /// Builds the notice for `message`, truncating the body for display.
    #[must_use]
    pub fn for_message(message: &Message) -> Self {
        let mut preview: String = message.content.chars().take(Self::PREVIEW_CHARS).collect();
        if message.content.chars().count() > Self::PREVIEW_CHARS {
            preview.push('…');
        }
        Self {
            recipient_id: message.receiver_id,
            conversation_id: message.conversation_id,
            message_id: message.id,
            sender_id: message.sender_id,
            preview,
        }
    }
}

/// Every payload the broadcast store carries, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(tag = "type")]
pub enum RealtimeEvent {
    /// See [`MessageEvent`].
    #[serde(rename = "message.created")]
    MessageCreated(MessageEvent),
    /// See [`SeenEvent`].
    #[serde(rename = "messages.seen")]
    MessagesSeen(SeenEvent),
    /// See [`ConversationEvent`].
    #[serde(rename = "conversation.updated")]
    ConversationUpdated(ConversationEvent),
    /// See [`PresenceEvent`].
    #[serde(rename = "presence.changed")]
    PresenceChanged(PresenceEvent),
    /// See [`TypingEvent`].
    #[serde(rename = "typing.changed")]
    TypingChanged(TypingEvent),
    /// See [`NotificationEvent`].
    #[serde(rename = "notification.message")]
    NotificationMessage(NotificationEvent),
}

impl RealtimeEvent {
    /// Wire tag, also used as the SSE event name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::MessageCreated(_) => "message.created",
            Self::MessagesSeen(_) => "messages.seen",
            Self::ConversationUpdated(_) => "conversation.updated",
            Self::PresenceChanged(_) => "presence.changed",
            Self::TypingChanged(_) => "typing.changed",
            Self::NotificationMessage(_) => "notification.message",
        }
    }
}

/// Why an incoming envelope was refused at the subscription boundary.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Not valid JSON, or not a known event shape.
    #[error("malformed realtime envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Delivered for a path the subscriber did not ask for.
    #[error("envelope for '{actual}' delivered to subscription '{expected}'")]
    PathMismatch {
        /// Subscribed path.
        expected: ChannelPath,
        /// Path stamped on the envelope.
        actual: ChannelPath,
    },

    /// The event type does not belong on the envelope's path.
    #[error("event '{event_type}' does not belong on '{path}'")]
    EventMismatch {
        /// Envelope path.
        path: ChannelPath,
        /// Offending event tag.
        event_type: &'static str,
    },
}

/// An event as delivered to subscribers, stamped by the hub.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct RealtimeEnvelope {
    /// Path the event was published on.
    #[schema(value_type = String)]
    pub path: ChannelPath,
    /// Per-channel sequence number, strictly increasing.
    pub sequence: u64,
    /// Server clock when the hub accepted the event.
    pub server_timestamp: Timestamp,
    /// Payload.
    pub event: RealtimeEvent,
}

impl RealtimeEnvelope {
    /// Parses `json` and checks it belongs to a subscription on `subscribed`.
    ///
    /// # Errors
    /// Returns [`EnvelopeError`] when the JSON is malformed, the envelope was
    /// published on a path `subscribed` does not cover, or the event type is
    /// foreign to its path.
    pub fn decode_for(subscribed: &ChannelPath, json: &str) -> Result<Self, EnvelopeError> {
        let envelope: Self = serde_json::from_str(json)?;
        envelope.validate_for(subscribed)?;
        Ok(envelope)
    }

    /// Checks an already-decoded envelope against a subscription.
    ///
    /// # Errors
    /// See [`RealtimeEnvelope::decode_for`].
    pub fn validate_for(&self, subscribed: &ChannelPath) -> Result<(), EnvelopeError> {
        if !subscribed.covers(&self.path) {
            return Err(EnvelopeError::PathMismatch {
                expected: *subscribed,
                actual: self.path,
            });
        }
        if !self.path.accepts(&self.event) {
            return Err(EnvelopeError::EventMismatch {
                path: self.path,
                event_type: self.event.event_type(),
            });
        }
        Ok(())
    }
}
