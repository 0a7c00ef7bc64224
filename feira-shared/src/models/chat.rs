use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{timestamp::Timestamp, user::UserProfile};

/// A buyer/seller conversation scoped to one listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Conversation {
    /// Conversation identifier.
    pub id: Uuid,

    /// Listing the conversation is about.
    pub listing_id: Uuid,

    /// The two participants, lowest id first.
    pub participant_ids: Vec<Uuid>,

    /// When the conversation was opened.
    pub created_at: Timestamp,

    /// Time of the latest message; drives inbox ordering.
    pub last_message_at: Timestamp,
}

impl Conversation {
    /// Whether `user_id` is one of the two participants.
    #[must_use]
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.participant_ids.contains(&user_id)
    }

    /// The participant that is not `user_id`, or `None` when `user_id` is not a participant.
    #[must_use]
    pub fn other_participant(&self, user_id: Uuid) -> Option<Uuid> {
        if !self.is_participant(user_id) {
            return None;
        }
        self.participant_ids
            .iter()
            .copied()
            .find(|participant| *participant != user_id)
    }
}

/// Orders a participant pair so the same two users always map to the same key.
#[must_use]
pub fn normalized_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b { (a, b) } else { (b, a) }
}

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Message {
    /// Message identifier.
    pub id: Uuid,

    /// Parent conversation.
    pub conversation_id: Uuid,

    /// Author.
    pub sender_id: Uuid,

    /// The other participant at send time.
    pub receiver_id: Uuid,

    /// Message body. Never blank.
    pub content: String,

    /// Whether the receiver has seen the message. Only ever goes from false to true.
    pub seen: bool,

    /// Server clock at insert.
    pub created_at: Timestamp,
}

/// A conversation as shown in the inbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ConversationSummary {
    /// The conversation itself.
    #[serde(flatten)]
    pub conversation: Conversation,

    /// Profiles of both participants.
    pub participants: Vec<UserProfile>,

    /// Most recent message, if any.
    pub last_message: Option<Message>,
}

/// Request body for `POST /api/conversations`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct StartConversationRequest {
    /// Listing the requester wants to talk about.
    pub listing_id: Uuid,
}

/// Request body for `POST /api/conversations/{id}/messages`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct SendMessageRequest {
    /// Message body.
    pub content: String,
}

/// Request body for `PUT /api/conversations/{id}/typing`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct TypingRequest {
    /// `true` on keystroke, `false` when the input is cleared.
    pub typing: bool,
}

/// Response body for `POST /api/conversations/{id}/seen`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default, ToSchema)]
pub struct SeenResponse {
    /// Messages flipped to seen by this call.
    pub updated: Vec<Uuid>,
}
