use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

use super::event::RealtimeEvent;

/// Returned when a string is not a recognised fan-out path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid realtime path '{0}'")]
pub struct PathParseError(pub String);

/// An addressable fan-out path in the broadcast store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelPath {
    /// `messages/{conversation_id}`: new messages and seen receipts.
    Messages {
        /// Conversation being followed.
        conversation_id: Uuid,
    },
    /// `conversations[/{user_id}]`: the user's inbox. The bare form means
    /// "my inbox" and is resolved against the caller before subscribing.
    Conversations {
        /// Inbox owner, `None` for the bare form.
        user_id: Option<Uuid>,
    },
    /// `typing/{conversation_id}[/{user_id}]`: typing flags, for the whole
    /// conversation or one participant.
    Typing {
        /// Conversation being followed.
        conversation_id: Uuid,
        /// Single participant, or `None` for every participant.
        user_id: Option<Uuid>,
    },
    /// `presence/{user_id}`: online flag.
    Presence {
        /// Tracked user.
        user_id: Uuid,
    },
    /// `notifications/{user_id}`: new-message notices for the user.
    Notifications {
        /// Recipient.
        user_id: Uuid,
    },
}

impl ChannelPath {
    /// Replaces the bare `conversations` form with the caller's own inbox.
    #[must_use]
    pub fn resolved_for(self, requester: Uuid) -> Self {
        match self {
            Self::Conversations { user_id: None } => Self::Conversations {
                user_id: Some(requester),
            },
            other => other,
        }
    }

    /// Key of the broadcast channel carrying this path. Per-participant typing
    /// paths share their conversation's channel.
    #[must_use]
    pub fn channel_key(&self) -> String {
        match self {
            Self::Typing {
                conversation_id, ..
            } => format!("typing/{conversation_id}"),
            other => other.to_string(),
        }
    }

    /// Whether events published on `other` are delivered to a subscriber of `self`.
    #[must_use]
    pub fn covers(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::Typing {
                    conversation_id: a,
                    user_id: None,
                },
                Self::Typing {
                    conversation_id: b,
                    ..
                },
            ) => a == b,
            (Self::Conversations { user_id: None }, Self::Conversations { .. }) => true,
            _ => self == other,
        }
    }

    /// Whether `event` belongs on this path. The hub refuses anything else.
    #[must_use]
    pub fn accepts(&self, event: &RealtimeEvent) -> bool {
        match (self, event) {
            (Self::Messages { conversation_id }, RealtimeEvent::MessageCreated(event)) => {
                event.message.conversation_id == *conversation_id
            }
            (Self::Messages { conversation_id }, RealtimeEvent::MessagesSeen(event)) => {
                event.conversation_id == *conversation_id
            }
            (Self::Conversations { user_id }, RealtimeEvent::ConversationUpdated(event)) => {
                user_id.is_none_or(|user_id| event.conversation.is_participant(user_id))
            }
            (
                Self::Typing {
                    conversation_id,
                    user_id,
                },
                RealtimeEvent::TypingChanged(event),
            ) => {
                event.conversation_id == *conversation_id
                    && user_id.is_none_or(|user_id| event.user_id == user_id)
            }
            (Self::Presence { user_id }, RealtimeEvent::PresenceChanged(event)) => {
                event.user_id == *user_id
            }
            (Self::Notifications { user_id }, RealtimeEvent::NotificationMessage(event)) => {
                event.recipient_id == *user_id
            }
            _ => false,
        }
    }

    /// Whether the latest event on this path is retained and replayed to new subscribers.
    #[must_use]
    pub fn is_retained(&self) -> bool {
        matches!(
            self,
            Self::Presence { .. }
                | Self::Typing {
                    user_id: Some(_),
                    ..
                }
        )
    }
}

impl fmt::Display for ChannelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Messages { conversation_id } => write!(f, "messages/{conversation_id}"),
            Self::Conversations { user_id: None } => f.write_str("conversations"),
            Self::Conversations {
                user_id: Some(user_id),
            } => write!(f, "conversations/{user_id}"),
            Self::Typing {
                conversation_id,
                user_id: None,
            } => write!(f, "typing/{conversation_id}"),
            Self::Typing {
                conversation_id,
                user_id: Some(user_id),
            } => write!(f, "typing/{conversation_id}/{user_id}"),
            Self::Presence { user_id } => write!(f, "presence/{user_id}"),
            Self::Notifications { user_id } => write!(f, "notifications/{user_id}"),
        }
    }
}

impl FromStr for ChannelPath {
    type Err = PathParseError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || PathParseError(raw.to_string());
        let id = |segment: &str| Uuid::parse_str(segment).map_err(|_| invalid());

        let segments: Vec<&str> = raw.trim().trim_matches('/').split('/').collect();
        match segments.as_slice() {
            ["messages", cid] => Ok(Self::Messages {
                conversation_id: id(*cid)?,
            }),
            ["conversations"] => Ok(Self::Conversations { user_id: None }),
            ["conversations", uid] => Ok(Self::Conversations {
                user_id: Some(id(*uid)?),
            }),
            ["typing", cid] => Ok(Self::Typing {
                conversation_id: id(*cid)?,
                user_id: None,
            }),
            ["typing", cid, uid] => Ok(Self::Typing {
                conversation_id: id(*cid)?,
                user_id: Some(id(*uid)?),
            }),
            ["presence", uid] => Ok(Self::Presence { user_id: id(*uid)? }),
            ["notifications", uid] => Ok(Self::Notifications { user_id: id(*uid)? }),
            _ => Err(invalid()),
        }
    }
}

impl Serialize for ChannelPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ChannelPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
