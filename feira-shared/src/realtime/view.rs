//! Client-side reconcilers. Each view starts from a durable fetch and folds
//! live envelopes on top; the durable order stays canonical and the stream is
//! an append-only overlay.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use super::event::{RealtimeEnvelope, RealtimeEvent};
use crate::models::{ConversationSummary, Message};

/// A message the local user sent that the server has not echoed back yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    /// Client-side handle.
    pub local_id: Uuid,
    /// Local user.
    pub sender_id: Uuid,
    /// Body as typed.
    pub content: String,
}

/// Messages of one conversation: history, live overlay and optimistic sends.
#[derive(Debug, Clone, Default)]
pub struct MessageTimeline {
    canonical: Vec<Message>,
    overlay: Vec<Message>,
    pending: Vec<PendingMessage>,
    known: HashSet<Uuid>,
}

impl MessageTimeline {
    /// Starts from the ascending history returned by the message listing.
    #[must_use]
    pub fn from_history(history: Vec<Message>) -> Self {
        let mut timeline = Self::default();
        timeline.replace_history(history);
        timeline
    }

    /// Replaces the canonical history after a refetch. Overlay entries now
    /// covered by the history are dropped. A pending send is resolved only by
    /// a message this timeline had not seen before, one message per send.
    pub fn replace_history(&mut self, history: Vec<Message>) {
        let mut fresh: Vec<&Message> = history
            .iter()
            .filter(|message| !self.known.contains(&message.id))
            .collect();
        self.pending.retain(|pending| {
            match fresh.iter().position(|message| {
                message.sender_id == pending.sender_id && message.content == pending.content
            }) {
                Some(index) => {
                    fresh.remove(index);
                    false
                }
                None => true,
            }
        });

        let canonical_ids: HashSet<Uuid> = history.iter().map(|message| message.id).collect();
        self.overlay
            .retain(|message| !canonical_ids.contains(&message.id));
        self.known = canonical_ids;
        self.known
            .extend(self.overlay.iter().map(|message| message.id));
        self.canonical = history;
    }

    /// Records an optimistic send and returns its local handle.
    pub fn push_pending(&mut self, sender_id: Uuid, content: impl Into<String>) -> Uuid {
        let local_id = Uuid::new_v4();
        self.pending.push(PendingMessage {
            local_id,
            sender_id,
            content: content.into(),
        });
        local_id
    }

    /// Drops an optimistic send that the server rejected.
    pub fn discard_pending(&mut self, local_id: Uuid) -> Option<PendingMessage> {
        let index = self
            .pending
            .iter()
            .position(|pending| pending.local_id == local_id)?;
        Some(self.pending.remove(index))
    }

    /// Folds a live envelope in. Returns `false` for duplicates and events
    /// this view does not track.
    ///
    /// Deduplication is by message id, so envelopes from a restarted server
    /// (sequences starting over) still land after a refetch.
    pub fn apply(&mut self, envelope: &RealtimeEnvelope) -> bool {
        match &envelope.event {
            RealtimeEvent::MessageCreated(event) => self.insert_live(event.message.clone()),
            RealtimeEvent::MessagesSeen(event) => {
                let ids: HashSet<&Uuid> = event.message_ids.iter().collect();
                let mut changed = false;
                for message in self.canonical.iter_mut().chain(self.overlay.iter_mut()) {
                    if ids.contains(&message.id) && !message.seen {
                        message.seen = true;
                        changed = true;
                    }
                }
                changed
            }
            _ => false,
        }
    }

    fn insert_live(&mut self, message: Message) -> bool {
        if !self.known.insert(message.id) {
            return false;
        }
        if let Some(index) = self.pending.iter().position(|pending| {
            pending.sender_id == message.sender_id && pending.content == message.content
        }) {
            self.pending.remove(index);
        }
        self.overlay.push(message);
        true
    }

    /// Confirmed messages: history first, then live arrivals in delivery order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.canonical.iter().chain(self.overlay.iter())
    }

    /// Optimistic sends still waiting for the server echo.
    #[must_use]
    pub fn pending(&self) -> &[PendingMessage] {
        &self.pending
    }

    /// Number of confirmed messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.canonical.len() + self.overlay.len()
    }

    /// Whether no confirmed message is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The caller's conversation list, newest activity first.
#[derive(Debug, Clone, Default)]
pub struct InboxView {
    entries: HashMap<Uuid, ConversationSummary>,
    incomplete: HashSet<Uuid>,
}

impl InboxView {
    /// Starts from the summaries returned by the conversation listing.
    #[must_use]
    pub fn from_summaries(summaries: Vec<ConversationSummary>) -> Self {
        Self {
            entries: summaries
                .into_iter()
                .map(|summary| (summary.conversation.id, summary))
                .collect(),
            incomplete: HashSet::new(),
        }
    }

    /// Folds a `conversation.updated` envelope in. Updates at the same
    /// activity time are taken, so a seen receipt on the latest message
    /// refreshes its preview. Conversations seen for the first time are added
    /// without participant profiles and reported by [`InboxView::incomplete`]
    /// until a refetch fills them.
    pub fn apply(&mut self, envelope: &RealtimeEnvelope) -> bool {
        let RealtimeEvent::ConversationUpdated(event) = &envelope.event else {
            return false;
        };
        let id = event.conversation.id;
        match self.entries.get_mut(&id) {
            Some(summary) => {
                if event.conversation.last_message_at < summary.conversation.last_message_at {
                    return false;
                }
                summary.conversation = event.conversation.clone();
                if event.last_message.is_some() {
                    summary.last_message.clone_from(&event.last_message);
                }
            }
            None => {
                self.entries.insert(
                    id,
                    ConversationSummary {
                        conversation: event.conversation.clone(),
                        participants: Vec::new(),
                        last_message: event.last_message.clone(),
                    },
                );
                self.incomplete.insert(id);
            }
        }
        true
    }

    /// Replaces every entry with a fresh listing.
    pub fn replace(&mut self, summaries: Vec<ConversationSummary>) {
        *self = Self::from_summaries(summaries);
    }

    /// Conversations ordered by `last_message_at` descending, ties by id.
    #[must_use]
    pub fn conversations(&self) -> Vec<&ConversationSummary> {
        let mut ordered: Vec<&ConversationSummary> = self.entries.values().collect();
        ordered.sort_by(|a, b| {
            b.conversation
                .last_message_at
                .cmp(&a.conversation.last_message_at)
                .then_with(|| a.conversation.id.cmp(&b.conversation.id))
        });
        ordered
    }

    /// Conversations learned from the stream that still lack participant profiles.
    #[must_use]
    pub fn incomplete(&self) -> Vec<Uuid> {
        let mut ids: Vec<Uuid> = self.incomplete.iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}

/// Locally cached online flags; lookups never leave the process.
#[derive(Debug, Clone, Default)]
pub struct PresenceSnapshot {
    online: HashMap<Uuid, bool>,
}

impl PresenceSnapshot {
    /// Folds a `presence.changed` envelope in.
    pub fn apply(&mut self, envelope: &RealtimeEnvelope) -> bool {
        let RealtimeEvent::PresenceChanged(event) = &envelope.event else {
            return false;
        };
        self.online.insert(event.user_id, event.online) != Some(event.online)
    }

    /// Whether `user_id` was last reported online. Unknown users are offline.
    #[must_use]
    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.online.get(&user_id).copied().unwrap_or(false)
    }
}

/// Typing flags of one conversation as seen by `self_id`.
#[derive(Debug, Clone)]
pub struct TypingSnapshot {
    self_id: Uuid,
    typing: HashMap<Uuid, bool>,
}

impl TypingSnapshot {
    /// Empty snapshot for the local user.
    #[must_use]
    pub fn new(self_id: Uuid) -> Self {
        Self {
            self_id,
            typing: HashMap::new(),
        }
    }

    /// Folds a `typing.changed` envelope in.
    pub fn apply(&mut self, envelope: &RealtimeEnvelope) -> bool {
        let RealtimeEvent::TypingChanged(event) = &envelope.event else {
            return false;
        };
        self.typing.insert(event.user_id, event.typing) != Some(event.typing)
    }

    /// Other participants whose flag is set. The local user is never included.
    #[must_use]
    pub fn peers_typing(&self) -> Vec<Uuid> {
        let mut peers: Vec<Uuid> = self
            .typing
            .iter()
            .filter(|(user_id, typing)| **typing && **user_id != self.self_id)
            .map(|(user_id, _)| *user_id)
            .collect();
        peers.sort_unstable();
        peers
    }

    /// Whether any other participant is typing.
    #[must_use]
    pub fn is_peer_typing(&self) -> bool {
        !self.peers_typing().is_empty()
    }
}
