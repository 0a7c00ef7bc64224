//! Realtime fan-out vocabulary: addressable paths, tagged event payloads, the
//! hub's delivery envelope and the client-side views that consume them.

pub mod event;
pub mod path;
pub mod view;

pub use event::{
    ConversationEvent, EnvelopeError, MessageEvent, NotificationEvent, PresenceEvent,
    RealtimeEnvelope, RealtimeEvent, SeenEvent, TypingEvent,
};
pub use path::{ChannelPath, PathParseError};
pub use view::{InboxView, MessageTimeline, PendingMessage, PresenceSnapshot, TypingSnapshot};
