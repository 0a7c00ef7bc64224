//! In-process broadcast store, presence tracking and typing flags.

pub mod hub;
pub mod presence;
pub mod subscription;
pub mod typing;

pub use hub::{BroadcastError, BroadcastStore, RealtimeHub};
pub use presence::{ConnectionHandle, ConnectionId, DisconnectAction, PresenceTracker};
pub use subscription::{ConnectionStream, Subscription};
pub use typing::TypingIndicator;
