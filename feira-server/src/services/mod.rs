//! Application services sitting between the HTTP layer and the stores.
pub mod chat_sync;

pub use chat_sync::{ChatError, ChatResult, ChatSyncService, StartedConversation};
