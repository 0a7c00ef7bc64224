use std::{fmt, sync::Arc, time::Duration};

use shared::config::server::Config;
use sqlx::PgPool;

use crate::{
    realtime::{PresenceTracker, RealtimeHub, TypingIndicator},
    services::ChatSyncService,
    store::{ChatStore, Directory, MemoryStore, PgStore},
};

/// Application state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    pub(crate) pool: Option<PgPool>,
    pub(crate) store: Arc<dyn ChatStore>,
    pub(crate) hub: Arc<RealtimeHub>,
    pub(crate) presence: Arc<PresenceTracker>,
    pub(crate) chat: Arc<ChatSyncService>,
    pub(crate) config: Arc<Config>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("has_pool", &self.pool.is_some())
            .field("hub", &self.hub)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Wires the realtime layer and the sync service over the given stores.
    pub fn new(
        config: Arc<Config>,
        pool: Option<PgPool>,
        store: Arc<dyn ChatStore>,
        directory: Arc<dyn Directory>,
    ) -> Self {
        let hub = Arc::new(RealtimeHub::new(config.realtime.channel_capacity));
        let typing = Arc::new(TypingIndicator::new(
            hub.clone(),
            Duration::from_millis(config.realtime.typing_ttl_ms),
        ));
        let presence = Arc::new(PresenceTracker::new(hub.clone(), typing.clone()));
        let chat = Arc::new(ChatSyncService::new(
            store.clone(),
            directory,
            hub.clone(),
            typing,
            config.chat.clone(),
        ));

        Self {
            pool,
            store,
            hub,
            presence,
            chat,
            config,
        }
    }

    #[must_use]
    pub fn with_postgres(config: Arc<Config>, pool: PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool.clone()));
        Self::new(config, Some(pool), store.clone(), store)
    }

    #[must_use]
    pub fn in_memory(config: Arc<Config>, store: Arc<MemoryStore>) -> Self {
        Self::new(config, None, store.clone(), store)
    }

    #[must_use]
    pub fn hub(&self) -> &Arc<RealtimeHub> {
        &self.hub
    }

    #[must_use]
    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }
}
