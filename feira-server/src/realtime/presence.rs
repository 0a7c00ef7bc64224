use std::{
    collections::{HashMap, HashSet},
    fmt,
    str::FromStr,
    sync::Arc,
};

use metrics::{counter, gauge};
use shared::realtime::{ChannelPath, PresenceEvent, RealtimeEvent};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{hub::BroadcastStore, typing::TypingIndicator};

/// Identifies one realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for ConnectionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Work the server performs when a connection ends, however it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectAction {
    GoOffline,
    ClearTyping,
}

/// Returned by [`PresenceTracker::connect`]. The token is cancelled on a clean
/// disconnect so the connection's stream can end.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: Uuid,
    pub token: CancellationToken,
}

#[derive(Debug)]
struct Registered {
    user_id: Uuid,
    token: CancellationToken,
    on_disconnect: Vec<DisconnectAction>,
}

#[derive(Debug, Default)]
struct PresenceState {
    connections: HashMap<ConnectionId, Registered>,
    by_user: HashMap<Uuid, HashSet<ConnectionId>>,
}

/// Tracks which users hold at least one open realtime connection.
pub struct PresenceTracker {
    broadcast: Arc<dyn BroadcastStore>,
    typing: Arc<TypingIndicator>,
    state: Mutex<PresenceState>,
}

impl fmt::Debug for PresenceTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresenceTracker")
            .field("typing", &self.typing)
            .finish_non_exhaustive()
    }
}

impl PresenceTracker {
    pub fn new(broadcast: Arc<dyn BroadcastStore>, typing: Arc<TypingIndicator>) -> Self {
        Self {
            broadcast,
            typing,
            state: Mutex::new(PresenceState::default()),
        }
    }

    /// Registers a connection for `user_id` and marks the user online.
    #[instrument(name = "presence.connect", skip(self))]
    pub async fn connect(&self, user_id: Uuid) -> ConnectionHandle {
        let handle = ConnectionHandle {
            id: ConnectionId::new(),
            user_id,
            token: CancellationToken::new(),
        };

        let mut state = self.state.lock().await;
        state.connections.insert(
            handle.id,
            Registered {
                user_id,
                token: handle.token.clone(),
                on_disconnect: vec![DisconnectAction::GoOffline, DisconnectAction::ClearTyping],
            },
        );
        let user_connections = state.by_user.entry(user_id).or_default();
        user_connections.insert(handle.id);
        let came_online = user_connections.len() == 1;
        record_connections(state.connections.len());

        // Published under the lock so online/offline transitions keep their order.
        if came_online {
            self.publish(user_id, true).await;
        }
        drop(state);

        info!(connection_id = %handle.id, "realtime connection opened");
        handle
    }

    /// Client-initiated disconnect. Returns `false` for unknown or already closed connections.
    #[instrument(name = "presence.disconnect_clean", skip(self))]
    pub async fn disconnect_clean(&self, connection_id: ConnectionId) -> bool {
        let closed = self.close(connection_id).await;
        if closed {
            counter!("feira_realtime_disconnects_total", "kind" => "clean").increment(1);
        }
        closed
    }

    /// Transport-level drop. Runs the registered on-disconnect actions; a no-op
    /// after a clean disconnect.
    #[instrument(name = "presence.connection_dropped", skip(self))]
    pub async fn connection_dropped(&self, connection_id: ConnectionId) -> bool {
        let closed = self.close(connection_id).await;
        if closed {
            counter!("feira_realtime_disconnects_total", "kind" => "dropped").increment(1);
        }
        closed
    }

    /// Closes every open connection, running their on-disconnect actions.
    /// Used on shutdown so open streams end and the listener can drain.
    pub async fn disconnect_all(&self) -> usize {
        let open: Vec<ConnectionId> = self.state.lock().await.connections.keys().copied().collect();
        let mut closed = 0;
        for connection_id in open {
            if self.close(connection_id).await {
                closed += 1;
            }
        }
        closed
    }

    /// Local lookup; no broadcast round trip.
    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.state
            .lock()
            .await
            .by_user
            .get(&user_id)
            .is_some_and(|connections| !connections.is_empty())
    }

    /// User holding the connection, if it is still open.
    pub async fn owner(&self, connection_id: ConnectionId) -> Option<Uuid> {
        self.state
            .lock()
            .await
            .connections
            .get(&connection_id)
            .map(|registered| registered.user_id)
    }

    async fn close(&self, connection_id: ConnectionId) -> bool {
        let mut state = self.state.lock().await;
        let Some(registered) = state.connections.remove(&connection_id) else {
            debug!(%connection_id, "connection already closed");
            return false;
        };
        registered.token.cancel();

        let user_id = registered.user_id;
        let last_connection = match state.by_user.get_mut(&user_id) {
            Some(connections) => {
                connections.remove(&connection_id);
                connections.is_empty()
            }
            None => true,
        };
        if last_connection {
            state.by_user.remove(&user_id);
        }
        record_connections(state.connections.len());

        if last_connection {
            for action in &registered.on_disconnect {
                match action {
                    DisconnectAction::GoOffline => self.publish(user_id, false).await,
                    DisconnectAction::ClearTyping => self.typing.clear_user(user_id).await,
                }
            }
        }
        drop(state);

        info!(%connection_id, %user_id, last_connection, "realtime connection closed");
        true
    }

    async fn publish(&self, user_id: Uuid, online: bool) {
        let event = RealtimeEvent::PresenceChanged(PresenceEvent { user_id, online });
        if let Err(err) = self
            .broadcast
            .mirror(ChannelPath::Presence { user_id }, event)
            .await
        {
            warn!(%user_id, online, error = %err, "presence broadcast failed");
            counter!("feira_broadcast_mirror_failures_total", "kind" => "presence").increment(1);
        }
    }
}

fn record_connections(open: usize) {
    gauge!("feira_realtime_connections").set(f64::from(u32::try_from(open).unwrap_or(u32::MAX)));
}
