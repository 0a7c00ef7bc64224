use std::collections::HashMap;

use async_trait::async_trait;
use metrics::counter;
use shared::{
    models::Timestamp,
    realtime::{ChannelPath, RealtimeEnvelope, RealtimeEvent},
};
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, instrument};

use super::subscription::Subscription;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("event '{event_type}' does not belong on '{path}'")]
    Rejected {
        path: ChannelPath,
        event_type: &'static str,
    },
    #[error("cannot publish on wildcard path '{0}'")]
    Wildcard(ChannelPath),
    #[error("broadcast store unavailable: {0}")]
    Unavailable(String),
}

/// Write side of the broadcast store. Mirrors are best-effort and never authoritative.
#[async_trait]
pub trait BroadcastStore: Send + Sync + 'static {
    /// Stamps `event` and delivers it to every subscriber covering `path`.
    async fn mirror(
        &self,
        path: ChannelPath,
        event: RealtimeEvent,
    ) -> Result<RealtimeEnvelope, BroadcastError>;
}

#[derive(Debug)]
struct Channel {
    sender: broadcast::Sender<RealtimeEnvelope>,
    sequence: u64,
}

#[derive(Debug, Default)]
struct HubState {
    channels: HashMap<String, Channel>,
    retained: HashMap<ChannelPath, RealtimeEnvelope>,
}

impl HubState {
    fn channel(&mut self, key: String, capacity: usize) -> &mut Channel {
        self.channels.entry(key).or_insert_with(|| Channel {
            sender: broadcast::channel(capacity).0,
            sequence: 0,
        })
    }
}

/// One `tokio::sync::broadcast` channel per fan-out path plus the retained
/// presence and typing values.
///
/// Channels are kept for the life of the process so per-channel sequence
/// numbers never restart.
#[derive(Debug)]
pub struct RealtimeHub {
    capacity: usize,
    state: Mutex<HubState>,
}

impl RealtimeHub {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(HubState::default()),
        }
    }

    /// Publishes `event` on `path`.
    ///
    /// # Errors
    /// Refuses events that do not belong on `path` and wildcard paths.
    #[instrument(name = "hub.publish", skip(self, event), fields(path = %path, event_type = event.event_type()), err)]
    pub async fn publish(
        &self,
        path: ChannelPath,
        event: RealtimeEvent,
    ) -> Result<RealtimeEnvelope, BroadcastError> {
        if is_wildcard(&path) {
            return Err(BroadcastError::Wildcard(path));
        }
        if !path.accepts(&event) {
            return Err(BroadcastError::Rejected {
                path,
                event_type: event.event_type(),
            });
        }

        let event_type = event.event_type();
        let mut state = self.state.lock().await;
        let channel = state.channel(path.channel_key(), self.capacity);
        channel.sequence += 1;
        let envelope = RealtimeEnvelope {
            path,
            sequence: channel.sequence,
            server_timestamp: Timestamp::now(),
            event,
        };
        // No receivers is not an error; the event simply has no audience yet.
        let receivers = channel.sender.send(envelope.clone()).unwrap_or(0);

        if path.is_retained() {
            if is_cleared(&envelope.event) {
                state.retained.remove(&path);
            } else {
                state.retained.insert(path, envelope.clone());
            }
        }
        drop(state);

        counter!("feira_realtime_events_total", "type" => event_type).increment(1);
        debug!(sequence = envelope.sequence, receivers, "event published");
        Ok(envelope)
    }

    /// Opens a subscription on `path`. Retained values covered by `path` are
    /// replayed first, then live events, with no gap or overlap between them.
    pub async fn subscribe(&self, path: ChannelPath) -> Subscription {
        let mut state = self.state.lock().await;
        let mut snapshot: Vec<RealtimeEnvelope> = state
            .retained
            .iter()
            .filter(|(retained, _)| path.covers(retained))
            .map(|(_, envelope)| envelope.clone())
            .collect();
        snapshot.sort_by_key(|envelope| envelope.sequence);
        let receiver = state
            .channel(path.channel_key(), self.capacity)
            .sender
            .subscribe();
        drop(state);

        counter!("feira_realtime_subscriptions_total").increment(1);
        Subscription::new(path, snapshot, receiver)
    }

    /// Latest retained envelope on `path`, if any.
    pub async fn retained(&self, path: &ChannelPath) -> Option<RealtimeEnvelope> {
        self.state.lock().await.retained.get(path).cloned()
    }

    /// Number of live receivers on the channel carrying `path`.
    pub async fn receiver_count(&self, path: &ChannelPath) -> usize {
        self.state
            .lock()
            .await
            .channels
            .get(&path.channel_key())
            .map_or(0, |channel| channel.sender.receiver_count())
    }
}

#[async_trait]
impl BroadcastStore for RealtimeHub {
    async fn mirror(
        &self,
        path: ChannelPath,
        event: RealtimeEvent,
    ) -> Result<RealtimeEnvelope, BroadcastError> {
        self.publish(path, event).await
    }
}

fn is_wildcard(path: &ChannelPath) -> bool {
    matches!(
        path,
        ChannelPath::Conversations { user_id: None } | ChannelPath::Typing { user_id: None, .. }
    )
}

/// A retained typing flag that dropped to false is forgotten rather than replayed.
fn is_cleared(event: &RealtimeEvent) -> bool {
    matches!(event, RealtimeEvent::TypingChanged(typing) if !typing.typing)
}
