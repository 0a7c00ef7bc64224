use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use metrics::counter;
use shared::realtime::{ChannelPath, RealtimeEvent, TypingEvent};
use tokio::{sync::Mutex, time::Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use super::hub::BroadcastStore;

#[derive(Debug, Clone, Copy)]
struct TypingFlag {
    generation: u64,
    deadline: Instant,
}

/// Per-conversation, per-user typing flags that expire on their own.
///
/// Repeated keystrokes only push the deadline out; subscribers see one
/// `typing = true` per burst and one `typing = false` when it ends.
pub struct TypingIndicator {
    broadcast: Arc<dyn BroadcastStore>,
    ttl: Duration,
    flags: Mutex<HashMap<(Uuid, Uuid), TypingFlag>>,
    generation: AtomicU64,
}

impl fmt::Debug for TypingIndicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypingIndicator")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl TypingIndicator {
    pub fn new(broadcast: Arc<dyn BroadcastStore>, ttl: Duration) -> Self {
        Self {
            broadcast,
            ttl,
            flags: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Sets the flag and (re)arms its expiry. Returns `true` when the flag was newly raised.
    pub async fn start_typing(self: &Arc<Self>, conversation_id: Uuid, user_id: Uuid) -> bool {
        let deadline = Instant::now() + self.ttl;
        let mut flags = self.flags.lock().await;

        if let Some(flag) = flags.get_mut(&(conversation_id, user_id)) {
            flag.deadline = deadline;
            return false;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        flags.insert(
            (conversation_id, user_id),
            TypingFlag {
                generation,
                deadline,
            },
        );
        self.publish(conversation_id, user_id, true).await;
        drop(flags);

        tokio::spawn(expire(
            Arc::downgrade(self),
            conversation_id,
            user_id,
            generation,
            deadline,
        ));
        true
    }

    /// Clears the flag immediately. Returns `true` when it was set.
    pub async fn stop_typing(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        let mut flags = self.flags.lock().await;
        if flags.remove(&(conversation_id, user_id)).is_none() {
            return false;
        }
        self.publish(conversation_id, user_id, false).await;
        true
    }

    /// Clears every flag `user_id` holds, in any conversation.
    pub async fn clear_user(&self, user_id: Uuid) {
        let mut flags = self.flags.lock().await;
        let held: Vec<(Uuid, Uuid)> = flags
            .keys()
            .filter(|(_, typist)| *typist == user_id)
            .copied()
            .collect();
        for key in held {
            flags.remove(&key);
            self.publish(key.0, key.1, false).await;
        }
    }

    pub async fn is_typing(&self, conversation_id: Uuid, user_id: Uuid) -> bool {
        self.flags
            .lock()
            .await
            .contains_key(&(conversation_id, user_id))
    }

    async fn publish(&self, conversation_id: Uuid, user_id: Uuid, typing: bool) {
        let path = ChannelPath::Typing {
            conversation_id,
            user_id: Some(user_id),
        };
        let event = RealtimeEvent::TypingChanged(TypingEvent {
            conversation_id,
            user_id,
            typing,
        });
        if let Err(err) = self.broadcast.mirror(path, event).await {
            warn!(%conversation_id, %user_id, typing, error = %err, "typing broadcast failed");
            counter!("feira_broadcast_mirror_failures_total", "kind" => "typing").increment(1);
        }
    }
}

async fn expire(
    indicator: Weak<TypingIndicator>,
    conversation_id: Uuid,
    user_id: Uuid,
    generation: u64,
    mut deadline: Instant,
) {
    loop {
        tokio::time::sleep_until(deadline).await;
        let Some(indicator) = indicator.upgrade() else {
            return;
        };

        let mut flags = indicator.flags.lock().await;
        let Some(flag) = flags.get(&(conversation_id, user_id)).copied() else {
            return;
        };
        if flag.generation != generation {
            return;
        }
        if flag.deadline > Instant::now() {
            deadline = flag.deadline;
            continue;
        }

        flags.remove(&(conversation_id, user_id));
        indicator.publish(conversation_id, user_id, false).await;
        counter!("feira_typing_expired_total").increment(1);
        debug!(%conversation_id, %user_id, "typing flag expired");
        return;
    }
}
