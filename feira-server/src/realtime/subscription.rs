use std::{
    collections::VecDeque,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{Stream, StreamExt, future, stream, stream::BoxStream};
use metrics::counter;
use shared::realtime::{ChannelPath, RealtimeEnvelope};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};
use tracing::{debug, warn};

use super::presence::{ConnectionId, PresenceTracker};

/// A live subscription to one fan-out path.
///
/// Delivery stops as soon as the handle is dropped or [`Subscription::unsubscribe`] is called.
#[derive(Debug)]
pub struct Subscription {
    path: ChannelPath,
    snapshot: VecDeque<RealtimeEnvelope>,
    receiver: broadcast::Receiver<RealtimeEnvelope>,
}

impl Subscription {
    pub(super) fn new(
        path: ChannelPath,
        snapshot: Vec<RealtimeEnvelope>,
        receiver: broadcast::Receiver<RealtimeEnvelope>,
    ) -> Self {
        Self {
            path,
            snapshot: snapshot.into(),
            receiver,
        }
    }

    #[must_use]
    pub fn path(&self) -> ChannelPath {
        self.path
    }

    /// Next envelope, or `None` once the hub is gone.
    ///
    /// A subscriber that falls behind the channel capacity skips the overwritten
    /// events; the durable store remains the way to catch up.
    pub async fn recv(&mut self) -> Option<RealtimeEnvelope> {
        if let Some(envelope) = self.snapshot.pop_front() {
            return Some(envelope);
        }

        loop {
            match self.receiver.recv().await {
                Ok(envelope) if self.path.covers(&envelope.path) => return Some(envelope),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => record_lag(&self.path, skipped),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn unsubscribe(self) {
        debug!(path = %self.path, "unsubscribed");
    }

    /// Snapshot followed by live events, with the same filtering as [`Subscription::recv`].
    #[must_use]
    pub fn into_stream(self) -> BoxStream<'static, RealtimeEnvelope> {
        let Self {
            path,
            snapshot,
            receiver,
        } = self;
        let live = BroadcastStream::new(receiver).filter_map(move |item| {
            let delivered = match item {
                Ok(envelope) if path.covers(&envelope.path) => Some(envelope),
                Ok(_) => None,
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    record_lag(&path, skipped);
                    None
                }
            };
            future::ready(delivered)
        });
        stream::iter(snapshot).chain(live).boxed()
    }
}

fn record_lag(path: &ChannelPath, skipped: u64) {
    warn!(%path, skipped, "realtime subscriber lagged");
    counter!("feira_realtime_lagged_events_total").increment(skipped);
}

/// The outgoing stream of one realtime connection.
///
/// When the transport drops it without a clean disconnect, the connection's
/// on-disconnect actions run.
pub struct ConnectionStream<T> {
    inner: BoxStream<'static, T>,
    presence: Arc<PresenceTracker>,
    connection_id: ConnectionId,
}

impl<T> ConnectionStream<T> {
    pub fn new(
        inner: BoxStream<'static, T>,
        presence: Arc<PresenceTracker>,
        connection_id: ConnectionId,
    ) -> Self {
        Self {
            inner,
            presence,
            connection_id,
        }
    }
}

impl<T> std::fmt::Debug for ConnectionStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionStream")
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

impl<T> Stream for ConnectionStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl<T> Drop for ConnectionStream<T> {
    fn drop(&mut self) {
        let presence = Arc::clone(&self.presence);
        let connection_id = self.connection_id;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    presence.connection_dropped(connection_id).await;
                });
            }
            Err(_) => warn!(%connection_id, "no runtime to run on-disconnect actions"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::RealtimeHub;
    use futures::StreamExt;
    use shared::realtime::{NotificationEvent, RealtimeEvent};
    use uuid::Uuid;

    fn notification(recipient_id: Uuid) -> RealtimeEvent {
        RealtimeEvent::NotificationMessage(NotificationEvent {
            recipient_id,
            conversation_id: Uuid::new_v4(),
            message_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            preview: "oi".into(),
        })
    }

    #[tokio::test]
    async fn stream_yields_events_in_publish_order() {
        let hub = RealtimeHub::new(8);
        let user = Uuid::new_v4();
        let path = ChannelPath::Notifications { user_id: user };

        let mut stream = hub.subscribe(path).await.into_stream();
        for _ in 0..3 {
            hub.publish(path, notification(user)).await.unwrap();
        }

        let sequences: Vec<u64> = stream
            .by_ref()
            .take(3)
            .map(|envelope| envelope.sequence)
            .collect()
            .await;
        assert_eq!(sequences, [1, 2, 3]);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_to_the_newest_events() {
        let hub = RealtimeHub::new(2);
        let user = Uuid::new_v4();
        let path = ChannelPath::Notifications { user_id: user };

        let mut subscription = hub.subscribe(path).await;
        for _ in 0..5 {
            hub.publish(path, notification(user)).await.unwrap();
        }

        assert_eq!(subscription.recv().await.unwrap().sequence, 4);
        assert_eq!(subscription.recv().await.unwrap().sequence, 5);
    }

    #[tokio::test]
    async fn lagging_stream_keeps_delivering_after_the_gap() {
        let hub = RealtimeHub::new(2);
        let user = Uuid::new_v4();
        let path = ChannelPath::Notifications { user_id: user };

        let stream = hub.subscribe(path).await.into_stream();
        for _ in 0..5 {
            hub.publish(path, notification(user)).await.unwrap();
        }

        let sequences: Vec<u64> = stream.take(2).map(|envelope| envelope.sequence).collect().await;
        assert_eq!(sequences, [4, 5]);
    }
}
