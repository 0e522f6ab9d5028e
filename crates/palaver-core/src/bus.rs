//! Cross-instance event bus.
//!
//! Each room subscribes to one topic named by its room id. Payloads are
//! marshalled envelopes; the sender marker is an opaque per-instance tag
//! used only to drop our own echoes. Replays delivered by the bus go
//! through the room's locked broadcast with publishing suppressed, which
//! is what breaks re-publication loops.
//!
//! [`LocalBus`] is the in-process implementation used for single-node
//! deployments and tests; the server crate provides a Redis-backed one.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use futures_util::future::BoxFuture;
use futures_util::stream::BoxStream;
use tokio::sync::broadcast;

/// One delivered bus frame.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Opaque instance tag of the publisher.
    pub sender: String,
    /// Marshalled envelope bytes.
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus transport error: {0}")]
    Transport(String),
    #[error("bus subscription closed")]
    Closed,
}

/// Stream of frames for one topic. Finite if the transport closes the
/// subscription.
pub type BusStream = BoxStream<'static, BusMessage>;

/// Pub/sub transport between instances, plus a best-effort room membership
/// mirror (a set per room) that peer instances can consult.
pub trait EventBus: Send + Sync {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        sender: &'a str,
        payload: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), BusError>>;

    fn subscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<BusStream, BusError>>;

    fn add_room_member<'a>(
        &'a self,
        room_id: &'a str,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<(), BusError>>;

    fn remove_room_member<'a>(
        &'a self,
        room_id: &'a str,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<(), BusError>>;
}

/// In-process bus over tokio broadcast channels. Lossy for laggards, like
/// any real transport; a receiver that falls behind skips ahead with a
/// warning instead of stalling publishers.
pub struct LocalBus {
    capacity: usize,
    topics: Mutex<HashMap<String, broadcast::Sender<BusMessage>>>,
    members: Mutex<HashMap<String, HashSet<String>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            topics: Mutex::new(HashMap::new()),
            members: Mutex::new(HashMap::new()),
        }
    }

    fn topic_sender(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        let mut topics = self.topics.lock().expect("topics lock poisoned");
        topics
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Current membership mirror for a room.
    pub fn room_members(&self, room_id: &str) -> Vec<String> {
        self.members
            .lock()
            .expect("members lock poisoned")
            .get(room_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus for LocalBus {
    fn publish<'a>(
        &'a self,
        topic: &'a str,
        sender: &'a str,
        payload: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), BusError>> {
        let tx = self.topic_sender(topic);
        let msg = BusMessage {
            sender: sender.to_owned(),
            payload,
        };
        Box::pin(async move {
            // A topic with no subscribers is not an error.
            let _ = tx.send(msg);
            Ok(())
        })
    }

    fn subscribe<'a>(&'a self, topic: &'a str) -> BoxFuture<'a, Result<BusStream, BusError>> {
        let rx = self.topic_sender(topic).subscribe();
        let topic = topic.to_owned();
        Box::pin(async move {
            let stream = futures_util::stream::unfold(rx, move |mut rx| {
                let topic = topic.clone();
                async move {
                    loop {
                        match rx.recv().await {
                            Ok(msg) => return Some((msg, rx)),
                            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                                tracing::warn!(topic = %topic, skipped, "bus subscriber lagged");
                            }
                            Err(broadcast::error::RecvError::Closed) => return None,
                        }
                    }
                }
            });
            Ok(Box::pin(stream) as BusStream)
        })
    }

    fn add_room_member<'a>(
        &'a self,
        room_id: &'a str,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<(), BusError>> {
        self.members
            .lock()
            .expect("members lock poisoned")
            .entry(room_id.to_owned())
            .or_default()
            .insert(user_id.to_owned());
        Box::pin(async { Ok(()) })
    }

    fn remove_room_member<'a>(
        &'a self,
        room_id: &'a str,
        user_id: &'a str,
    ) -> BoxFuture<'a, Result<(), BusError>> {
        let mut members = self.members.lock().expect("members lock poisoned");
        if let Some(set) = members.get_mut(room_id) {
            set.remove(user_id);
            if set.is_empty() {
                members.remove(room_id);
            }
        }
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn publish_reaches_subscriber_with_sender_tag() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe("room-1").await.expect("subscribe");
        bus.publish("room-1", "instance-a", vec![1, 2, 3])
            .await
            .expect("publish");

        let msg = sub.next().await.expect("message");
        assert_eq!(msg.sender, "instance-a");
        assert_eq!(msg.payload, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn topics_are_isolated() {
        let bus = LocalBus::new();
        let mut sub = bus.subscribe("room-1").await.expect("subscribe");
        bus.publish("room-2", "instance-a", vec![9])
            .await
            .expect("publish");
        bus.publish("room-1", "instance-a", vec![1])
            .await
            .expect("publish");

        let msg = sub.next().await.expect("message");
        assert_eq!(msg.payload, vec![1]);
    }

    #[tokio::test]
    async fn membership_mirror_tracks_adds_and_removes() {
        let bus = LocalBus::new();
        bus.add_room_member("room-1", "alice").await.unwrap();
        bus.add_room_member("room-1", "bob").await.unwrap();
        bus.remove_room_member("room-1", "alice").await.unwrap();

        assert_eq!(bus.room_members("room-1"), vec!["bob".to_owned()]);
    }
}
