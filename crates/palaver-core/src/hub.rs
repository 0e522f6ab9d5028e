//! Process-level room registry.
//!
//! Rooms are created lazily on first connect and deleted lazily too: when a
//! room reports empty, deletion is scheduled after a grace period so a
//! quick reconnect lands in the same room instance instead of racing a
//! teardown. The deletion re-checks emptiness under the hub lock before
//! committing.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::auth::Authenticator;
use crate::bus::EventBus;
use crate::config::RoomConfig;
use crate::room::{OnEmpty, Room};
use crate::sfu::SfuClient;

/// Aggregate counts for the stats endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct HubStats {
    pub rooms: usize,
    pub participants: usize,
    pub waiting: usize,
}

pub struct Hub {
    config: RoomConfig,
    /// Opaque sender marker shared by all rooms of this instance.
    instance_tag: String,
    authenticator: Arc<dyn Authenticator>,
    bus: Option<Arc<dyn EventBus>>,
    sfu: Option<Arc<dyn SfuClient>>,
    inner: Mutex<HubInner>,
}

struct HubInner {
    rooms: HashMap<String, Arc<Room>>,
    /// One pending deletion timer per room id, so stacked empty callbacks
    /// do not stack timers.
    pending_cleanup: HashMap<String, JoinHandle<()>>,
}

impl Hub {
    pub fn new(
        config: RoomConfig,
        authenticator: Arc<dyn Authenticator>,
        bus: Option<Arc<dyn EventBus>>,
        sfu: Option<Arc<dyn SfuClient>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            instance_tag: Uuid::new_v4().to_string(),
            authenticator,
            bus,
            sfu,
            inner: Mutex::new(HubInner {
                rooms: HashMap::new(),
                pending_cleanup: HashMap::new(),
            }),
        })
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    pub fn authenticator(&self) -> Arc<dyn Authenticator> {
        self.authenticator.clone()
    }

    /// Fetch or lazily create a room. A pending deletion for the id is
    /// cancelled, so reconnects during the grace period keep their room.
    pub async fn get_or_create_room(self: &Arc<Self>, room_id: &str) -> Arc<Room> {
        let mut inner = self.inner.lock().await;
        if let Some(timer) = inner.pending_cleanup.remove(room_id) {
            timer.abort();
            tracing::debug!(room = %room_id, "pending deletion cancelled by reconnect");
        }
        if let Some(room) = inner.rooms.get(room_id) {
            return room.clone();
        }

        let hub = Arc::downgrade(self);
        let on_empty: OnEmpty = Arc::new(move |room_id: String| {
            let Some(hub) = hub.upgrade() else { return };
            tokio::spawn(async move { hub.schedule_cleanup(room_id).await });
        });
        let room = Room::new(
            room_id,
            self.config.clone(),
            self.bus.clone(),
            self.sfu.clone(),
            self.instance_tag.clone(),
            on_empty,
        );
        room.spawn_bus_bridge();
        inner.rooms.insert(room_id.to_owned(), room.clone());
        tracing::info!(room = %room_id, "room created");
        room
    }

    pub async fn room(&self, room_id: &str) -> Option<Arc<Room>> {
        self.inner.lock().await.rooms.get(room_id).cloned()
    }

    /// Arm the grace timer for a possibly-empty room. No-op when a timer is
    /// already pending or the room is already gone.
    async fn schedule_cleanup(self: &Arc<Self>, room_id: String) {
        let mut inner = self.inner.lock().await;
        if !inner.rooms.contains_key(&room_id) || inner.pending_cleanup.contains_key(&room_id) {
            return;
        }
        let hub = Arc::downgrade(self);
        let grace = self.config.cleanup_grace;
        let timer_room = room_id.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(hub) = hub.upgrade() else { return };
            hub.delete_if_empty(&timer_room).await;
        });
        inner.pending_cleanup.insert(room_id.clone(), timer);
        tracing::debug!(room = %room_id, grace = ?grace, "room deletion scheduled");
    }

    /// The timer callback: re-check emptiness under the hub lock, then
    /// delete or keep.
    async fn delete_if_empty(&self, room_id: &str) {
        let room = {
            let mut inner = self.inner.lock().await;
            inner.pending_cleanup.remove(room_id);
            let Some(room) = inner.rooms.get(room_id).cloned() else {
                return;
            };
            if !room.is_empty().await {
                tracing::debug!(room = %room_id, "room repopulated, keeping");
                return;
            }
            inner.rooms.remove(room_id);
            room
        };
        room.close(self.config.shutdown_timeout).await;
        tracing::info!(room = %room_id, "empty room deleted");
    }

    pub async fn stats(&self) -> HubStats {
        let rooms: Vec<Arc<Room>> = self.inner.lock().await.rooms.values().cloned().collect();
        let mut stats = HubStats {
            rooms: rooms.len(),
            ..HubStats::default()
        };
        for room in rooms {
            let room_stats = room.stats().await;
            stats.participants += room_stats.participants;
            stats.waiting += room_stats.waiting;
        }
        stats
    }

    /// Close every room and drop the registry. Bounded per room by the
    /// configured shutdown timeout.
    pub async fn shutdown(&self) {
        let rooms: Vec<Arc<Room>> = {
            let mut inner = self.inner.lock().await;
            for (_, timer) in inner.pending_cleanup.drain() {
                timer.abort();
            }
            inner.rooms.drain().map(|(_, room)| room).collect()
        };
        for room in rooms {
            room.close(self.config.shutdown_timeout).await;
        }
        tracing::info!("hub shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing::StaticAuthenticator;
    use crate::client::Client;
    use std::time::Duration;

    fn test_hub(grace: Duration) -> Arc<Hub> {
        let config = RoomConfig {
            cleanup_grace: grace,
            ..RoomConfig::default()
        };
        Hub::new(config, Arc::new(StaticAuthenticator), None, None)
    }

    async fn join(hub: &Arc<Hub>, room_id: &str, user: &str) -> Arc<Room> {
        let room = hub.get_or_create_room(room_id).await;
        let (client, _rx) = Client::new(user, user.to_uppercase(), 64);
        room.admit(client).await.expect("admit");
        room
    }

    // An empty room is deleted once the grace period runs out...
    #[tokio::test(start_paused = true)]
    async fn empty_room_is_deleted_after_grace() {
        let hub = test_hub(Duration::from_secs(5));
        let room = join(&hub, "R1", "alice").await;
        room.remove_client("alice").await;

        // Callback and timer get a chance to arm, then the clock runs out.
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(hub.room("R1").await.is_none());
    }

    // ...and a reconnect within the grace period keeps the same instance.
    #[tokio::test(start_paused = true)]
    async fn reconnect_during_grace_cancels_deletion() {
        let hub = test_hub(Duration::from_secs(5));
        let room = join(&hub, "R1", "alice").await;
        room.remove_client("alice").await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        let again = hub.get_or_create_room("R1").await;
        assert!(Arc::ptr_eq(&room, &again));
        let (client, _rx) = Client::new("alice", "Alice", 64);
        again.admit(client).await.unwrap();

        tokio::time::sleep(Duration::from_secs(10)).await;
        let kept = hub.room("R1").await.expect("room kept");
        assert!(Arc::ptr_eq(&room, &kept));
    }

    // The deletion callback re-checks emptiness: a reconnect that raced the
    // timer (without passing through get_or_create_room) still wins.
    #[tokio::test(start_paused = true)]
    async fn deletion_keeps_repopulated_room() {
        let hub = test_hub(Duration::from_secs(5));
        let room = join(&hub, "R1", "alice").await;
        room.remove_client("alice").await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Repopulate directly, mimicking an admission in flight while the
        // timer fires.
        let (client, _rx) = Client::new("bob", "Bob", 64);
        room.admit(client).await.unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(hub.room("R1").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_empty_reports_do_not_stack_timers() {
        let hub = test_hub(Duration::from_secs(5));
        let room = join(&hub, "R1", "alice").await;

        // Two empty cycles in quick succession.
        room.remove_client("alice").await;
        let (client, _rx) = Client::new("alice", "Alice", 64);
        room.admit(client).await.unwrap();
        room.remove_client("alice").await;
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(hub.inner.lock().await.pending_cleanup.len(), 1);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(hub.room("R1").await.is_none());
        assert!(hub.inner.lock().await.pending_cleanup.is_empty());
    }

    #[tokio::test]
    async fn stats_aggregate_across_rooms() {
        let hub = test_hub(Duration::from_secs(5));
        join(&hub, "R1", "alice").await;
        join(&hub, "R2", "carol").await;
        let r1 = hub.room("R1").await.unwrap();
        let (bob, _rx) = Client::new("bob", "Bob", 64);
        r1.admit(bob).await.unwrap();

        let stats = hub.stats().await;
        assert_eq!(stats.rooms, 2);
        assert_eq!(stats.participants, 2);
        assert_eq!(stats.waiting, 1);
    }

    #[tokio::test]
    async fn shutdown_closes_all_rooms() {
        let hub = test_hub(Duration::from_secs(5));
        let room = join(&hub, "R1", "alice").await;
        hub.shutdown().await;
        assert!(hub.room("R1").await.is_none());
        assert!(room.cancel_token().is_cancelled());
        assert!(room.is_empty().await);
    }
}
