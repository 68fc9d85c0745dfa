//! Room registry: creates/looks up rooms, and runs the empty-room cleanup
//! timer (cancelled on a fresh connection, armed on the last disconnect).
//!
//! Grounded on rustpad's `Document` GC entry (an `Instant`-gated,
//! task-driven removal of idle documents from a shared map), adapted from a
//! periodic sweep to the per-room cancellable timer the spec calls for.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::ids::RoomId;

use super::room::Room;

pub struct RoomManager {
    rooms: RwLock<HashMap<RoomId, Arc<Room>>>,
    cleanup_tasks: StdMutex<HashMap<RoomId, CancellationToken>>,
}

impl RoomManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { rooms: RwLock::new(HashMap::new()), cleanup_tasks: StdMutex::new(HashMap::new()) })
    }

    pub async fn get(&self, id: &RoomId) -> Option<Arc<Room>> {
        self.rooms.read().await.get(id).cloned()
    }

    /// Cancels any pending cleanup for `id` and returns the room, creating
    /// it if absent.
    pub async fn get_or_create(&self, id: RoomId) -> Arc<Room> {
        self.cancel_cleanup(&id);
        if let Some(room) = self.rooms.read().await.get(&id) {
            return room.clone();
        }
        let mut rooms = self.rooms.write().await;
        rooms.entry(id.clone()).or_insert_with(|| Arc::new(Room::new(id))).clone()
    }

    pub fn cancel_cleanup(&self, id: &RoomId) {
        if let Some(token) = self.cleanup_tasks.lock().unwrap().remove(id) {
            token.cancel();
        }
    }

    /// Replaces any previous timer for `id`. On fire, removes the room if it
    /// is still empty.
    pub fn schedule_cleanup(self: &Arc<Self>, id: RoomId, delay_ms: u64) {
        let token = CancellationToken::new();
        {
            let mut tasks = self.cleanup_tasks.lock().unwrap();
            if let Some(prev) = tasks.insert(id.clone(), token.clone()) {
                prev.cancel();
            }
        }
        let manager = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {
                    manager.fire_cleanup(&id).await;
                }
                _ = token.cancelled() => {}
            }
        });
    }

    async fn fire_cleanup(&self, id: &RoomId) {
        let should_remove = match self.rooms.read().await.get(id) {
            Some(room) => room.is_empty().await,
            None => false,
        };
        if should_remove {
            self.rooms.write().await.remove(id);
        }
        self.cleanup_tasks.lock().unwrap().remove(id);
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Snapshot of every currently tracked room, used by the heartbeat
    /// reaper sweep (which holds no long-lived reference into the map).
    pub async fn all_rooms(&self) -> Vec<Arc<Room>> {
        self.rooms.read().await.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn all_rooms_reflects_current_membership() {
        let mgr = RoomManager::new();
        mgr.get_or_create(RoomId::new("r1")).await;
        mgr.get_or_create(RoomId::new("r2")).await;
        assert_eq!(mgr.all_rooms().await.len(), 2);
    }

    #[tokio::test]
    async fn get_or_create_returns_the_same_room_on_repeat_calls() {
        let mgr = RoomManager::new();
        let id = RoomId::new("r1");
        let a = mgr.get_or_create(id.clone()).await;
        let b = mgr.get_or_create(id).await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_cleanup_removes_an_empty_room_after_the_delay() {
        let mgr = RoomManager::new();
        let id = RoomId::new("r1");
        mgr.get_or_create(id.clone()).await;
        mgr.schedule_cleanup(id.clone(), 1000);

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(mgr.get(&id).await.is_some(), "must not be removed before the delay elapses");

        tokio::time::advance(Duration::from_millis(600)).await;
        tokio::task::yield_now().await;
        assert!(mgr.get(&id).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn get_or_create_cancels_a_pending_cleanup() {
        let mgr = RoomManager::new();
        let id = RoomId::new("r1");
        mgr.get_or_create(id.clone()).await;
        mgr.schedule_cleanup(id.clone(), 1000);

        tokio::time::advance(Duration::from_millis(500)).await;
        mgr.get_or_create(id.clone()).await; // a new connection arrives before the timer fires

        tokio::time::advance(Duration::from_millis(600)).await;
        tokio::task::yield_now().await;
        assert!(mgr.get(&id).await.is_some(), "cleanup must have been cancelled");
    }
}
