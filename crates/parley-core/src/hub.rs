//! Registry of live rooms.
//!
//! The hub owns every in-memory room for the process. Rooms are created
//! lazily on first reference and live until the hub shuts down; an empty
//! room persists, idle, rather than being reaped.

use crate::room::Room;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Room every deployment starts with, so a fresh server is joinable
/// without creating anything first.
pub const DEFAULT_ROOM_ID: Uuid = Uuid::from_u128(0x7c1e_4f0a_92d3_4b68_a5e1_08c6_f3d9_2417);

/// Global fan-out configuration applied to every room.
#[derive(Debug, Clone, Copy)]
pub struct HubConfig {
    /// Membership size at which a room's fan-out moves to the worker pool.
    pub activation_threshold: usize,
    /// Workers per activated pool.
    pub pool_workers: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            activation_threshold: 64,
            pool_workers: 4,
        }
    }
}

/// Process-wide room registry.
pub struct Hub {
    rooms: DashMap<Uuid, Arc<Room>>,
    config: HubConfig,
}

impl Hub {
    /// Create a hub seeded with the default room.
    #[must_use]
    pub fn new(config: HubConfig) -> Self {
        let hub = Self {
            rooms: DashMap::new(),
            config,
        };
        hub.rooms.insert(
            DEFAULT_ROOM_ID,
            Arc::new(hub.new_room(DEFAULT_ROOM_ID)),
        );
        hub
    }

    /// Return the room for `id`, creating and registering it on first
    /// reference.
    ///
    /// Safe under concurrent calls: the registry's entry API guarantees
    /// that racing callers with the same unseen id all observe the single
    /// room that one of them created.
    pub fn get_or_create_room(&self, id: Uuid) -> Arc<Room> {
        self.rooms
            .entry(id)
            .or_insert_with(|| {
                debug!(room = %id, "creating room");
                Arc::new(self.new_room(id))
            })
            .clone()
    }

    /// Look up a room without creating it.
    #[must_use]
    pub fn get(&self, id: Uuid) -> Option<Arc<Room>> {
        self.rooms.get(&id).map(|entry| entry.clone())
    }

    /// Detach a room from the registry and shut its pool down.
    pub async fn remove(&self, id: Uuid) {
        if let Some((_, room)) = self.rooms.remove(&id) {
            room.shutdown().await;
            debug!(room = %id, "room removed");
        }
    }

    /// Number of registered rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Shut down every room's pool. Used at process termination.
    pub async fn shutdown(&self) {
        let rooms: Vec<Arc<Room>> = self.rooms.iter().map(|entry| entry.value().clone()).collect();
        for room in rooms {
            room.shutdown().await;
        }
        info!(rooms = self.room_count(), "hub shut down");
    }

    fn new_room(&self, id: Uuid) -> Room {
        Room::new(
            id,
            self.config.activation_threshold,
            self.config.pool_workers,
        )
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(HubConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Client, Identity};
    use tokio::sync::Barrier;

    #[tokio::test]
    async fn default_room_is_seeded() {
        let hub = Hub::default();
        assert_eq!(hub.room_count(), 1);
        assert!(hub.get(DEFAULT_ROOM_ID).is_some());
    }

    #[tokio::test]
    async fn get_or_create_returns_the_same_room() {
        let hub = Hub::default();
        let id = Uuid::new_v4();

        let first = hub.get_or_create_room(id);
        let second = hub.get_or_create_room(id);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(hub.room_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_first_joins_create_exactly_one_room() {
        let hub = Arc::new(Hub::default());
        let id = Uuid::new_v4();
        let barrier = Arc::new(Barrier::new(16));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let hub = hub.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                hub.get_or_create_room(id)
            }));
        }

        let mut rooms = Vec::new();
        for handle in handles {
            rooms.push(handle.await.unwrap());
        }
        for room in &rooms {
            assert!(Arc::ptr_eq(room, &rooms[0]));
        }
        assert_eq!(hub.room_count(), 2);
    }

    #[tokio::test]
    async fn remove_detaches_and_shuts_down() {
        let hub = Hub::new(HubConfig {
            activation_threshold: 1,
            pool_workers: 2,
        });
        let id = Uuid::new_v4();
        let room = hub.get_or_create_room(id);

        let (client, _rx) = Client::new(
            id,
            Identity {
                user_id: 1,
                room_row_id: 1,
                display_name: "a".to_string(),
            },
            8,
        );
        room.add(client);
        assert!(room.pool_active());

        hub.remove(id).await;
        assert!(hub.get(id).is_none());
        assert!(!room.pool_active(), "pool is torn down with the room");
    }

    #[tokio::test]
    async fn shutdown_cascades_to_every_room() {
        let hub = Hub::new(HubConfig {
            activation_threshold: 1,
            pool_workers: 1,
        });

        let mut rooms = Vec::new();
        for i in 0..3i64 {
            let id = Uuid::new_v4();
            let room = hub.get_or_create_room(id);
            let (client, _rx) = Client::new(
                id,
                Identity {
                    user_id: i,
                    room_row_id: 1,
                    display_name: format!("user-{i}"),
                },
                8,
            );
            room.add(client);
            rooms.push(room);
        }

        hub.shutdown().await;
        for room in &rooms {
            assert!(!room.pool_active());
        }
    }
}
