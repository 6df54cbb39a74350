//! Room membership and fan-out.
//!
//! A room starts in direct mode: `broadcast` enqueues into every member's
//! outbound queue itself. The first time membership reaches the activation
//! threshold a [`BroadcastPool`] takes over fan-out, and the room stays
//! pooled for the rest of its life even if membership later drops.
//!
//! The membership lock is held only for map mutations and snapshot copies,
//! never across I/O or an `.await`.

use crate::client::{Client, ClientId};
use crate::pool::{BroadcastJob, BroadcastPool};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;
use uuid::Uuid;

/// Format a chat message the way it goes out on the wire.
///
/// Outbound frames are plain text: `"<author>: <text>"`.
#[must_use]
pub fn format_with_author(author: &str, text: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(author.len() + 2 + text.len());
    buf.put_slice(author.as_bytes());
    buf.put_slice(b": ");
    buf.put_slice(text);
    buf.freeze()
}

struct RoomState {
    members: HashMap<ClientId, Arc<Client>>,
    pool: Option<Arc<BroadcastPool>>,
}

/// One chat channel: a set of connected clients and the fan-out machinery.
pub struct Room {
    id: Uuid,
    activation_threshold: usize,
    pool_workers: usize,
    state: RwLock<RoomState>,
}

impl Room {
    /// Create an empty room.
    ///
    /// `activation_threshold` is the membership size at which fan-out moves
    /// to a worker pool of `pool_workers` workers.
    #[must_use]
    pub fn new(id: Uuid, activation_threshold: usize, pool_workers: usize) -> Self {
        Self {
            id,
            activation_threshold: activation_threshold.max(1),
            pool_workers,
            state: RwLock::new(RoomState {
                members: HashMap::new(),
                pool: None,
            }),
        }
    }

    /// Get the room's uuid.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Get the current membership size.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.read().members.len()
    }

    /// Whether fan-out has moved to the worker pool.
    #[must_use]
    pub fn pool_active(&self) -> bool {
        self.read().pool.is_some()
    }

    /// Insert a client into the membership set.
    ///
    /// Activates the broadcast pool the first time membership reaches the
    /// threshold. The activation check runs under the same write lock as
    /// the insert, so concurrent adds crossing the threshold activate
    /// exactly one pool.
    pub fn add(&self, client: Arc<Client>) {
        let mut state = self.write();
        state.members.insert(client.id(), client);
        if state.pool.is_none() && state.members.len() >= self.activation_threshold {
            debug!(
                room = %self.id,
                members = state.members.len(),
                workers = self.pool_workers,
                "activating broadcast pool"
            );
            state.pool = Some(Arc::new(BroadcastPool::start(self.pool_workers)));
        }
    }

    /// Remove a client from the membership set and close its outbound queue.
    ///
    /// An already-active pool stays active.
    pub fn remove(&self, client: &Client) {
        let removed = self.write().members.remove(&client.id());
        if removed.is_some() {
            client.close();
            debug!(room = %self.id, client = %client.id(), "client removed");
        }
    }

    /// Deliver `text` to every member except `sender`.
    ///
    /// The message is formatted once with the sender's display name. In
    /// direct mode the enqueues happen inline under the read lock (each is
    /// a non-blocking O(1) `try_send`); in pooled mode a snapshot of the
    /// targets is taken under the lock, the lock is released, and one job
    /// goes to the pool.
    pub fn broadcast(&self, text: &[u8], sender: &Client) {
        let frame = format_with_author(sender.display_name(), text);

        let pooled = {
            let state = self.read();
            match &state.pool {
                None => {
                    for (id, member) in &state.members {
                        if *id == sender.id() {
                            continue;
                        }
                        member.send_raw(frame.clone());
                    }
                    None
                }
                Some(pool) => {
                    let targets: Vec<Arc<Client>> = state
                        .members
                        .values()
                        .filter(|member| member.id() != sender.id())
                        .cloned()
                        .collect();
                    Some((Arc::clone(pool), targets))
                }
            }
        };

        if let Some((pool, targets)) = pooled {
            pool.submit(BroadcastJob::new(frame, targets));
        }
    }

    /// Shut down the broadcast pool, waiting for its workers to drain.
    ///
    /// Safe to call on a room that never activated a pool; idempotent.
    pub async fn shutdown(&self) {
        let pool = self.write().pool.take();
        if let Some(pool) = pool {
            pool.shutdown().await;
            debug!(room = %self.id, "room shut down");
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, RoomState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RoomState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
