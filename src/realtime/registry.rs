//! Session registry
//!
//! Tracks live connections, the principals that own them, and the
//! room-subscriber arena the fanout engine delivers through. Everything
//! here is process-local: after a restart all principals are offline until
//! they reconnect.
//!
//! Delivery is best-effort per connection over a bounded outbox. A consumer
//! whose outbox is full (or whose pump died) is evicted rather than allowed
//! to backpressure its rooms; dropping its sender closes the write pump and
//! with it the socket.

use std::collections::{HashMap, HashSet};

use tokio::sync::{RwLock, mpsc};
use ulid::Ulid;

use super::event::ServerEvent;
use crate::metrics::{
    GATEWAY_BROADCASTS_TOTAL, GATEWAY_CONNECTIONS, GATEWAY_DROPPED_CONNECTIONS_TOTAL,
    GATEWAY_ONLINE_USERS,
};

/// Opaque connection identifier (`gw_`-prefixed ULID).
pub type ConnectionId = String;

/// State for a single live connection.
struct ConnectionHandle {
    principal_id: i64,
    display_name: String,
    rooms: HashSet<i64>,
    outbox: mpsc::Sender<ServerEvent>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, ConnectionHandle>,
    by_principal: HashMap<i64, HashSet<ConnectionId>>,
    by_room: HashMap<i64, HashSet<ConnectionId>>,
}

/// Registry of live connections, indexed by connection, principal, and room.
pub struct SessionRegistry {
    inner: RwLock<Inner>,
    outbox_capacity: usize,
}

impl SessionRegistry {
    pub fn new(outbox_capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            outbox_capacity,
        }
    }

    /// Mint a fresh connection id.
    pub fn new_connection_id() -> ConnectionId {
        format!("gw_{}", Ulid::new())
    }

    /// Register a connection under its principal, pre-subscribed to the
    /// given rooms.
    ///
    /// # Returns
    /// The receiving half of the connection's outbox, and whether this was
    /// the principal's first live connection (the online edge).
    pub async fn register(
        &self,
        connection_id: &ConnectionId,
        principal_id: i64,
        display_name: &str,
        rooms: &[i64],
    ) -> (mpsc::Receiver<ServerEvent>, bool) {
        let (outbox, rx) = mpsc::channel(self.outbox_capacity);

        let mut inner = self.inner.write().await;

        let handle = ConnectionHandle {
            principal_id,
            display_name: display_name.to_string(),
            rooms: rooms.iter().copied().collect(),
            outbox,
        };
        inner.connections.insert(connection_id.clone(), handle);

        for room_id in rooms {
            inner
                .by_room
                .entry(*room_id)
                .or_default()
                .insert(connection_id.clone());
        }

        let peers = inner.by_principal.entry(principal_id).or_default();
        let first_connection = peers.is_empty();
        peers.insert(connection_id.clone());

        GATEWAY_CONNECTIONS.set(inner.connections.len() as i64);
        GATEWAY_ONLINE_USERS.set(inner.by_principal.len() as i64);

        (rx, first_connection)
    }

    /// Remove a connection.
    ///
    /// # Returns
    /// The owning principal id and whether this was its last live
    /// connection (the offline edge), or `None` for an unknown id.
    pub async fn unregister(&self, connection_id: &ConnectionId) -> Option<(i64, bool)> {
        let mut inner = self.inner.write().await;
        let result = remove_connection(&mut inner, connection_id)
            .map(|(handle, was_last)| (handle.principal_id, was_last));

        GATEWAY_CONNECTIONS.set(inner.connections.len() as i64);
        GATEWAY_ONLINE_USERS.set(inner.by_principal.len() as i64);

        result
    }

    /// Resolve a connection to its owning principal.
    pub async fn resolve(&self, connection_id: &ConnectionId) -> Option<(i64, String)> {
        let inner = self.inner.read().await;
        inner
            .connections
            .get(connection_id)
            .map(|handle| (handle.principal_id, handle.display_name.clone()))
    }

    /// All live connection ids of one principal.
    pub async fn connections_for(&self, principal_id: i64) -> Vec<ConnectionId> {
        let inner = self.inner.read().await;
        inner
            .by_principal
            .get(&principal_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Subscribe every live connection of a principal to a room.
    pub async fn subscribe_principal(&self, principal_id: i64, room_id: i64) {
        let mut inner = self.inner.write().await;

        let connection_ids: Vec<ConnectionId> = inner
            .by_principal
            .get(&principal_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        for connection_id in connection_ids {
            if let Some(handle) = inner.connections.get_mut(&connection_id) {
                handle.rooms.insert(room_id);
            }
            inner
                .by_room
                .entry(room_id)
                .or_default()
                .insert(connection_id);
        }
    }

    /// Unsubscribe every live connection of a principal from a room.
    pub async fn unsubscribe_principal(&self, principal_id: i64, room_id: i64) {
        let mut inner = self.inner.write().await;

        let connection_ids: Vec<ConnectionId> = inner
            .by_principal
            .get(&principal_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default();

        for connection_id in &connection_ids {
            if let Some(handle) = inner.connections.get_mut(connection_id) {
                handle.rooms.remove(&room_id);
            }
        }
        if let Some(subscribers) = inner.by_room.get_mut(&room_id) {
            for connection_id in &connection_ids {
                subscribers.remove(connection_id);
            }
            if subscribers.is_empty() {
                inner.by_room.remove(&room_id);
            }
        }
    }

    /// Which of the given principals currently have a live connection.
    pub async fn online_among(&self, principal_ids: &[i64]) -> HashSet<i64> {
        let inner = self.inner.read().await;
        principal_ids
            .iter()
            .copied()
            .filter(|id| inner.by_principal.contains_key(id))
            .collect()
    }

    /// Deliver an event to every connection subscribed to a room,
    /// optionally skipping one principal's connections.
    ///
    /// # Returns
    /// Number of connections the event was queued to.
    pub async fn broadcast_room(
        &self,
        room_id: i64,
        event: &ServerEvent,
        except_principal: Option<i64>,
    ) -> usize {
        let mut doomed: Vec<ConnectionId> = Vec::new();
        let mut delivered = 0usize;

        {
            let inner = self.inner.read().await;
            let Some(subscribers) = inner.by_room.get(&room_id) else {
                return 0;
            };

            for connection_id in subscribers {
                let Some(handle) = inner.connections.get(connection_id) else {
                    continue;
                };
                if Some(handle.principal_id) == except_principal {
                    continue;
                }
                if try_deliver(handle, connection_id, event, &mut doomed) {
                    delivered += 1;
                }
            }
        }

        self.evict(doomed).await;

        GATEWAY_BROADCASTS_TOTAL
            .with_label_values(&[event.name()])
            .inc_by(delivered as u64);

        delivered
    }

    /// Deliver an event to every connection of one principal.
    pub async fn send_to_principal(&self, principal_id: i64, event: &ServerEvent) -> usize {
        let mut doomed: Vec<ConnectionId> = Vec::new();
        let mut delivered = 0usize;

        {
            let inner = self.inner.read().await;
            let Some(connection_ids) = inner.by_principal.get(&principal_id) else {
                return 0;
            };

            for connection_id in connection_ids {
                let Some(handle) = inner.connections.get(connection_id) else {
                    continue;
                };
                if try_deliver(handle, connection_id, event, &mut doomed) {
                    delivered += 1;
                }
            }
        }

        self.evict(doomed).await;

        GATEWAY_BROADCASTS_TOTAL
            .with_label_values(&[event.name()])
            .inc_by(delivered as u64);

        delivered
    }

    /// Deliver an event to one connection.
    pub async fn send_to_connection(&self, connection_id: &ConnectionId, event: &ServerEvent) {
        let mut doomed: Vec<ConnectionId> = Vec::new();

        {
            let inner = self.inner.read().await;
            if let Some(handle) = inner.connections.get(connection_id) {
                try_deliver(handle, connection_id, event, &mut doomed);
            }
        }

        self.evict(doomed).await;
    }

    /// Drop connections whose outboxes overflowed or closed. Dropping the
    /// handle drops its sender, which ends the write pump and closes the
    /// socket.
    ///
    /// An eviction can be a principal's offline edge, and by the time the
    /// dead socket's teardown runs the connection is already gone — so the
    /// presence fanout happens here, best-effort, straight into surviving
    /// outboxes (a consumer that fails this delivery is caught by the next
    /// regular broadcast).
    async fn evict(&self, doomed: Vec<ConnectionId>) {
        if doomed.is_empty() {
            return;
        }

        let mut inner = self.inner.write().await;
        for connection_id in doomed {
            let Some((handle, was_last)) = remove_connection(&mut inner, &connection_id) else {
                continue;
            };
            tracing::warn!(
                connection_id = %connection_id,
                principal_id = handle.principal_id,
                "evicting connection with saturated outbox"
            );

            if !was_last {
                continue;
            }

            let presence = ServerEvent::PresenceChanged {
                user_id: handle.principal_id,
                display_name: handle.display_name.clone(),
                state: crate::data::PresenceState::Offline,
                last_seen_at: None,
            };
            for room_id in &handle.rooms {
                let Some(subscribers) = inner.by_room.get(room_id) else {
                    continue;
                };
                for subscriber_id in subscribers {
                    if let Some(subscriber) = inner.connections.get(subscriber_id) {
                        let _ = subscriber.outbox.try_send(presence.clone());
                    }
                }
            }
        }

        GATEWAY_CONNECTIONS.set(inner.connections.len() as i64);
        GATEWAY_ONLINE_USERS.set(inner.by_principal.len() as i64);
    }
}

/// Queue an event on a handle's outbox without blocking.
///
/// # Returns
/// `true` on success; on failure the connection id is added to `doomed`.
fn try_deliver(
    handle: &ConnectionHandle,
    connection_id: &ConnectionId,
    event: &ServerEvent,
    doomed: &mut Vec<ConnectionId>,
) -> bool {
    match handle.outbox.try_send(event.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            GATEWAY_DROPPED_CONNECTIONS_TOTAL
                .with_label_values(&["outbox-full"])
                .inc();
            doomed.push(connection_id.clone());
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            GATEWAY_DROPPED_CONNECTIONS_TOTAL
                .with_label_values(&["closed"])
                .inc();
            doomed.push(connection_id.clone());
            false
        }
    }
}

fn remove_connection(
    inner: &mut Inner,
    connection_id: &ConnectionId,
) -> Option<(ConnectionHandle, bool)> {
    let handle = inner.connections.remove(connection_id)?;

    for room_id in &handle.rooms {
        if let Some(subscribers) = inner.by_room.get_mut(room_id) {
            subscribers.remove(connection_id);
            if subscribers.is_empty() {
                inner.by_room.remove(room_id);
            }
        }
    }

    let was_last = if let Some(peers) = inner.by_principal.get_mut(&handle.principal_id) {
        peers.remove(connection_id);
        if peers.is_empty() {
            inner.by_principal.remove(&handle.principal_id);
            true
        } else {
            false
        }
    } else {
        true
    };

    Some((handle, was_last))
}
