//! Identity-scoped room membership for push connections.
//!
//! Every WebSocket that sent `JoinRoom` is a member of its identity's room.
//! One identity may hold several connections at once (multiple tabs or
//! devices); each gets every event pushed to the room.
//!
//! Membership is ephemeral and lost on relay restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::body::Bytes;
use axum::extract::ws::Message;
use fleetchat_proto::message::{CounterpartyId, Identity, SenderRole};
use tokio::sync::{RwLock, mpsc};

/// Identifies one connection within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

type Members = HashMap<ConnectionId, mpsc::UnboundedSender<Message>>;

/// Room table keyed by identity.
///
/// Writes are serialized behind a [`RwLock`]; fan-out only takes the read
/// lock unless it finds dead connections to prune.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<Identity, Members>>,
    next_id: AtomicU64,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Adds a connection to `identity`'s room.
    pub async fn join(
        &self,
        identity: &Identity,
        sender: mpsc::UnboundedSender<Message>,
    ) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.rooms
            .write()
            .await
            .entry(identity.clone())
            .or_default()
            .insert(id, sender);
        tracing::debug!(room = %identity.room(), conn = %id, "connection joined room");
        id
    }

    /// Removes a connection. Empty rooms are dropped.
    ///
    /// Returns `true` if the connection was a member.
    pub async fn leave(&self, identity: &Identity, connection: ConnectionId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(members) = rooms.get_mut(identity) else {
            return false;
        };
        let removed = members.remove(&connection).is_some();
        if members.is_empty() {
            rooms.remove(identity);
        }
        drop(rooms);
        removed
    }

    /// Number of live connections in `identity`'s room.
    pub async fn member_count(&self, identity: &Identity) -> usize {
        self.rooms.read().await.get(identity).map_or(0, HashMap::len)
    }

    /// Pushes `frame` to the customer's room and to every employee room.
    ///
    /// Returns how many connections accepted the frame. Connections whose
    /// writer has gone away are pruned.
    pub async fn fan_out(&self, customer: &CounterpartyId, frame: Vec<u8>) -> usize {
        let payload = Bytes::from(frame);
        let mut delivered = 0;
        let mut dead = Vec::new();

        {
            let rooms = self.rooms.read().await;
            let targets = rooms.iter().filter(|(identity, _)| match identity.role {
                SenderRole::Employee => true,
                SenderRole::Customer => identity.id == customer.as_str(),
            });
            for (identity, members) in targets {
                for (conn, sender) in members {
                    if sender.send(Message::Binary(payload.clone())).is_ok() {
                        delivered += 1;
                    } else {
                        dead.push((identity.clone(), *conn));
                    }
                }
            }
        }

        for (identity, conn) in dead {
            tracing::debug!(room = %identity.room(), conn = %conn, "pruning closed connection");
            self.leave(&identity, conn).await;
        }
        delivered
    }

    /// Sends a Close frame to every connection.
    pub async fn close_all(&self) {
        let rooms = self.rooms.read().await;
        for (identity, members) in rooms.iter() {
            tracing::info!(room = %identity.room(), "closing room connections");
            for sender in members.values() {
                let _ = sender.send(Message::Close(None));
            }
        }
    }
}
