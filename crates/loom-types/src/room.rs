//! Per-workspace fan-out of events to connected sockets.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::trace;
use uuid::Uuid;

use crate::event::ServerEvent;

/// Sending half of a socket's outbound event channel.
pub type EventSender = mpsc::UnboundedSender<ServerEvent>;

/// Receiving half of a socket's outbound event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;

/// Create the outbound channel for one socket.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Unique identifier for a connected socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(Uuid);

impl SocketId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SocketId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The logical room of one workspace: every socket subscribed to its events.
///
/// Each member owns one channel; publishing is a non-blocking send to each.
#[derive(Debug, Default)]
pub struct Room {
    members: RwLock<HashMap<SocketId, EventSender>>,
}

impl Room {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a socket. Rejoining replaces the previous channel.
    pub fn join(&self, socket: SocketId, tx: EventSender) {
        self.members.write().insert(socket, tx);
    }

    /// Remove a socket. Returns whether it was a member.
    pub fn leave(&self, socket: SocketId) -> bool {
        self.members.write().remove(&socket).is_some()
    }

    pub fn contains(&self, socket: SocketId) -> bool {
        self.members.read().contains_key(&socket)
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    /// Send to a single member. Returns false if absent or its channel closed.
    pub fn send_to(&self, socket: SocketId, event: ServerEvent) -> bool {
        match self.members.read().get(&socket) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Publish to every member. Returns the number of successful deliveries.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        self.publish(None, event)
    }

    /// Publish to every member except `origin`.
    pub fn broadcast_except(&self, origin: SocketId, event: &ServerEvent) -> usize {
        self.publish(Some(origin), event)
    }

    fn publish(&self, skip: Option<SocketId>, event: &ServerEvent) -> usize {
        let members = self.members.read();
        let mut delivered = 0;
        for (id, tx) in members.iter() {
            if Some(*id) == skip {
                continue;
            }
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                trace!(socket_id = %id, "Dropping event for closed socket channel");
            }
        }
        delivered
    }
}
