//! Room-indexed fan-out to live connections
//!
//! Each connection owns a bounded queue drained by its socket task. Publishing
//! serializes the envelope once and `try_send`s it to every member, so a slow
//! reader loses messages instead of stalling the publisher.

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::events::{Audience, EventEnvelope, Room};
use super::Publisher;

pub type ConnectionId = u64;

/// Default per-connection queue depth
pub const DEFAULT_CONNECTION_BUFFER: usize = 256;

pub struct RoomHub {
    next_id: AtomicU64,
    connections: DashMap<ConnectionId, mpsc::Sender<String>>,
    rooms: DashMap<Room, HashSet<ConnectionId>>,
    buffer: usize,
    dropped: AtomicU64,
}

impl Default for RoomHub {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECTION_BUFFER)
    }
}

impl RoomHub {
    pub fn new(buffer: usize) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            connections: DashMap::new(),
            rooms: DashMap::new(),
            buffer: buffer.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    /// Add a connection and return its id with the receiving end of its queue
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.buffer);
        self.connections.insert(id, tx);
        debug!(connection_id = id, "Connection registered");
        (id, rx)
    }

    /// Remove a connection from the hub and from every listed room
    pub fn unregister<'a>(&self, id: ConnectionId, rooms: impl IntoIterator<Item = &'a Room>) {
        for room in rooms {
            self.remove_member(room, id);
        }
        self.connections.remove(&id);
        debug!(connection_id = id, "Connection unregistered");
    }

    /// Returns false when the connection is unknown
    pub fn join(&self, id: ConnectionId, room: Room) -> bool {
        if !self.connections.contains_key(&id) {
            return false;
        }
        trace!(connection_id = id, room = %room, "Join room");
        self.rooms.entry(room).or_default().insert(id);
        true
    }

    pub fn leave(&self, id: ConnectionId, room: &Room) -> bool {
        trace!(connection_id = id, room = %room, "Leave room");
        self.remove_member(room, id)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn members(&self, room: &Room) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }

    /// Messages dropped because a queue was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn remove_member(&self, room: &Room, id: ConnectionId) -> bool {
        let removed = match self.rooms.get_mut(room) {
            Some(mut members) => members.remove(&id),
            None => return false,
        };
        self.rooms.remove_if(room, |_, members| members.is_empty());
        removed
    }

    fn recipients(&self, audience: &Audience) -> Vec<ConnectionId> {
        match audience {
            Audience::Everyone => self.connections.iter().map(|c| *c.key()).collect(),
            Audience::Room(room) => self
                .rooms
                .get(room)
                .map(|m| m.iter().copied().collect())
                .unwrap_or_default(),
        }
    }

    fn deliver(&self, id: ConnectionId, text: &str) {
        let Some(tx) = self.connections.get(&id).map(|tx| tx.clone()) else {
            return;
        };
        match tx.try_send(text.to_string()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(connection_id = id, "Connection queue full, message dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection_id = id, "Connection queue closed, dropping connection");
                self.connections.remove(&id);
            }
        }
    }
}

impl Publisher for RoomHub {
    fn publish(&self, audience: Audience, envelope: EventEnvelope) {
        let text = match serde_json::to_string(&envelope) {
            Ok(text) => text,
            Err(e) => {
                warn!(event = %envelope.event, error = %e, "Failed to serialize event");
                return;
            }
        };

        let recipients = self.recipients(&audience);
        trace!(event = %envelope.event, recipients = recipients.len(), "Publish");
        for id in recipients {
            self.deliver(id, &text);
        }
    }
}
