//! Connection registry and room fan-out
//!
//! Each live socket owns a bounded outbound queue. Broadcasting never awaits:
//! a full queue drops the event for that viewer only.

use crate::models::{Role, WsEvent};
use dashmap::DashMap;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};
use uuid::Uuid;

pub type ConnectionId = Uuid;
pub type EventReceiver = mpsc::Receiver<WsEvent>;

/// Fan-out topic. Rendered as `scoring:<uuid>` or `event:<uuid>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    Scoring(Uuid),
    Event(Uuid),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Scoring(id) => write!(f, "scoring:{}", id),
            Room::Event(id) => write!(f, "event:{}", id),
        }
    }
}

impl FromStr for Room {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid room name: {}", s))?;
        let id = Uuid::parse_str(id).map_err(|_| format!("invalid room name: {}", s))?;
        match kind {
            "scoring" => Ok(Room::Scoring(id)),
            "event" => Ok(Room::Event(id)),
            _ => Err(format!("invalid room name: {}", s)),
        }
    }
}

pub struct Connection {
    pub user_id: Uuid,
    pub role: Role,
    pub rooms: HashSet<Room>,
    tx: mpsc::Sender<WsEvent>,
}

pub struct RoomRegistry {
    connections: DashMap<ConnectionId, Connection>,
    rooms: DashMap<Room, HashSet<ConnectionId>>,
    buffer: usize,
}

impl RoomRegistry {
    pub fn new(buffer: usize) -> Self {
        Self {
            connections: DashMap::new(),
            rooms: DashMap::new(),
            buffer: buffer.max(1),
        }
    }

    /// Register a connection and hand back its outbound queue
    pub fn register(&self, user_id: Uuid, role: Role) -> (ConnectionId, EventReceiver) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();
        self.connections.insert(
            id,
            Connection {
                user_id,
                role,
                rooms: HashSet::new(),
                tx,
            },
        );
        debug!(connection_id = %id, user_id = %user_id, "Connection registered");
        (id, rx)
    }

    /// Remove a connection from the registry and every room it joined
    pub fn unregister(&self, id: ConnectionId) {
        let Some((_, conn)) = self.connections.remove(&id) else {
            return;
        };
        for room in conn.rooms {
            self.drop_member(room, id);
        }
        debug!(connection_id = %id, "Connection unregistered");
    }

    /// Idempotent. Returns false for an unknown connection.
    pub fn join(&self, id: ConnectionId, room: Room) -> bool {
        match self.connections.get_mut(&id) {
            Some(mut conn) => {
                conn.rooms.insert(room);
            }
            None => return false,
        }
        self.rooms.entry(room).or_default().insert(id);

        // An unregister between the two inserts would miss this room
        if !self.connections.contains_key(&id) {
            self.drop_member(room, id);
            return false;
        }
        true
    }

    /// Idempotent. Returns false for an unknown connection.
    pub fn leave(&self, id: ConnectionId, room: Room) -> bool {
        match self.connections.get_mut(&id) {
            Some(mut conn) => {
                conn.rooms.remove(&room);
            }
            None => return false,
        }
        self.drop_member(room, id);
        true
    }

    fn drop_member(&self, room: Room, id: ConnectionId) {
        if let Some(mut members) = self.rooms.get_mut(&room) {
            members.remove(&id);
        }
        self.rooms.remove_if(&room, |_, members| members.is_empty());
    }

    /// Queue `event` for every member of `room`. Returns how many
    /// connections accepted it.
    pub fn broadcast(&self, room: Room, event: &WsEvent) -> usize {
        let members: Vec<ConnectionId> = match self.rooms.get(&room) {
            Some(members) => members.iter().copied().collect(),
            None => return 0,
        };

        let mut delivered = 0;
        let mut stale = Vec::new();
        for id in members {
            let Some(conn) = self.connections.get(&id) else {
                stale.push(id);
                continue;
            };
            match conn.tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        connection_id = %id,
                        room = %room,
                        event = event.kind(),
                        "Outbound queue full, event dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => stale.push(id),
            }
        }

        for id in stale {
            self.drop_member(room, id);
        }

        debug!(room = %room, event = event.kind(), delivered, "Broadcast");
        delivered
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn room_size(&self, room: Room) -> usize {
        self.rooms.get(&room).map(|m| m.len()).unwrap_or(0)
    }

    pub fn rooms_of(&self, id: ConnectionId) -> Vec<Room> {
        self.connections
            .get(&id)
            .map(|conn| conn.rooms.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new(256)
    }
}
