//! Room membership and broadcast.
//!
//! One map serves every room flavor. A room exists exactly while it has at
//! least one member; the last leave evicts the entry. Broadcasts enqueue to
//! all members while holding the room's shard lock exclusively, so two
//! broadcasts to the same room land in every member's queue in the same
//! relative order.

use std::collections::{HashMap, HashSet};
use std::fmt;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use crate::models::room::RoomKind;

use super::registry::ConnectionHandle;

/// Namespaced room identifier. Chat and community rooms are backed by
/// store documents; user rooms exist only here and address every
/// connection of one user.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoomId {
    Chat(String),
    Community(String),
    User(String),
}

impl RoomId {
    pub fn persisted(kind: RoomKind, id: &str) -> Self {
        match kind {
            RoomKind::Chat => RoomId::Chat(id.to_string()),
            RoomKind::Community => RoomId::Community(id.to_string()),
        }
    }

    /// The bare document ID, without the namespace.
    pub fn raw(&self) -> &str {
        match self {
            RoomId::Chat(id) | RoomId::Community(id) | RoomId::User(id) => id,
        }
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomId::Chat(id) => write!(f, "chat:{id}"),
            RoomId::Community(id) => write!(f, "community:{id}"),
            RoomId::User(id) => write!(f, "user:{id}"),
        }
    }
}

#[derive(Default)]
pub struct RoomMembership {
    rooms: DashMap<RoomId, HashMap<String, ConnectionHandle>>,
    joined: DashMap<String, HashSet<RoomId>>,
}

impl RoomMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection to a room. Joining twice is a no-op.
    pub fn join(&self, handle: &ConnectionHandle, room: RoomId) {
        self.rooms
            .entry(room.clone())
            .or_default()
            .insert(handle.connection_id.clone(), handle.clone());
        self.joined
            .entry(handle.connection_id.clone())
            .or_default()
            .insert(room);
    }

    /// Removes a connection from a room. Unknown pairs are a no-op.
    pub fn leave(&self, connection_id: &str, room: &RoomId) {
        if let Entry::Occupied(mut occupied) = self.rooms.entry(room.clone()) {
            occupied.get_mut().remove(connection_id);
            if occupied.get().is_empty() {
                occupied.remove();
            }
        }
        if let Entry::Occupied(mut occupied) = self.joined.entry(connection_id.to_string()) {
            occupied.get_mut().remove(room);
            if occupied.get().is_empty() {
                occupied.remove();
            }
        }
    }

    /// Drops every membership of a closing connection. Returns how many
    /// rooms it was in.
    pub fn leave_all(&self, connection_id: &str) -> usize {
        let Some((_, rooms)) = self.joined.remove(connection_id) else {
            return 0;
        };
        let count = rooms.len();
        for room in rooms {
            if let Entry::Occupied(mut occupied) = self.rooms.entry(room) {
                occupied.get_mut().remove(connection_id);
                if occupied.get().is_empty() {
                    occupied.remove();
                }
            }
        }
        count
    }

    /// Tears a room down regardless of members, e.g. after chat deletion.
    pub fn drop_room(&self, room: &RoomId) {
        let Some((_, members)) = self.rooms.remove(room) else {
            return;
        };
        for connection_id in members.keys() {
            if let Entry::Occupied(mut occupied) = self.joined.entry(connection_id.clone()) {
                occupied.get_mut().remove(room);
                if occupied.get().is_empty() {
                    occupied.remove();
                }
            }
        }
    }

    pub fn is_member(&self, connection_id: &str, room: &RoomId) -> bool {
        self.joined
            .get(connection_id)
            .map(|rooms| rooms.contains(room))
            .unwrap_or(false)
    }

    pub fn member_count(&self, room: &RoomId) -> usize {
        self.rooms.get(room).map(|members| members.len()).unwrap_or(0)
    }

    /// Queues `event` for every member. Returns how many members accepted
    /// it; an unknown room is simply zero.
    pub fn broadcast(&self, room: &RoomId, event: &'static str, data: Value) -> usize {
        self.broadcast_inner(room, None, event, data)
    }

    /// Same as [`RoomMembership::broadcast`] minus one connection, usually
    /// the sender of the thing being announced.
    pub fn broadcast_except(
        &self,
        room: &RoomId,
        except: &str,
        event: &'static str,
        data: Value,
    ) -> usize {
        self.broadcast_inner(room, Some(except), event, data)
    }

    // The write guard is what serializes same-room broadcasts; the map
    // itself is not mutated.
    fn broadcast_inner(
        &self,
        room: &RoomId,
        except: Option<&str>,
        event: &'static str,
        data: Value,
    ) -> usize {
        let Some(members) = self.rooms.get_mut(room) else {
            return 0;
        };
        let mut delivered = 0;
        for (connection_id, handle) in members.iter() {
            if except.is_some_and(|e| e == connection_id) {
                continue;
            }
            if handle.send(event, data.clone()) {
                delivered += 1;
            }
        }
        delivered
    }
}
