//! Connection registry: every live socket of every user.
//!
//! Operations clone handles out under the dashmap shard lock and release
//! it before doing anything else; nothing in here ever awaits while
//! holding a guard.

use std::collections::HashMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::models::user::UserClaims;

/// One queued server → client dispatch.
#[derive(Debug, Clone)]
pub struct OutboundEvent {
    pub name: &'static str,
    pub data: Value,
}

pub type OutboundSender = mpsc::UnboundedSender<OutboundEvent>;
pub type OutboundReceiver = mpsc::UnboundedReceiver<OutboundEvent>;

/// Cheap, cloneable address of a live connection. Holds the claims snapshot
/// frozen at identify time and the sending half of the connection's
/// outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub connection_id: String,
    pub user_id: String,
    pub claims: UserClaims,
    sender: OutboundSender,
}

impl ConnectionHandle {
    pub fn new(
        connection_id: String,
        user_id: String,
        claims: UserClaims,
        sender: OutboundSender,
    ) -> Self {
        Self {
            connection_id,
            user_id,
            claims,
            sender,
        }
    }

    /// Queues a dispatch for this connection. Returns false once the
    /// connection's writer has gone away.
    pub fn send(&self, event: &'static str, data: Value) -> bool {
        self.sender.send(OutboundEvent { name: event, data }).is_ok()
    }
}

/// Outcome of removing a connection.
#[derive(Debug)]
pub struct Removal {
    pub user_id: String,
    /// True when this was the user's final connection.
    pub last_for_user: bool,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    by_user: DashMap<String, HashMap<String, ConnectionHandle>>,
    by_conn: DashMap<String, ConnectionHandle>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks a freshly identified connection. Returns true when the user
    /// had no other connection, i.e. they just came online.
    pub fn admit(&self, handle: ConnectionHandle) -> bool {
        self.by_conn
            .insert(handle.connection_id.clone(), handle.clone());
        let mut connections = self.by_user.entry(handle.user_id.clone()).or_default();
        let first = connections.is_empty();
        connections.insert(handle.connection_id.clone(), handle);
        first
    }

    /// Untracks a connection. `None` when the ID was never admitted or was
    /// already removed, so teardown is safe to run twice.
    pub fn remove(&self, connection_id: &str) -> Option<Removal> {
        let (_, handle) = self.by_conn.remove(connection_id)?;
        let mut last_for_user = false;
        if let Entry::Occupied(mut occupied) = self.by_user.entry(handle.user_id.clone()) {
            occupied.get_mut().remove(connection_id);
            if occupied.get().is_empty() {
                occupied.remove();
                last_for_user = true;
            }
        }
        Some(Removal {
            user_id: handle.user_id,
            last_for_user,
        })
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.by_user
            .get(user_id)
            .map(|connections| !connections.is_empty())
            .unwrap_or(false)
    }

    /// Snapshot of every live connection of one user.
    pub fn connections_for(&self, user_id: &str) -> Vec<ConnectionHandle> {
        self.by_user
            .get(user_id)
            .map(|connections| connections.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn connection(&self, connection_id: &str) -> Option<ConnectionHandle> {
        self.by_conn
            .get(connection_id)
            .map(|handle| handle.clone())
    }

    /// Sorted IDs of every user with at least one live connection.
    pub fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.by_user.iter().map(|e| e.key().clone()).collect();
        users.sort();
        users
    }

    /// Snapshot of every live connection across all users.
    pub fn all_connections(&self) -> Vec<ConnectionHandle> {
        self.by_conn.iter().map(|e| e.value().clone()).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.by_conn.len()
    }
}
