//! Presence: who is online, and telling everyone when that changes.
//!
//! Presence is purely a function of registry occupancy. There are no grace
//! periods and no idle states; a user is online while they have at least
//! one connection. Every admit and every remove rebroadcasts the full
//! online list to every connection, so clients replace state instead of
//! patching it and missed updates self-heal on the next change.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::json;

use crate::store::chat::ChatStore;

use super::events::EventName;
use super::registry::ConnectionRegistry;

pub struct PresencePublisher {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn ChatStore>,
    // Snapshots are taken and queued under this lock, so a stale list can
    // never land after a newer one in any subscriber's queue.
    publish_lock: Mutex<()>,
}

impl PresencePublisher {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn ChatStore>) -> Self {
        Self {
            registry,
            store,
            publish_lock: Mutex::new(()),
        }
    }

    /// Broadcasts the current online list to every connection.
    pub fn publish_online_status(&self) {
        let _guard = self.publish_lock.lock();
        let online = self.registry.online_users();
        let data = json!({ "online": online });
        for handle in self.registry.all_connections() {
            handle.send(EventName::ONLINE_STATUS, data.clone());
        }
    }

    pub fn connection_admitted(&self, user_id: &str, first_for_user: bool) {
        if first_for_user {
            tracing::info!(%user_id, "user online");
        }
        self.publish_online_status();
    }

    /// Rebroadcasts after a removal, and records last-active once the
    /// user's final connection is gone. The timestamp write is best
    /// effort; presence must not depend on the store being reachable.
    pub async fn connection_removed(&self, user_id: &str, last_for_user: bool) {
        self.publish_online_status();
        if last_for_user {
            tracing::info!(%user_id, "user offline");
            if let Err(err) = self.store.record_last_active(user_id, Utc::now()).await {
                tracing::warn!(%user_id, %err, "failed to record last-active");
            }
        }
    }

    pub fn online_users(&self) -> Vec<String> {
        self.registry.online_users()
    }
}
