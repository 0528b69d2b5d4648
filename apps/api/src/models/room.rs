use serde::{Deserialize, Serialize};

/// The two persisted room flavors. Per-user rooms are ephemeral and never
/// hit the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    /// Direct or group chat.
    Chat,
    /// Channel inside a community.
    Community,
}

/// A persisted room document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Room {
    pub id: String,
    pub kind: RoomKind,
    pub participants: Vec<String>,
    pub last_message_id: Option<i64>,
}

impl Room {
    pub fn new(id: impl Into<String>, kind: RoomKind, participants: &[&str]) -> Self {
        Self {
            id: id.into(),
            kind,
            participants: participants.iter().map(|p| p.to_string()).collect(),
            last_message_id: None,
        }
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p == user_id)
    }
}
