use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::room::{Room, RoomKind};
use super::user::UserClaims;

/// Delivery status of a message, advanced by read receipts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

/// An uploaded file hanging off a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub mime_type: String,
    pub name: String,
}

/// A persisted message. Sender attributes are denormalized from the
/// connection's claims snapshot; the room kind is denormalized so status
/// updates can be routed without a second lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub room_id: String,
    pub room_kind: RoomKind,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_avatar_url: Option<String>,
    pub content: Option<String>,
    pub attachment: Option<Attachment>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// A plain text message. The timestamp is assigned here, on the server,
    /// never taken from the client.
    pub fn text(id: i64, room: &Room, sender_id: &str, claims: &UserClaims, content: String) -> Self {
        Self {
            id,
            room_id: room.id.clone(),
            room_kind: room.kind,
            sender_id: sender_id.to_string(),
            sender_name: claims.name.clone(),
            sender_avatar_url: claims.avatar_url.clone(),
            content: Some(content),
            attachment: None,
            status: MessageStatus::Sent,
            created_at: Utc::now(),
        }
    }

    /// A message carrying an uploaded file instead of text.
    pub fn attachment(
        id: i64,
        room: &Room,
        sender_id: &str,
        claims: &UserClaims,
        attachment: Attachment,
    ) -> Self {
        Self {
            id,
            room_id: room.id.clone(),
            room_kind: room.kind,
            sender_id: sender_id.to_string(),
            sender_name: claims.name.clone(),
            sender_avatar_url: claims.avatar_url.clone(),
            content: None,
            attachment: Some(attachment),
            status: MessageStatus::Sent,
            created_at: Utc::now(),
        }
    }
}
