use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::message::MessageStatus;
use super::room::RoomKind;

/// Record of one user acknowledging one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub message_id: i64,
    pub room_id: String,
    pub room_kind: RoomKind,
    pub reader_id: String,
    pub status: MessageStatus,
    pub read_at: DateTime<Utc>,
}
