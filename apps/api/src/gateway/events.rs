//! Gateway opcodes, event names, and wire-format messages.
//!
//! Every frame is a JSON envelope `{ op, t, s, d }`. `t` and `s` only
//! appear on dispatches (op 0): `t` names the event, `s` is the
//! per-connection sequence number.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::call::CallKind;
use crate::models::message::MessageStatus;
use crate::models::room::RoomKind;

// ---------------------------------------------------------------------------
// Opcodes
// ---------------------------------------------------------------------------

pub const OP_DISPATCH: u8 = 0;
pub const OP_HEARTBEAT: u8 = 1;
pub const OP_IDENTIFY: u8 = 2;
pub const OP_HEARTBEAT_ACK: u8 = 6;

// ---------------------------------------------------------------------------
// Server → Client message
// ---------------------------------------------------------------------------

/// A message sent from the server to the client over WebSocket.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayMessage {
    pub op: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    pub d: Value,
}

impl GatewayMessage {
    /// Build a DISPATCH message (op=0).
    pub fn dispatch(event_name: &str, seq: u64, data: Value) -> Self {
        Self {
            op: OP_DISPATCH,
            t: Some(event_name.to_string()),
            s: Some(seq),
            d: data,
        }
    }

    /// Build a HEARTBEAT_ACK message (op=6).
    pub fn heartbeat_ack(seq: u64) -> Self {
        Self {
            op: OP_HEARTBEAT_ACK,
            t: None,
            s: None,
            d: serde_json::json!({ "ack": seq }),
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Server message
// ---------------------------------------------------------------------------

/// A message received from the client over WebSocket.
#[derive(Debug, Deserialize)]
pub struct ClientMessage {
    pub op: u8,
    #[serde(default)]
    pub t: Option<String>,
    #[serde(default)]
    pub d: Value,
}

// ---------------------------------------------------------------------------
// Handshake payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct IdentifyPayload {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub seq: u64,
}

// ---------------------------------------------------------------------------
// Dispatch payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct JoinRoomPayload {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessagePayload {
    pub room_id: String,
    pub content: String,
}

/// One base64 chunk of a file upload. The final chunk carries `is_last`.
#[derive(Debug, Deserialize)]
pub struct UploadFilePayload {
    pub room_id: String,
    pub filename: String,
    pub mime_type: String,
    pub chunk: String,
    #[serde(default)]
    pub is_last: bool,
}

#[derive(Debug, Deserialize)]
pub struct TypingPayload {
    pub room_id: String,
    pub room_kind: RoomKind,
    pub is_typing: bool,
}

#[derive(Debug, Deserialize)]
pub struct MarkAsReadPayload {
    pub message_id: i64,
    #[serde(default = "default_read_status")]
    pub status: MessageStatus,
}

fn default_read_status() -> MessageStatus {
    MessageStatus::Read
}

#[derive(Debug, Deserialize)]
pub struct DeleteChatPayload {
    pub room_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CallStartPayload {
    pub callee_id: String,
    pub kind: CallKind,
}

#[derive(Debug, Deserialize)]
pub struct CallIdPayload {
    pub call_id: String,
}

/// A signal names exactly one target: the peer of a call, every connection
/// of a user, or one specific connection.
#[derive(Debug, Deserialize)]
pub struct CallSignalPayload {
    #[serde(default)]
    pub call_id: Option<String>,
    #[serde(default)]
    pub to_user: Option<String>,
    #[serde(default)]
    pub to_connection: Option<String>,
    pub payload: Value,
}

// ---------------------------------------------------------------------------
// Dispatch event types
// ---------------------------------------------------------------------------

/// Event names dispatched to clients.
pub struct EventName;

impl EventName {
    pub const READY: &'static str = "READY";
    pub const ONLINE_STATUS: &'static str = "ONLINE_STATUS";
    pub const NEW_MESSAGE: &'static str = "NEW_MESSAGE";
    pub const TYPING_STATUS: &'static str = "TYPING_STATUS";
    pub const MESSAGE_STATUS_UPDATE: &'static str = "MESSAGE_STATUS_UPDATE";
    pub const CHAT_DELETED: &'static str = "CHAT_DELETED";
    pub const CALL_CREATED: &'static str = "CALL_CREATED";
    pub const INCOMING_CALL: &'static str = "INCOMING_CALL";
    pub const CALL_ACCEPTED: &'static str = "CALL_ACCEPTED";
    pub const CALL_REJECTED: &'static str = "CALL_REJECTED";
    pub const CALL_ENDED: &'static str = "CALL_ENDED";
    pub const RECEIVE_SIGNAL: &'static str = "RECEIVE_SIGNAL";
    pub const ERROR: &'static str = "ERROR";
}

/// Event names accepted from clients.
pub struct ClientEvent;

impl ClientEvent {
    pub const JOIN_CHAT: &'static str = "JOIN_CHAT";
    pub const JOIN_COMMUNITY_ROOM: &'static str = "JOIN_COMMUNITY_ROOM";
    pub const LEAVE_CHAT: &'static str = "LEAVE_CHAT";
    pub const LEAVE_COMMUNITY_ROOM: &'static str = "LEAVE_COMMUNITY_ROOM";
    pub const SEND_MESSAGE: &'static str = "SEND_MESSAGE";
    pub const UPLOAD_FILE: &'static str = "UPLOAD_FILE";
    pub const TYPING: &'static str = "TYPING";
    pub const MARK_AS_READ: &'static str = "MARK_AS_READ";
    pub const DELETE_CHAT: &'static str = "DELETE_CHAT";
    pub const CALL_START: &'static str = "CALL_START";
    pub const CALL_ACCEPT: &'static str = "CALL_ACCEPT";
    pub const CALL_REJECT: &'static str = "CALL_REJECT";
    pub const CALL_END: &'static str = "CALL_END";
    pub const CALL_SIGNAL: &'static str = "CALL_SIGNAL";
    pub const LOGOUT: &'static str = "LOGOUT";
}
