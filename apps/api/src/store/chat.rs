//! Durable chat documents behind an async trait.
//!
//! The gateway only ever talks to [`ChatStore`]. Production deployments
//! back it with the hosted document store; tests and local development use
//! the in-memory implementation below.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;

use crate::models::call::{Call, CallStatus};
use crate::models::message::{Message, MessageStatus};
use crate::models::read_receipt::ReadReceipt;
use crate::models::room::Room;

#[derive(Debug, Error)]
#[error("store unavailable: {0}")]
pub struct StoreError(pub String);

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn find_room(&self, room_id: &str) -> Result<Option<Room>, StoreError>;

    /// Persists a message and advances its room's last-message pointer.
    async fn create_message(&self, message: &Message) -> Result<(), StoreError>;

    /// Appends a read receipt and moves the message's delivery status.
    /// Returns `None` when the message does not exist.
    async fn append_read_receipt(
        &self,
        message_id: i64,
        reader_id: &str,
        status: MessageStatus,
    ) -> Result<Option<ReadReceipt>, StoreError>;

    /// Removes a room and every message in it. Returns whether the room
    /// existed.
    async fn delete_room(&self, room_id: &str) -> Result<bool, StoreError>;

    async fn create_call(&self, call: &Call) -> Result<(), StoreError>;

    async fn get_call(&self, call_id: &str) -> Result<Option<Call>, StoreError>;

    /// Moves a call to `status`, recording the answering connection when
    /// one is known. Returns the updated record, `None` for unknown calls.
    async fn update_call_status(
        &self,
        call_id: &str,
        status: CallStatus,
        answer_conn: Option<&str>,
    ) -> Result<Option<Call>, StoreError>;

    /// The most recent call between the pair that is still ringing or
    /// accepted, in either direction.
    async fn find_active_call_between(&self, a: &str, b: &str) -> Result<Option<Call>, StoreError>;

    /// Records when a user was last seen online.
    async fn record_last_active(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryChatStore {
    rooms: Mutex<HashMap<String, Room>>,
    messages: Mutex<Vec<Message>>,
    receipts: Mutex<Vec<ReadReceipt>>,
    calls: Mutex<HashMap<String, Call>>,
    last_active: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a room directly, bypassing the trait.
    pub fn insert_room(&self, room: Room) {
        self.rooms.lock().insert(room.id.clone(), room);
    }

    pub fn room(&self, room_id: &str) -> Option<Room> {
        self.rooms.lock().get(room_id).cloned()
    }

    pub fn messages_in(&self, room_id: &str) -> Vec<Message> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect()
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().len()
    }

    pub fn receipts_for(&self, message_id: i64) -> Vec<ReadReceipt> {
        self.receipts
            .lock()
            .iter()
            .filter(|r| r.message_id == message_id)
            .cloned()
            .collect()
    }

    pub fn stored_call(&self, call_id: &str) -> Option<Call> {
        self.calls.lock().get(call_id).cloned()
    }

    pub fn last_active_of(&self, user_id: &str) -> Option<DateTime<Utc>> {
        self.last_active.lock().get(user_id).copied()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn find_room(&self, room_id: &str) -> Result<Option<Room>, StoreError> {
        Ok(self.rooms.lock().get(room_id).cloned())
    }

    async fn create_message(&self, message: &Message) -> Result<(), StoreError> {
        self.messages.lock().push(message.clone());
        if let Some(room) = self.rooms.lock().get_mut(&message.room_id) {
            room.last_message_id = Some(message.id);
        }
        Ok(())
    }

    async fn append_read_receipt(
        &self,
        message_id: i64,
        reader_id: &str,
        status: MessageStatus,
    ) -> Result<Option<ReadReceipt>, StoreError> {
        let mut messages = self.messages.lock();
        let Some(message) = messages.iter_mut().find(|m| m.id == message_id) else {
            return Ok(None);
        };
        message.status = status;
        let receipt = ReadReceipt {
            message_id,
            room_id: message.room_id.clone(),
            room_kind: message.room_kind,
            reader_id: reader_id.to_string(),
            status,
            read_at: Utc::now(),
        };
        drop(messages);
        self.receipts.lock().push(receipt.clone());
        Ok(Some(receipt))
    }

    async fn delete_room(&self, room_id: &str) -> Result<bool, StoreError> {
        let existed = self.rooms.lock().remove(room_id).is_some();
        if existed {
            self.messages.lock().retain(|m| m.room_id != room_id);
        }
        Ok(existed)
    }

    async fn create_call(&self, call: &Call) -> Result<(), StoreError> {
        self.calls.lock().insert(call.id.clone(), call.clone());
        Ok(())
    }

    async fn get_call(&self, call_id: &str) -> Result<Option<Call>, StoreError> {
        Ok(self.calls.lock().get(call_id).cloned())
    }

    async fn update_call_status(
        &self,
        call_id: &str,
        status: CallStatus,
        answer_conn: Option<&str>,
    ) -> Result<Option<Call>, StoreError> {
        let mut calls = self.calls.lock();
        let Some(call) = calls.get_mut(call_id) else {
            return Ok(None);
        };
        call.status = status;
        if let Some(conn) = answer_conn {
            call.answer_conn = Some(conn.to_string());
        }
        call.updated_at = Utc::now();
        Ok(Some(call.clone()))
    }

    async fn find_active_call_between(&self, a: &str, b: &str) -> Result<Option<Call>, StoreError> {
        let calls = self.calls.lock();
        let mut found: Option<&Call> = None;
        for call in calls.values() {
            let pair = (call.caller_id == a && call.callee_id == b)
                || (call.caller_id == b && call.callee_id == a);
            if pair && call.status.is_active() {
                if found.map(|f| call.created_at > f.created_at).unwrap_or(true) {
                    found = Some(call);
                }
            }
        }
        Ok(found.cloned())
    }

    async fn record_last_active(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.last_active.lock().insert(user_id.to_string(), at);
        Ok(())
    }
}
