//! Message fan-out: validate, authorize, normalize, persist, broadcast.
//!
//! Persistence gates broadcast. A message the store refuses to write is
//! never announced, so subscribers only ever see durable records, and the
//! sender gets the error instead.

use std::sync::Arc;

use serde_json::json;

use fika_common::SnowflakeGenerator;

use crate::error::EventError;
use crate::models::message::{Attachment, Message, MessageStatus};
use crate::models::room::Room;
use crate::store::chat::ChatStore;
use crate::store::objects::ObjectStorage;

use super::events::EventName;
use super::registry::ConnectionHandle;
use super::rooms::{RoomId, RoomMembership};
use super::transfer::CompletedTransfer;

/// Longest accepted message body, in characters.
pub const MAX_CONTENT_CHARS: usize = 4000;

pub struct MessageFanout {
    store: Arc<dyn ChatStore>,
    objects: Arc<dyn ObjectStorage>,
    rooms: Arc<RoomMembership>,
    ids: Arc<SnowflakeGenerator>,
}

impl MessageFanout {
    pub fn new(
        store: Arc<dyn ChatStore>,
        objects: Arc<dyn ObjectStorage>,
        rooms: Arc<RoomMembership>,
        ids: Arc<SnowflakeGenerator>,
    ) -> Self {
        Self {
            store,
            objects,
            rooms,
            ids,
        }
    }

    /// Full send pipeline for a text message. The created record is
    /// broadcast to the room and returned to the caller.
    pub async fn send_message(
        &self,
        sender: &ConnectionHandle,
        room_id: &str,
        content: &str,
    ) -> Result<Message, EventError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(EventError::invalid_argument("message content is required"));
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(EventError::invalid_argument("message content is too long"));
        }
        let room = self.authorized_room(sender, room_id).await?;
        let message = Message::text(
            self.ids.generate(),
            &room,
            &sender.user_id,
            &sender.claims,
            content.to_string(),
        );
        self.persist_and_broadcast(&room, message).await
    }

    /// Stores a reassembled upload and fans out the attachment message.
    /// Authorization runs before any byte reaches storage, so outsiders
    /// cannot fill the object store.
    pub async fn send_attachment(
        &self,
        sender: &ConnectionHandle,
        transfer: CompletedTransfer,
    ) -> Result<Message, EventError> {
        let room = self.authorized_room(sender, &transfer.room_id).await?;
        let url = self
            .objects
            .upload_buffer(transfer.bytes, &transfer.mime_type, &room.id)
            .await?;
        let attachment = Attachment {
            url,
            mime_type: transfer.mime_type,
            name: transfer.filename,
        };
        let message = Message::attachment(
            self.ids.generate(),
            &room,
            &sender.user_id,
            &sender.claims,
            attachment,
        );
        self.persist_and_broadcast(&room, message).await
    }

    /// Records a read receipt and announces the status change to the
    /// message's room.
    pub async fn update_status(
        &self,
        reader: &ConnectionHandle,
        message_id: i64,
        status: MessageStatus,
    ) -> Result<(), EventError> {
        let receipt = self
            .store
            .append_read_receipt(message_id, &reader.user_id, status)
            .await?
            .ok_or_else(|| EventError::not_found("message not found"))?;
        let channel = RoomId::persisted(receipt.room_kind, &receipt.room_id);
        self.rooms.broadcast(
            &channel,
            EventName::MESSAGE_STATUS_UPDATE,
            json!({
                "message_id": receipt.message_id,
                "room_id": receipt.room_id,
                "reader_id": receipt.reader_id,
                "status": receipt.status,
            }),
        );
        Ok(())
    }

    /// Typing is ephemeral: no store involvement, and everyone but the
    /// typist hears about it immediately.
    pub fn typing(&self, sender: &ConnectionHandle, room: &RoomId, is_typing: bool) {
        self.rooms.broadcast_except(
            room,
            &sender.connection_id,
            EventName::TYPING_STATUS,
            json!({
                "room_id": room.raw(),
                "user_id": &sender.user_id,
                "is_typing": is_typing,
            }),
        );
    }

    /// Deletes a chat everywhere: store first, then one final broadcast,
    /// then the live room is torn down so nothing further flows.
    pub async fn delete_chat(
        &self,
        actor: &ConnectionHandle,
        room_id: &str,
    ) -> Result<(), EventError> {
        let room = self.authorized_room(actor, room_id).await?;
        if !self.store.delete_room(room_id).await? {
            return Err(EventError::not_found("room not found"));
        }
        let channel = RoomId::persisted(room.kind, room_id);
        self.rooms
            .broadcast(&channel, EventName::CHAT_DELETED, json!({ "room_id": room_id }));
        self.rooms.drop_room(&channel);
        tracing::info!(%room_id, actor_id = %actor.user_id, "chat deleted");
        Ok(())
    }

    async fn authorized_room(
        &self,
        conn: &ConnectionHandle,
        room_id: &str,
    ) -> Result<Room, EventError> {
        let room = self
            .store
            .find_room(room_id)
            .await?
            .ok_or_else(|| EventError::not_found("room not found"))?;
        if !room.is_participant(&conn.user_id) {
            return Err(EventError::forbidden("not a participant of this room"));
        }
        Ok(room)
    }

    async fn persist_and_broadcast(
        &self,
        room: &Room,
        message: Message,
    ) -> Result<Message, EventError> {
        self.store.create_message(&message).await?;
        let channel = RoomId::persisted(room.kind, &room.id);
        let delivered = self.rooms.broadcast(
            &channel,
            EventName::NEW_MESSAGE,
            serde_json::to_value(&message).unwrap_or_default(),
        );
        tracing::debug!(message_id = message.id, room_id = %room.id, delivered, "message fanned out");
        Ok(message)
    }
}
