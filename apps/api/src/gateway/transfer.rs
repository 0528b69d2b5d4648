//! Chunked attachment uploads.
//!
//! Clients stream base64 chunks over the socket; the assembler buffers
//! them per (room, filename) until the chunk flagged as last. Each
//! assembler is owned by its connection task, so a disconnect drops any
//! half-finished upload with it and nothing leaks into shared state.

use std::collections::HashMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::error::EventError;

/// Hard cap on an assembled file.
pub const MAX_TRANSFER_BYTES: usize = 8 * 1024 * 1024;

/// How many files one connection may have in flight at once.
pub const MAX_OPEN_TRANSFERS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TransferKey {
    room_id: String,
    filename: String,
}

struct Buffer {
    mime_type: String,
    bytes: Vec<u8>,
}

/// A fully reassembled upload, ready for storage.
#[derive(Debug)]
pub struct CompletedTransfer {
    pub room_id: String,
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
pub struct TransferAssembler {
    buffers: HashMap<TransferKey, Buffer>,
}

impl TransferAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes and appends one chunk, returning the completed transfer when
    /// `is_last` is set. The mime type is taken from the first chunk of a
    /// file. Any error discards that file's buffer; the client restarts the
    /// upload from the first chunk.
    pub fn ingest(
        &mut self,
        room_id: &str,
        filename: &str,
        mime_type: &str,
        chunk: &str,
        is_last: bool,
    ) -> Result<Option<CompletedTransfer>, EventError> {
        if room_id.is_empty() || filename.is_empty() {
            return Err(EventError::invalid_argument(
                "room_id and filename are required",
            ));
        }
        let key = TransferKey {
            room_id: room_id.to_string(),
            filename: filename.to_string(),
        };

        // Taking the buffer out up front means every early return below
        // leaves the failed upload discarded.
        let existing = self.buffers.remove(&key);

        let decoded = BASE64
            .decode(chunk)
            .map_err(|_| EventError::invalid_argument("chunk is not valid base64"))?;

        if existing.is_none() && self.buffers.len() >= MAX_OPEN_TRANSFERS {
            return Err(EventError::invalid_argument("too many uploads in flight"));
        }
        let mut buffer = existing.unwrap_or_else(|| Buffer {
            mime_type: mime_type.to_string(),
            bytes: Vec::new(),
        });
        if buffer.bytes.len() + decoded.len() > MAX_TRANSFER_BYTES {
            return Err(EventError::invalid_argument(
                "file exceeds the upload size limit",
            ));
        }
        buffer.bytes.extend_from_slice(&decoded);

        if is_last {
            return Ok(Some(CompletedTransfer {
                room_id: key.room_id,
                filename: key.filename,
                mime_type: buffer.mime_type,
                bytes: buffer.bytes,
            }));
        }
        self.buffers.insert(key, buffer);
        Ok(None)
    }

    /// Number of partially received files.
    pub fn open_transfers(&self) -> usize {
        self.buffers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b64(bytes: &[u8]) -> String {
        BASE64.encode(bytes)
    }

    #[test]
    fn chunks_concatenate_in_arrival_order() {
        let mut assembler = TransferAssembler::new();
        let parts: [&[u8]; 3] = [b"fika ", b"file ", b"payload"];

        for part in &parts[..2] {
            let done = assembler
                .ingest("chat_1", "notes.txt", "text/plain", &b64(part), false)
                .expect("ingest");
            assert!(done.is_none());
        }
        let done = assembler
            .ingest("chat_1", "notes.txt", "text/plain", &b64(parts[2]), true)
            .expect("ingest")
            .expect("completed");

        assert_eq!(done.bytes, b"fika file payload");
        assert_eq!(done.mime_type, "text/plain");
        assert_eq!(done.filename, "notes.txt");
        assert_eq!(assembler.open_transfers(), 0);
    }

    #[test]
    fn single_chunk_uploads_complete_immediately() {
        let mut assembler = TransferAssembler::new();
        let done = assembler
            .ingest("chat_1", "a.bin", "application/octet-stream", &b64(b"xyz"), true)
            .expect("ingest")
            .expect("completed");
        assert_eq!(done.bytes, b"xyz");
    }

    #[test]
    fn files_are_keyed_by_room_and_name() {
        let mut assembler = TransferAssembler::new();
        assembler
            .ingest("chat_1", "a.txt", "text/plain", &b64(b"aaa"), false)
            .expect("ingest");
        assembler
            .ingest("chat_2", "a.txt", "text/plain", &b64(b"bbb"), false)
            .expect("ingest");
        assembler
            .ingest("chat_1", "b.txt", "text/plain", &b64(b"ccc"), false)
            .expect("ingest");
        assert_eq!(assembler.open_transfers(), 3);

        let done = assembler
            .ingest("chat_1", "a.txt", "text/plain", &b64(b"!"), true)
            .expect("ingest")
            .expect("completed");
        assert_eq!(done.bytes, b"aaa!");
        assert_eq!(assembler.open_transfers(), 2);
    }

    #[test]
    fn bad_base64_discards_the_buffer() {
        let mut assembler = TransferAssembler::new();
        assembler
            .ingest("chat_1", "a.txt", "text/plain", &b64(b"aaa"), false)
            .expect("ingest");

        let err = assembler
            .ingest("chat_1", "a.txt", "text/plain", "!!! not base64 !!!", false)
            .expect_err("rejected");
        assert!(matches!(err, EventError::InvalidArgument(_)));
        assert_eq!(assembler.open_transfers(), 0);

        // A restart is clean; nothing of the first attempt survives.
        let done = assembler
            .ingest("chat_1", "a.txt", "text/plain", &b64(b"bbb"), true)
            .expect("ingest")
            .expect("completed");
        assert_eq!(done.bytes, b"bbb");
    }

    #[test]
    fn oversized_files_are_rejected_and_discarded() {
        let mut assembler = TransferAssembler::new();
        let half = vec![0u8; MAX_TRANSFER_BYTES / 2 + 1];

        assembler
            .ingest("chat_1", "big.bin", "application/octet-stream", &b64(&half), false)
            .expect("ingest");
        let err = assembler
            .ingest("chat_1", "big.bin", "application/octet-stream", &b64(&half), false)
            .expect_err("rejected");
        assert!(matches!(err, EventError::InvalidArgument(_)));
        assert_eq!(assembler.open_transfers(), 0);
    }

    #[test]
    fn open_transfer_cap_is_enforced() {
        let mut assembler = TransferAssembler::new();
        for i in 0..MAX_OPEN_TRANSFERS {
            assembler
                .ingest("chat_1", &format!("f{i}.txt"), "text/plain", &b64(b"x"), false)
                .expect("ingest");
        }

        let err = assembler
            .ingest("chat_1", "one-too-many.txt", "text/plain", &b64(b"x"), false)
            .expect_err("rejected");
        assert!(matches!(err, EventError::InvalidArgument(_)));

        // Chunks for an upload that is already open still go through.
        assembler
            .ingest("chat_1", "f0.txt", "text/plain", &b64(b"y"), false)
            .expect("ingest");

        // Finishing one frees a slot.
        assembler
            .ingest("chat_1", "f1.txt", "text/plain", &b64(b"y"), true)
            .expect("ingest")
            .expect("completed");
        assembler
            .ingest("chat_1", "one-too-many.txt", "text/plain", &b64(b"x"), false)
            .expect("ingest");
    }

    #[test]
    fn mime_type_comes_from_the_first_chunk() {
        let mut assembler = TransferAssembler::new();
        assembler
            .ingest("chat_1", "pic.png", "image/png", &b64(b"a"), false)
            .expect("ingest");
        let done = assembler
            .ingest("chat_1", "pic.png", "application/octet-stream", &b64(b"b"), true)
            .expect("ingest")
            .expect("completed");
        assert_eq!(done.mime_type, "image/png");
    }

    #[test]
    fn missing_identifiers_are_rejected() {
        let mut assembler = TransferAssembler::new();
        assert!(assembler
            .ingest("", "a.txt", "text/plain", &b64(b"x"), false)
            .is_err());
        assert!(assembler
            .ingest("chat_1", "", "text/plain", &b64(b"x"), false)
            .is_err());
    }
}
