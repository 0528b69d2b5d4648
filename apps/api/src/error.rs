//! Errors reported back over the socket.
//!
//! A failed dispatch never tears the connection down. It turns into an
//! `ERROR` event addressed only to the connection that issued it, carrying
//! a stable machine code and a human-readable message.

use serde_json::{json, Value};
use thiserror::Error;

use crate::store::chat::StoreError;
use crate::store::objects::StorageError;

#[derive(Debug, Error)]
pub enum EventError {
    /// Payload failed decoding or validation.
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    NotFound(String),
    /// Authenticated, but not allowed to touch the target.
    #[error("{0}")]
    Forbidden(String),
    /// Valid request against a target in the wrong state.
    #[error("{0}")]
    Conflict(String),
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error("storage failed: {0}")]
    Storage(String),
}

impl EventError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Conflict(_) => "CONFLICT",
            Self::Persistence(_) => "PERSISTENCE_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Body of the `ERROR` dispatch sent to the offending connection.
    pub fn to_event_data(&self) -> Value {
        json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        })
    }
}

impl From<StoreError> for EventError {
    fn from(err: StoreError) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<StorageError> for EventError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err.to_string())
    }
}
