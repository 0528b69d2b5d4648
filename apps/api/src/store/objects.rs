//! Attachment blob storage.
//!
//! Uploads are whole buffers; chunk reassembly happens upstream on the
//! connection task. The production implementation hands the buffer to the
//! blob service over HTTP and gets the public URL back.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use thiserror::Error;

use fika_common::id::{prefix, prefixed_ulid};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unreachable: {0}")]
    Unreachable(String),
    #[error("storage rejected the upload with status {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Uploads a finished buffer and returns its public URL.
    async fn upload_buffer(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        folder: &str,
    ) -> Result<String, StorageError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Object store for tests and local development. URLs use a `memory://`
/// scheme so nothing ever mistakes them for real CDN links.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn object(&self, url: &str) -> Option<StoredObject> {
        self.objects.lock().get(url).cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStore {
    async fn upload_buffer(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        folder: &str,
    ) -> Result<String, StorageError> {
        let url = format!("memory://{}/{}", folder, prefixed_ulid(prefix::ATTACHMENT));
        self.objects.lock().insert(
            url.clone(),
            StoredObject {
                bytes,
                mime_type: mime_type.to_string(),
            },
        );
        Ok(url)
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// Talks to the blob service. The service answers a successful upload with
/// a JSON body carrying the public URL of the stored object.
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    url: String,
}

impl HttpObjectStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStore {
    async fn upload_buffer(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        folder: &str,
    ) -> Result<String, StorageError> {
        let response = self
            .client
            .post(format!("{}/upload", self.base_url))
            .query(&[("folder", folder)])
            .header(reqwest::header::CONTENT_TYPE, mime_type)
            .body(bytes)
            .send()
            .await
            .map_err(|err| StorageError::Unreachable(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StorageError::Rejected(response.status().as_u16()));
        }
        let parsed: UploadResponse = response
            .json()
            .await
            .map_err(|err| StorageError::Unreachable(err.to_string()))?;
        Ok(parsed.url)
    }
}
