use std::collections::HashMap;
use std::sync::Arc;

use mailproc_store::storage::{BlobRef, StorageError, Store};

/// A raw message as deposited by the inbound MTA. Never modified here.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub storage_key: String,
    pub content: Vec<u8>,
    pub meta: HashMap<String, String>,
}

impl RawMessage {
    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }
}

/// Read-only access to the raw messages.
#[derive(Clone)]
pub struct MessageStore {
    store: Arc<Store>,
}

impl MessageStore {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// `StorageError::NotFound` is returned as is, the caller decides.
    pub async fn fetch(&self, storage_key: &str) -> Result<RawMessage, StorageError> {
        let blob = self
            .store
            .blob_fetch(&BlobRef(storage_key.to_string()))
            .await?;
        Ok(RawMessage {
            storage_key: storage_key.to_string(),
            content: blob.value,
            meta: blob.meta,
        })
    }
}
