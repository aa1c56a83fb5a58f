//! Process-local blob store

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use blobseal_crypto::HeaderMap;
use tokio::sync::RwLock;

use crate::store::{check_blob_id, BlobNotFound, BlobStore, StoredBlob};

/// In-memory [`BlobStore`]. Contents are lost when the value is dropped.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }

    pub async fn remove(&self, id: &str) -> Option<StoredBlob> {
        self.blobs.write().await.remove(id)
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, id: &str, body: Vec<u8>, headers: HeaderMap) -> Result<()> {
        check_blob_id(id)?;
        self.blobs
            .write()
            .await
            .insert(id.to_string(), StoredBlob { body, headers });
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<StoredBlob> {
        self.blobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| BlobNotFound(id.to_string()).into())
    }
}
