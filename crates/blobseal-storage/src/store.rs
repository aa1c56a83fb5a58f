//! The blob store seam

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use blobseal_crypto::HeaderMap;

/// Suffix of the JSON object that carries headers for backends without user metadata
pub const SIDECAR_SUFFIX: &str = ".headers.json";

/// A body and the headers stored with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub body: Vec<u8>,
    pub headers: HeaderMap,
}

/// Returned (inside `anyhow::Error`) when a blob id has nothing stored under it.
#[derive(Debug, thiserror::Error)]
#[error("blob not found: {0}")]
pub struct BlobNotFound(pub String);

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `body` and `headers` under `id`, replacing anything already there.
    async fn put(&self, id: &str, body: Vec<u8>, headers: HeaderMap) -> Result<()>;

    /// Fetch the blob stored under `id`. Fails with [`BlobNotFound`] when absent.
    async fn get(&self, id: &str) -> Result<StoredBlob>;
}

#[async_trait]
impl<T: BlobStore + ?Sized> BlobStore for Arc<T> {
    async fn put(&self, id: &str, body: Vec<u8>, headers: HeaderMap) -> Result<()> {
        (**self).put(id, body, headers).await
    }

    async fn get(&self, id: &str) -> Result<StoredBlob> {
        (**self).get(id).await
    }
}

/// Reject ids that cannot map cleanly onto an object key.
pub fn check_blob_id(id: &str) -> Result<()> {
    if id.is_empty() {
        anyhow::bail!("blob id must not be empty");
    }
    if id.starts_with('/') || id.ends_with('/') {
        anyhow::bail!("blob id {id:?} must not start or end with '/'");
    }
    if id.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        anyhow::bail!("blob id {id:?} contains an empty, '.' or '..' path segment");
    }
    if id.ends_with(SIDECAR_SUFFIX) {
        anyhow::bail!("blob id {id:?} collides with the header sidecar suffix");
    }
    Ok(())
}

/// True when `err` is a [`BlobNotFound`].
pub fn is_not_found(err: &anyhow::Error) -> bool {
    err.downcast_ref::<BlobNotFound>().is_some()
}
