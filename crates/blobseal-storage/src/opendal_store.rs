//! Blob store over an OpenDAL operator
//!
//! Headers ride along as object user metadata when the backend supports it.
//! Otherwise they go in a JSON sidecar object at `<id>.headers.json`. The two
//! objects are written body first, then sidecar; if the sidecar write fails the
//! body is put back the way it was (previous bytes restored, or removed when
//! there were none). The pair is not atomic: a concurrent reader can still see
//! the new body next to the old headers between the two writes, which fails
//! authentication rather than yielding wrong plaintext.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use blobseal_core::config::HeaderPlacement;
use blobseal_crypto::HeaderMap;
use opendal::Operator;

use crate::store::{check_blob_id, BlobNotFound, BlobStore, StoredBlob, SIDECAR_SUFFIX};

#[derive(Debug, Clone)]
pub struct OpendalBlobStore {
    op: Operator,
    sidecar: bool,
}

impl OpendalBlobStore {
    /// Wrap `op`, resolving `placement` against the backend's capabilities.
    pub fn new(op: Operator, placement: HeaderPlacement) -> Result<Self> {
        let supports_metadata = op.info().full_capability().write_with_user_metadata;
        let sidecar = match placement {
            HeaderPlacement::Auto => !supports_metadata,
            HeaderPlacement::Sidecar => true,
            HeaderPlacement::UserMetadata if supports_metadata => false,
            HeaderPlacement::UserMetadata => anyhow::bail!(
                "storage backend {} does not support user metadata; \
                 set storage.header_placement = \"sidecar\" or \"auto\"",
                op.info().scheme()
            ),
        };
        tracing::debug!(
            scheme = %op.info().scheme(),
            sidecar,
            "opendal blob store ready"
        );
        Ok(Self { op, sidecar })
    }

    pub fn operator(&self) -> &Operator {
        &self.op
    }

    /// Whether headers are kept in a sidecar object.
    pub fn uses_sidecar(&self) -> bool {
        self.sidecar
    }

    async fn read_body(&self, id: &str) -> Result<Vec<u8>> {
        match self.op.read(id).await {
            Ok(data) => Ok(data.to_vec()),
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => {
                Err(BlobNotFound(id.to_string()).into())
            }
            Err(e) => Err(anyhow::anyhow!("reading blob {id}: {e}")),
        }
    }

    async fn read_sidecar(&self, id: &str) -> Result<HeaderMap> {
        let key = sidecar_key(id);
        match self.op.read(&key).await {
            Ok(data) => serde_json::from_slice(&data.to_bytes())
                .with_context(|| format!("parsing header sidecar {key}")),
            // Body present but headers missing: surface as empty so header
            // validation reports every absent field.
            Err(e) if e.kind() == opendal::ErrorKind::NotFound => {
                tracing::warn!(id, "header sidecar missing");
                Ok(HeaderMap::new())
            }
            Err(e) => Err(anyhow::anyhow!("reading header sidecar {key}: {e}")),
        }
    }

    /// Undo a body write whose sidecar could not be written.
    async fn restore_body(&self, id: &str, previous: Option<Vec<u8>>) {
        let restored = match previous {
            Some(bytes) => self.op.write(id, bytes).await.map(|_| ()),
            None => self.op.delete(id).await,
        };
        match restored {
            Ok(()) => tracing::warn!(id, "header sidecar write failed; blob body rolled back"),
            Err(e) => tracing::error!(id, error = %e, "header sidecar write failed and body rollback failed"),
        }
    }

    async fn read_user_metadata(&self, id: &str) -> Result<HeaderMap> {
        let meta = self
            .op
            .stat(id)
            .await
            .map_err(|e| anyhow::anyhow!("stat blob {id}: {e}"))?;
        Ok(meta
            .user_metadata()
            .into_iter()
            .flatten()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

fn sidecar_key(id: &str) -> String {
    format!("{id}{SIDECAR_SUFFIX}")
}

#[async_trait]
impl BlobStore for OpendalBlobStore {
    async fn put(&self, id: &str, body: Vec<u8>, headers: HeaderMap) -> Result<()> {
        check_blob_id(id)?;
        let len = body.len();

        if self.sidecar {
            let json = serde_json::to_vec_pretty(&headers).context("serializing headers")?;
            let previous = match self.op.read(id).await {
                Ok(data) => Some(data.to_vec()),
                Err(e) if e.kind() == opendal::ErrorKind::NotFound => None,
                Err(e) => return Err(anyhow::anyhow!("reading blob {id} before overwrite: {e}")),
            };

            self.op
                .write(id, body)
                .await
                .map_err(|e| anyhow::anyhow!("writing blob {id}: {e}"))?;

            let key = sidecar_key(id);
            if let Err(e) = self.op.write(&key, json).await {
                self.restore_body(id, previous).await;
                return Err(anyhow::anyhow!("writing header sidecar {key}: {e}"));
            }
        } else {
            let metadata: HashMap<String, String> = headers.into_iter().collect();
            self.op
                .write_with(id, body)
                .user_metadata(metadata)
                .await
                .map_err(|e| anyhow::anyhow!("writing blob {id}: {e}"))?;
        }

        tracing::debug!(id, bytes = len, sidecar = self.sidecar, "blob stored");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<StoredBlob> {
        check_blob_id(id)?;
        let body = self.read_body(id).await?;
        let headers = if self.sidecar {
            self.read_sidecar(id).await?
        } else {
            self.read_user_metadata(id).await?
        };
        Ok(StoredBlob { body, headers })
    }
}
