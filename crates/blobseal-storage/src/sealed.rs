//! Envelope encryption over any [`BlobStore`]

use anyhow::{Context, Result};
use blobseal_crypto::{CryptoMetadata, Principal, SealError, Sealer, ValidationErrors};

use crate::store::BlobStore;

/// Seals on the way in, opens on the way out.
///
/// Errors from the crypto layer are [`SealError`]s inside the returned
/// `anyhow::Error`; a missing blob is a [`crate::BlobNotFound`].
#[derive(Debug)]
pub struct SealedStore<S> {
    store: S,
    sealer: Sealer,
}

impl<S: BlobStore> SealedStore<S> {
    pub fn new(store: S, sealer: Sealer) -> Self {
        Self { store, sealer }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn sealer(&self) -> &Sealer {
        &self.sealer
    }

    /// Encrypt `plaintext` for `identity` (and the admin) and store it under `id`.
    pub async fn put(&self, id: &str, identity: &str, plaintext: impl AsRef<[u8]>) -> Result<CryptoMetadata> {
        let sealed = self.sealer.encode(identity, plaintext)?;
        let headers = self.sealer.to_headers(&sealed.metadata);

        self.store
            .put(id, sealed.ciphertext.into_bytes(), headers)
            .await
            .with_context(|| format!("storing sealed blob {id}"))?;

        tracing::info!(id, fingerprint = %sealed.metadata.global_fingerprint, "blob sealed");
        Ok(sealed.metadata)
    }

    /// Fetch `id` and decrypt it as `principal`.
    pub async fn get(&self, id: &str, principal: &Principal) -> Result<Vec<u8>> {
        let blob = self.store.get(id).await?;
        let meta = self.sealer.parse_headers(&blob.headers)?;

        let ciphertext = std::str::from_utf8(&blob.body).map_err(|_| {
            let mut errors = ValidationErrors::new();
            errors.push("ciphertext", "stored body is not base64 text");
            SealError::Validation(errors)
        })?;
        let plaintext = self.sealer.decode_bytes(&meta, principal, ciphertext)?;

        tracing::info!(id, principal = principal.role().as_str(), "blob opened");
        Ok(plaintext)
    }

    /// Fetch `id` and decrypt it as UTF-8 text.
    pub async fn get_text(&self, id: &str, principal: &Principal) -> Result<String> {
        let plaintext = self.get(id, principal).await?;
        String::from_utf8(plaintext).map_err(|_| {
            let mut errors = ValidationErrors::new();
            errors.push("plaintext", "decrypted payload is not valid UTF-8");
            SealError::Validation(errors).into()
        })
    }

    /// Parse and validate the stored headers of `id` without decrypting.
    pub async fn inspect(&self, id: &str) -> Result<CryptoMetadata> {
        let blob = self.store.get(id).await?;
        Ok(self.sealer.parse_headers(&blob.headers)?)
    }
}
