//! OpenDAL Operator factory for blobseal storage backends

use anyhow::{Context, Result};
use blobseal_core::config::{expand_tilde, StorageBackend, StorageConfig};
use opendal::Operator;

/// S3 access credentials, kept out of the config file.
#[derive(Clone)]
pub struct S3Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl std::fmt::Debug for S3Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"[REDACTED]")
            .finish()
    }
}

impl S3Credentials {
    /// Read AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY (standard S3 env vars).
    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").context(
            "S3 credentials not set: export AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY",
        )?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("S3 credentials not set: export AWS_SECRET_ACCESS_KEY")?;
        Ok(Self {
            access_key_id,
            secret_access_key,
        })
    }
}

/// Build the operator selected by `storage.backend`.
///
/// S3 credentials come from the environment; see [`S3Credentials::from_env`].
pub fn build_operator(storage: &StorageConfig) -> Result<Operator> {
    match storage.backend {
        StorageBackend::Memory => {
            tracing::debug!("using in-memory storage backend");
            layered(opendal::services::Memory::default())
        }
        StorageBackend::Fs => {
            let root = expand_tilde(&storage.root);
            tracing::debug!(root = %root.display(), "using filesystem storage backend");
            layered(opendal::services::Fs::default().root(&root.to_string_lossy()))
        }
        StorageBackend::S3 => {
            check_endpoint(storage)?;
            s3_operator(storage, &S3Credentials::from_env()?)
        }
    }
}

/// Build an S3 operator (any S3-compatible endpoint, path-style addressing).
///
/// If `enforce_tls` is true and the endpoint uses HTTP, this returns an error.
/// Otherwise, a warning is logged for non-HTTPS endpoints.
pub fn build_s3_operator(storage: &StorageConfig, creds: &S3Credentials) -> Result<Operator> {
    check_endpoint(storage)?;
    s3_operator(storage, creds)
}

fn s3_operator(storage: &StorageConfig, creds: &S3Credentials) -> Result<Operator> {
    // opendal 0.55: S3 builder uses consuming pattern (methods take `self`, return `Self`)
    let builder = opendal::services::S3::default()
        .endpoint(&storage.endpoint)
        .region(&storage.region)
        .bucket(&storage.bucket)
        .access_key_id(&creds.access_key_id)
        .secret_access_key(&creds.secret_access_key);

    layered(builder).context("creating OpenDAL S3 operator")
}

fn check_endpoint(storage: &StorageConfig) -> Result<()> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            );
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP, credentials are transmitted unencrypted. \
             Set storage.enforce_tls = true and use HTTPS in production."
        );
    }
    Ok(())
}

fn layered<B: opendal::Builder>(builder: B) -> Result<Operator> {
    let op = Operator::new(builder)
        .context("creating OpenDAL operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();
    Ok(op)
}
