use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BlobsealError, BlobsealResult};

/// Top-level configuration (loaded from blobseal.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobsealConfig {
    pub log: LogConfig,
    pub secrets: SecretsConfig,
    pub storage: StorageConfig,
}

impl BlobsealConfig {
    /// Load the config file at `path`, falling back to defaults when it does not exist.
    pub fn load(path: &Path) -> BlobsealResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
            .map_err(|e| BlobsealError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Parse a TOML document.
    pub fn parse(toml_str: &str) -> BlobsealResult<Self> {
        toml::from_str(toml_str).map_err(|e| BlobsealError::Config(e.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// EnvFilter directive (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

/// Master secret registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    /// Identity string of the administrative principal
    pub admin_identity: String,
    /// Fingerprint of the secret that encodes new data.
    /// May be omitted when exactly one master secret is configured.
    pub primary: Option<String>,
    /// All master secrets that can still decode data, primary included
    pub master: Vec<MasterSecretConfig>,
}

/// Where to load one master secret from. Secret material is never inline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterSecretConfig {
    /// Explicit fingerprint (default: derived from the secret)
    pub fingerprint: Option<String>,
    /// Environment variable holding the base64 secret
    pub secret_env: Option<String>,
    /// File holding the base64 secret
    pub secret_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend
    pub backend: StorageBackend,
    /// Root directory for the fs backend
    pub root: PathBuf,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket name
    pub bucket: String,
    /// Enforce HTTPS for S3 connections (warn/error on HTTP endpoints)
    pub enforce_tls: bool,
    /// How crypto headers are persisted next to the blob body
    pub header_placement: HeaderPlacement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Fs,
    S3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HeaderPlacement {
    /// Object user metadata when the backend supports it, sidecar otherwise
    Auto,
    /// Object user metadata
    UserMetadata,
    /// `<id>.headers.json` object next to the blob
    Sidecar,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
        }
    }
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            admin_identity: "admin".into(),
            primary: None,
            master: Vec::new(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            root: PathBuf::from("~/.local/share/blobseal"),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "blobseal".into(),
            enforce_tls: false,
            header_placement: HeaderPlacement::Auto,
        }
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    match s.strip_prefix("~/") {
        Some(rest) => {
            let home = std::env::var("HOME").unwrap_or_default();
            PathBuf::from(home).join(rest)
        }
        None => path.to_path_buf(),
    }
}
