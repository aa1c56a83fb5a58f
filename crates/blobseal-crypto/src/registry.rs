//! Master secret registry
//!
//! Holds every master secret that can still decode data, keyed by fingerprint,
//! plus the admin principal's identity. Exactly one entry is the primary: it
//! encodes all new data. The rest are older secrets kept around after a
//! rotation so existing ciphertexts stay readable.
//!
//! A registry is immutable once built and is meant to be shared behind an
//! `Arc` by every concurrent encode and decode.

use std::collections::BTreeMap;
use std::path::Path;

use blobseal_core::config::{expand_tilde, MasterSecretConfig, SecretsConfig};
use secrecy::SecretString;
use zeroize::Zeroizing;

use crate::error::{SealError, SealResult};
use crate::keys::MasterSecret;
use crate::rng::RandomSource;
use crate::KEY_SIZE;

#[derive(Debug)]
pub struct SecretRegistry {
    admin_identity: String,
    primary: (String, MasterSecret),
    others: BTreeMap<String, MasterSecret>,
}

impl SecretRegistry {
    /// Start a registry with its primary (encoding) secret.
    pub fn new(
        admin_identity: impl Into<String>,
        fingerprint: impl Into<String>,
        secret: MasterSecret,
    ) -> SealResult<Self> {
        let admin_identity = admin_identity.into();
        if admin_identity.is_empty() {
            return Err(SealError::Configuration(
                "admin identity must not be empty".into(),
            ));
        }
        let fingerprint = fingerprint.into();
        check_fingerprint(&fingerprint)?;

        Ok(Self {
            admin_identity,
            primary: (fingerprint, secret),
            others: BTreeMap::new(),
        })
    }

    /// Add a decode-only secret, e.g. one retired by a rotation.
    pub fn with_secret(mut self, fingerprint: impl Into<String>, secret: MasterSecret) -> SealResult<Self> {
        let fingerprint = fingerprint.into();
        check_fingerprint(&fingerprint)?;
        if self.contains(&fingerprint) {
            return Err(SealError::Configuration(format!(
                "duplicate master secret fingerprint: {fingerprint}"
            )));
        }
        self.others.insert(fingerprint, secret);
        Ok(self)
    }

    /// Build from the `[secrets]` config section, loading each secret from
    /// its environment variable or file.
    pub fn from_config(config: &SecretsConfig) -> SealResult<Self> {
        if config.master.is_empty() {
            return Err(SealError::Configuration(
                "no master secrets configured (secrets.master is empty)".into(),
            ));
        }

        let mut loaded = Vec::with_capacity(config.master.len());
        for (i, entry) in config.master.iter().enumerate() {
            let secret = load_secret(entry)
                .map_err(|e| SealError::Configuration(format!("secrets.master[{i}]: {e}")))?;
            let fingerprint = entry
                .fingerprint
                .clone()
                .unwrap_or_else(|| secret.fingerprint());
            loaded.push((fingerprint, secret));
        }

        let primary_fp = match (&config.primary, loaded.as_slice()) {
            (Some(fp), _) => fp.clone(),
            (None, [(only, _)]) => only.clone(),
            (None, _) => {
                return Err(SealError::Configuration(
                    "secrets.primary must be set when more than one master secret is configured"
                        .into(),
                ))
            }
        };

        let index = loaded
            .iter()
            .position(|(fp, _)| *fp == primary_fp)
            .ok_or_else(|| {
                SealError::Configuration(format!(
                    "secrets.primary {primary_fp:?} does not name a configured master secret"
                ))
            })?;
        let (fingerprint, secret) = loaded.remove(index);

        let mut registry = Self::new(config.admin_identity.clone(), fingerprint, secret)?;
        for (fingerprint, secret) in loaded {
            registry = registry.with_secret(fingerprint, secret)?;
        }

        tracing::info!(
            primary = %registry.primary_fingerprint(),
            secrets = registry.len(),
            "secret registry loaded"
        );
        Ok(registry)
    }

    pub fn admin_identity(&self) -> &str {
        &self.admin_identity
    }

    /// The secret that encodes new data, with its fingerprint.
    pub fn primary(&self) -> (&str, &MasterSecret) {
        (&self.primary.0, &self.primary.1)
    }

    pub fn primary_fingerprint(&self) -> &str {
        &self.primary.0
    }

    pub fn secret(&self, fingerprint: &str) -> Option<&MasterSecret> {
        if self.primary.0 == fingerprint {
            return Some(&self.primary.1);
        }
        self.others.get(fingerprint)
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.secret(fingerprint).is_some()
    }

    /// Every servable fingerprint, primary first.
    pub fn fingerprints(&self) -> Vec<&str> {
        std::iter::once(self.primary.0.as_str())
            .chain(self.others.keys().map(String::as_str))
            .collect()
    }

    pub fn len(&self) -> usize {
        1 + self.others.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Fingerprints travel as header values: printable ASCII, no spaces.
fn check_fingerprint(fingerprint: &str) -> SealResult<()> {
    if fingerprint.is_empty() || !fingerprint.chars().all(|c| c.is_ascii_graphic()) {
        return Err(SealError::Configuration(format!(
            "invalid fingerprint {fingerprint:?}: must be non-empty printable ASCII"
        )));
    }
    Ok(())
}

fn load_secret(entry: &MasterSecretConfig) -> Result<MasterSecret, String> {
    let encoded = match (&entry.secret_env, &entry.secret_file) {
        (Some(var), None) => Zeroizing::new(
            std::env::var(var).map_err(|_| format!("environment variable {var} is not set"))?,
        ),
        (None, Some(path)) => {
            let path = expand_tilde(path);
            warn_if_exposed(&path);
            Zeroizing::new(
                std::fs::read_to_string(&path)
                    .map_err(|e| format!("reading {}: {e}", path.display()))?,
            )
        }
        (Some(_), Some(_)) => return Err("set only one of secret_env and secret_file".into()),
        (None, None) => return Err("one of secret_env or secret_file is required".into()),
    };
    MasterSecret::from_base64(&encoded).map_err(|e| match e {
        SealError::Configuration(msg) => msg,
        other => other.to_string(),
    })
}

/// Warn when a secret file is readable by group or others. Returns whether it was.
#[cfg(unix)]
fn warn_if_exposed(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    let mode = meta.permissions().mode();
    let exposed = mode & 0o077 != 0;
    if exposed {
        tracing::warn!(
            path = %path.display(),
            mode = %format!("{:o}", mode & 0o777),
            "master secret file is readable by group or others; chmod 600 it"
        );
    }
    exposed
}

#[cfg(not(unix))]
fn warn_if_exposed(_path: &Path) -> bool {
    false
}

/// A freshly generated master secret, ready to be written to a secret file.
#[derive(Debug)]
pub struct GeneratedSecret {
    pub fingerprint: String,
    pub encoded: SecretString,
}

/// Generate a new 256-bit master secret and its derived fingerprint.
pub fn generate_master_secret<R: RandomSource + ?Sized>(rng: &R) -> SealResult<GeneratedSecret> {
    let mut bytes = vec![0u8; KEY_SIZE];
    rng.fill_bytes(&mut bytes);
    let secret = MasterSecret::from_bytes(bytes)?;

    Ok(GeneratedSecret {
        fingerprint: secret.fingerprint(),
        encoded: SecretString::from(secret.to_base64().to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::ThreadRandom;
    use secrecy::ExposeSecret;
    use std::path::PathBuf;

    fn secret(byte: u8) -> MasterSecret {
        MasterSecret::from_bytes(vec![byte; 32]).unwrap()
    }

    fn write_secret_file(dir: &Path, name: &str, byte: u8) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, secret(byte).to_base64().as_str()).unwrap();
        path
    }

    #[test]
    fn test_primary_and_rotation_lookup() {
        let registry = SecretRegistry::new("admin", "v2", secret(2))
            .unwrap()
            .with_secret("v1", secret(1))
            .unwrap();

        assert_eq!(registry.primary_fingerprint(), "v2");
        assert_eq!(registry.admin_identity(), "admin");
        assert!(registry.contains("v1"));
        assert!(registry.contains("v2"));
        assert!(!registry.contains("v0"));
        assert_eq!(registry.fingerprints(), vec!["v2", "v1"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_fingerprint_rejected() {
        let result = SecretRegistry::new("admin", "v1", secret(1))
            .unwrap()
            .with_secret("v1", secret(2));
        assert!(matches!(result, Err(SealError::Configuration(_))));
    }

    #[test]
    fn test_empty_admin_identity_rejected() {
        let result = SecretRegistry::new("", "v1", secret(1));
        assert!(matches!(result, Err(SealError::Configuration(_))));
    }

    #[test]
    fn test_invalid_fingerprint_rejected() {
        assert!(SecretRegistry::new("admin", "", secret(1)).is_err());
        assert!(SecretRegistry::new("admin", "has space", secret(1)).is_err());
        assert!(SecretRegistry::new("admin", "line\nbreak", secret(1)).is_err());
    }

    #[test]
    fn test_from_config_requires_secrets() {
        let result = SecretRegistry::from_config(&SecretsConfig::default());
        match result {
            Err(SealError::Configuration(msg)) => assert!(msg.contains("no master secrets")),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_from_config_files_with_explicit_primary() {
        let dir = tempfile::tempdir().unwrap();
        let config = SecretsConfig {
            admin_identity: "ops".into(),
            primary: Some("new".into()),
            master: vec![
                MasterSecretConfig {
                    fingerprint: Some("old".into()),
                    secret_file: Some(write_secret_file(dir.path(), "old.key", 1)),
                    ..Default::default()
                },
                MasterSecretConfig {
                    fingerprint: Some("new".into()),
                    secret_file: Some(write_secret_file(dir.path(), "new.key", 2)),
                    ..Default::default()
                },
            ],
        };

        let registry = SecretRegistry::from_config(&config).unwrap();
        assert_eq!(registry.primary_fingerprint(), "new");
        assert_eq!(registry.admin_identity(), "ops");
        assert_eq!(registry.primary().1.expose(), secret(2).expose());
        assert_eq!(registry.secret("old").unwrap().expose(), secret(1).expose());
    }

    #[test]
    fn test_from_config_single_secret_derives_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let config = SecretsConfig {
            master: vec![MasterSecretConfig {
                secret_file: Some(write_secret_file(dir.path(), "only.key", 5)),
                ..Default::default()
            }],
            ..Default::default()
        };

        let registry = SecretRegistry::from_config(&config).unwrap();
        assert_eq!(registry.primary_fingerprint(), secret(5).fingerprint());
    }

    #[cfg(unix)]
    #[test]
    fn test_from_config_loads_group_readable_secret_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = write_secret_file(dir.path(), "shared.key", 6);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        assert!(warn_if_exposed(&path));

        let config = SecretsConfig {
            master: vec![MasterSecretConfig {
                secret_file: Some(path.clone()),
                ..Default::default()
            }],
            ..Default::default()
        };
        let registry = SecretRegistry::from_config(&config).unwrap();
        assert_eq!(registry.primary_fingerprint(), secret(6).fingerprint());

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        assert!(!warn_if_exposed(&path));
    }

    #[test]
    fn test_from_config_ambiguous_primary() {
        let dir = tempfile::tempdir().unwrap();
        let config = SecretsConfig {
            master: vec![
                MasterSecretConfig {
                    secret_file: Some(write_secret_file(dir.path(), "a.key", 1)),
                    ..Default::default()
                },
                MasterSecretConfig {
                    secret_file: Some(write_secret_file(dir.path(), "b.key", 2)),
                    ..Default::default()
                },
            ],
            ..Default::default()
        };

        let result = SecretRegistry::from_config(&config);
        assert!(matches!(result, Err(SealError::Configuration(_))));
    }

    #[test]
    fn test_from_config_unknown_primary() {
        let dir = tempfile::tempdir().unwrap();
        let config = SecretsConfig {
            primary: Some("missing".into()),
            master: vec![MasterSecretConfig {
                fingerprint: Some("present".into()),
                secret_file: Some(write_secret_file(dir.path(), "p.key", 1)),
                ..Default::default()
            }],
            ..Default::default()
        };

        let result = SecretRegistry::from_config(&config);
        match result {
            Err(SealError::Configuration(msg)) => assert!(msg.contains("missing")),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_from_config_env_secret() {
        let var = "BLOBSEAL_TEST_REGISTRY_SECRET_7F3A";
        std::env::set_var(var, secret(9).to_base64().as_str());

        let config = SecretsConfig {
            master: vec![MasterSecretConfig {
                fingerprint: Some("env".into()),
                secret_env: Some(var.into()),
                ..Default::default()
            }],
            ..Default::default()
        };

        let registry = SecretRegistry::from_config(&config).unwrap();
        assert_eq!(registry.secret("env").unwrap().expose(), secret(9).expose());
        std::env::remove_var(var);
    }

    #[test]
    fn test_from_config_source_errors() {
        let unset = MasterSecretConfig {
            secret_env: Some("BLOBSEAL_TEST_DEFINITELY_UNSET_91C2".into()),
            ..Default::default()
        };
        let both = MasterSecretConfig {
            secret_env: Some("X".into()),
            secret_file: Some(PathBuf::from("/nonexistent")),
            ..Default::default()
        };
        let neither = MasterSecretConfig::default();
        let missing_file = MasterSecretConfig {
            secret_file: Some(PathBuf::from("/nonexistent/blobseal.key")),
            ..Default::default()
        };

        for entry in [unset, both, neither, missing_file] {
            let config = SecretsConfig {
                master: vec![entry.clone()],
                ..Default::default()
            };
            let result = SecretRegistry::from_config(&config);
            match result {
                Err(SealError::Configuration(msg)) => {
                    assert!(msg.starts_with("secrets.master[0]"), "{msg}")
                }
                other => panic!("expected configuration error for {entry:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_from_config_short_secret() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.key");
        std::fs::write(&path, "c2hvcnQ=").unwrap();

        let config = SecretsConfig {
            master: vec![MasterSecretConfig {
                secret_file: Some(path),
                ..Default::default()
            }],
            ..Default::default()
        };
        let result = SecretRegistry::from_config(&config);
        match result {
            Err(SealError::Configuration(msg)) => assert!(msg.contains("too short"), "{msg}"),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_generate_master_secret() {
        let generated = generate_master_secret(&ThreadRandom).unwrap();
        let secret = MasterSecret::from_base64(generated.encoded.expose_secret()).unwrap();

        assert_eq!(secret.expose().len(), KEY_SIZE);
        assert_eq!(secret.fingerprint(), generated.fingerprint);

        let other = generate_master_secret(&ThreadRandom).unwrap();
        assert_ne!(generated.fingerprint, other.fingerprint);
    }
}
