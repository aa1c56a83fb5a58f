//! Flat header encoding of [`CryptoMetadata`]
//!
//! Object stores only carry small string-valued metadata, so every field gets
//! its own header under a common prefix:
//! ```text
//! blobseal-keyversion        "1"
//! blobseal-algorithm         "AES-GCM"
//! blobseal-iv                base64(payload iv)
//! blobseal-salt              base64(salt)
//! blobseal-fingerprint       registry fingerprint
//! blobseal-user-iv           base64(user wrap iv)
//! blobseal-user-wrappedkey   base64(user wrapped DEK)
//! blobseal-admin-iv          base64(admin wrap iv)
//! blobseal-admin-wrappedkey  base64(admin wrapped DEK)
//! ```
//!
//! Writing and parsing share these constants. Parsing matches keys
//! case-insensitively, ignores unrelated headers, and reports every problem it
//! finds in one pass.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::ValidationErrors;
use crate::keys::{Iv, Salt};
use crate::metadata::{Algorithm, CryptoMetadata, KeyVersion, Role, WrappedKeyEnvelope};
use crate::{IV_SIZE, SALT_SIZE, WRAPPED_KEY_SIZE};

pub type HeaderMap = BTreeMap<String, String>;

pub const HEADER_PREFIX: &str = "blobseal-";

pub const KEY_VERSION_HEADER: &str = "blobseal-keyversion";
pub const ALGORITHM_HEADER: &str = "blobseal-algorithm";
pub const IV_HEADER: &str = "blobseal-iv";
pub const SALT_HEADER: &str = "blobseal-salt";
pub const FINGERPRINT_HEADER: &str = "blobseal-fingerprint";
pub const USER_IV_HEADER: &str = "blobseal-user-iv";
pub const USER_WRAPPED_KEY_HEADER: &str = "blobseal-user-wrappedkey";
pub const ADMIN_IV_HEADER: &str = "blobseal-admin-iv";
pub const ADMIN_WRAPPED_KEY_HEADER: &str = "blobseal-admin-wrappedkey";

/// Every header `to_headers` writes and `from_headers` requires.
pub const REQUIRED_HEADERS: [&str; 9] = [
    KEY_VERSION_HEADER,
    ALGORITHM_HEADER,
    IV_HEADER,
    SALT_HEADER,
    FINGERPRINT_HEADER,
    USER_IV_HEADER,
    USER_WRAPPED_KEY_HEADER,
    ADMIN_IV_HEADER,
    ADMIN_WRAPPED_KEY_HEADER,
];

fn envelope_headers(role: Role) -> (&'static str, &'static str) {
    match role {
        Role::User => (USER_IV_HEADER, USER_WRAPPED_KEY_HEADER),
        Role::Admin => (ADMIN_IV_HEADER, ADMIN_WRAPPED_KEY_HEADER),
    }
}

/// Flatten metadata into transport headers. Deterministic.
pub fn to_headers(meta: &CryptoMetadata) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(KEY_VERSION_HEADER.into(), meta.key_version.as_str().into());
    headers.insert(ALGORITHM_HEADER.into(), meta.algorithm.as_str().into());
    headers.insert(IV_HEADER.into(), STANDARD.encode(meta.iv.as_bytes()));
    headers.insert(SALT_HEADER.into(), STANDARD.encode(meta.salt.as_bytes()));
    headers.insert(FINGERPRINT_HEADER.into(), meta.global_fingerprint.clone());

    for role in [Role::User, Role::Admin] {
        let envelope = meta.envelope(role);
        let (iv_key, wrapped_key) = envelope_headers(role);
        headers.insert(iv_key.into(), STANDARD.encode(envelope.iv.as_bytes()));
        headers.insert(wrapped_key.into(), STANDARD.encode(&envelope.wrapped_key));
    }

    headers
}

/// Rebuild metadata from transport headers.
///
/// Checks, all accumulated: each required header present and non-empty; the
/// key version is `"1"`; the algorithm is `"AES-GCM"`; binary fields decode
/// as base64 to the right length; the fingerprint is one of
/// `legal_fingerprints`.
pub fn from_headers<I, K, V>(
    headers: I,
    legal_fingerprints: &[&str],
) -> Result<CryptoMetadata, ValidationErrors>
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut reader = HeaderReader::new(headers);

    let key_version = reader.parse(KEY_VERSION_HEADER, |v| {
        KeyVersion::parse(v).ok_or_else(|| format!("unsupported key version {v:?} (expected \"1\")"))
    });
    let algorithm = reader.parse(ALGORITHM_HEADER, |v| {
        Algorithm::parse(v).ok_or_else(|| format!("unsupported algorithm {v:?} (expected \"AES-GCM\")"))
    });
    let iv = reader.iv(IV_HEADER);
    let salt = reader.binary(SALT_HEADER, |bytes| {
        let len = bytes.len();
        Salt::from_bytes(bytes)
            .ok_or_else(|| format!("salt is {len} bytes (minimum {SALT_SIZE})"))
    });
    let fingerprint = reader.parse(FINGERPRINT_HEADER, |v| {
        if legal_fingerprints.iter().any(|fp| *fp == v) {
            Ok(v.to_string())
        } else {
            Err(format!("fingerprint {v:?} is not served by this registry"))
        }
    });
    let user = reader.envelope(Role::User);
    let admin = reader.envelope(Role::Admin);

    let errors = reader.finish();
    match (key_version, algorithm, iv, salt, fingerprint, user, admin) {
        (
            Some(key_version),
            Some(algorithm),
            Some(iv),
            Some(salt),
            Some(global_fingerprint),
            Some(user),
            Some(admin),
        ) if errors.is_empty() => Ok(CryptoMetadata {
            key_version,
            algorithm,
            global_fingerprint,
            salt,
            iv,
            user,
            admin,
        }),
        _ => Err(errors),
    }
}

/// Collects problems while pulling typed fields out of a header map.
struct HeaderReader {
    headers: BTreeMap<String, String>,
    errors: ValidationErrors,
}

impl HeaderReader {
    fn new<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut map = BTreeMap::new();
        let mut errors = ValidationErrors::new();
        for (k, v) in headers {
            let key = k.as_ref().to_ascii_lowercase();
            let value = v.as_ref();
            match map.get(&key) {
                Some(existing) if existing != value => {
                    // Only our own keys matter; unrelated duplicates are ignored
                    if key.starts_with(HEADER_PREFIX) && !errors.mentions(&key) {
                        errors.push(key.as_str(), "conflicting duplicate header");
                    }
                }
                Some(_) => {}
                None => {
                    map.insert(key, value.to_string());
                }
            }
        }
        Self {
            headers: map,
            errors,
        }
    }

    /// Presence check: the header exists and is not blank.
    fn text(&mut self, key: &'static str) -> Option<String> {
        match self.headers.get(key) {
            None => {
                self.errors.push(key, "missing required header");
                None
            }
            Some(v) if v.trim().is_empty() => {
                self.errors.push(key, "header is empty");
                None
            }
            Some(v) => Some(v.clone()),
        }
    }

    fn parse<T>(&mut self, key: &'static str, parse: impl FnOnce(&str) -> Result<T, String>) -> Option<T> {
        let value = self.text(key)?;
        match parse(&value) {
            Ok(parsed) => Some(parsed),
            Err(message) => {
                self.errors.push(key, message);
                None
            }
        }
    }

    fn binary<T>(
        &mut self,
        key: &'static str,
        convert: impl FnOnce(Vec<u8>) -> Result<T, String>,
    ) -> Option<T> {
        self.parse(key, |v| {
            let bytes = STANDARD.decode(v).map_err(|e| format!("invalid base64: {e}"))?;
            convert(bytes)
        })
    }

    fn iv(&mut self, key: &'static str) -> Option<Iv> {
        self.binary(key, |bytes| {
            Iv::from_slice(&bytes).ok_or_else(|| format!("IV is {} bytes (expected {IV_SIZE})", bytes.len()))
        })
    }

    fn envelope(&mut self, role: Role) -> Option<WrappedKeyEnvelope> {
        let (iv_key, wrapped_key) = envelope_headers(role);
        let iv = self.iv(iv_key);
        let wrapped = self.binary(wrapped_key, |bytes| {
            if bytes.len() == WRAPPED_KEY_SIZE {
                Ok(bytes)
            } else {
                Err(format!(
                    "wrapped key is {} bytes (expected {WRAPPED_KEY_SIZE})",
                    bytes.len()
                ))
            }
        });
        Some(WrappedKeyEnvelope {
            iv: iv?,
            wrapped_key: wrapped?,
        })
    }

    fn finish(self) -> ValidationErrors {
        self.errors
    }
}
