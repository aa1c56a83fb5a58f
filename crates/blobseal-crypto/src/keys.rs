//! Key material and nonce types
//!
//! Everything secret here zeroizes itself on drop and redacts itself from
//! `Debug` output. IVs and salts are public values and print normally.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use secrecy::{ExposeSecret, SecretSlice};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{SealError, SealResult};
use crate::{IV_SIZE, KEY_SIZE, SALT_SIZE};

/// Minimum length of a master secret in bytes
pub const MIN_SECRET_SIZE: usize = 16;

/// Number of SHA-256 bytes used for a derived fingerprint
const FINGERPRINT_BYTES: usize = 8;

/// A per-payload 256-bit data encryption key. Zeroized on drop.
pub struct DataKey {
    bytes: [u8; KEY_SIZE],
}

impl DataKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DataKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A per-principal key derived from a master secret; only ever wraps a DEK.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct WrapKey {
    bytes: [u8; KEY_SIZE],
}

impl WrapKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub(crate) fn zeroed() -> Self {
        Self::from_bytes([0u8; KEY_SIZE])
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8; KEY_SIZE] {
        &mut self.bytes
    }
}

impl std::fmt::Debug for WrapKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WrapKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Long-lived raw key material from the secret registry.
pub struct MasterSecret {
    bytes: SecretSlice<u8>,
}

impl MasterSecret {
    pub fn from_bytes(bytes: Vec<u8>) -> SealResult<Self> {
        if bytes.len() < MIN_SECRET_SIZE {
            let len = bytes.len();
            drop(Zeroizing::new(bytes));
            return Err(SealError::Configuration(format!(
                "master secret too short: {len} bytes (minimum {MIN_SECRET_SIZE})"
            )));
        }
        Ok(Self {
            bytes: SecretSlice::from(bytes),
        })
    }

    /// Decode a base64 secret as stored at rest. Surrounding whitespace is ignored.
    pub fn from_base64(encoded: &str) -> SealResult<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| SealError::Configuration(format!("master secret is not valid base64: {e}")))?;
        Self::from_bytes(bytes)
    }

    /// Base64 form of the secret, for writing it back out.
    pub fn to_base64(&self) -> Zeroizing<String> {
        Zeroizing::new(STANDARD.encode(self.expose()))
    }

    /// Short public identifier: first 8 bytes of SHA-256 over the secret, hex.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.expose());
        hex::encode(&digest[..FINGERPRINT_BYTES])
    }

    pub(crate) fn expose(&self) -> &[u8] {
        self.bytes.expose_secret()
    }
}

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterSecret")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A 96-bit AES-GCM initialization vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Iv([u8; IV_SIZE]);

impl Iv {
    pub fn from_bytes(bytes: [u8; IV_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        bytes.try_into().ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; IV_SIZE] {
        &self.0
    }
}

/// HKDF salt shared by the user and admin derivations of one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt(pub(crate) Vec<u8>);

impl Salt {
    /// Accepts any salt of at least [`SALT_SIZE`] bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Option<Self> {
        (bytes.len() >= SALT_SIZE).then_some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
