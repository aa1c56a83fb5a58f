//! The record that says how one ciphertext was wrapped
//!
//! A [`CryptoMetadata`] is built once by encode, stored next to the ciphertext,
//! and read back by decode. It is never mutated in between.

use crate::keys::{Iv, Salt};

/// Pins the KDF and wrap parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyVersion {
    V1,
}

impl KeyVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyVersion::V1 => "1",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "1" => Some(KeyVersion::V1),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    AesGcm,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::AesGcm => "AES-GCM",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AES-GCM" => Some(Algorithm::AesGcm),
            _ => None,
        }
    }
}

/// Which envelope a principal opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

/// One principal's copy of the DEK: `AES-256-GCM(wrap key, iv, DEK)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedKeyEnvelope {
    pub iv: Iv,
    /// Encrypted DEK with the tag appended (48 bytes)
    pub wrapped_key: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoMetadata {
    pub key_version: KeyVersion,
    pub algorithm: Algorithm,
    /// Registry entry whose secret derived both wrap keys
    pub global_fingerprint: String,
    /// Shared by the user and admin derivations
    pub salt: Salt,
    /// Payload IV, distinct from either wrap IV
    pub iv: Iv,
    pub user: WrappedKeyEnvelope,
    pub admin: WrappedKeyEnvelope,
}

impl CryptoMetadata {
    pub fn envelope(&self, role: Role) -> &WrappedKeyEnvelope {
        match role {
            Role::User => &self.user,
            Role::Admin => &self.admin,
        }
    }
}

/// The unit of storage: base64 ciphertext plus the metadata needed to open it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPayload {
    pub ciphertext: String,
    pub metadata: CryptoMetadata,
}
