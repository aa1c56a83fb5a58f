//! blobseal-crypto: client-side envelope encryption for untrusted blob stores
//!
//! Every payload is encrypted under a fresh data encryption key (DEK). The DEK
//! is then wrapped twice, once for the data owner and once for the admin, so
//! either principal can recover the plaintext on its own.
//!
//! Key hierarchy:
//! ```text
//! Master Secret (from registry, selected by fingerprint)
//!   ├── User Wrap Key  = HKDF-SHA256(secret, salt, info=user identity)
//!   │   └── user envelope:  AES-256-GCM(user wrap key, user iv, DEK)
//!   ├── Admin Wrap Key = HKDF-SHA256(secret, salt, info=admin identity)
//!   │   └── admin envelope: AES-256-GCM(admin wrap key, admin iv, DEK)
//!   └── (DEK, 256-bit random per payload)
//!       └── ciphertext:     AES-256-GCM(DEK, payload iv, plaintext)
//! ```
//!
//! The salt, the payload IV, and both envelopes travel with the ciphertext as
//! flat string headers (see [`headers`]).

pub mod cipher;
pub mod envelope;
pub mod error;
pub mod headers;
pub mod kdf;
pub mod keys;
pub mod metadata;
pub mod registry;
pub mod rng;

pub use cipher::{decrypt_payload, encrypt_payload, unwrap_key, wrap_key};
pub use envelope::{Principal, Sealer};
pub use error::{SealError, SealResult, ValidationError, ValidationErrors};
pub use headers::{from_headers, to_headers, HeaderMap};
pub use kdf::derive_wrap_key;
pub use keys::{DataKey, Iv, MasterSecret, Salt, WrapKey};
pub use metadata::{Algorithm, CryptoMetadata, EncodedPayload, KeyVersion, Role, WrappedKeyEnvelope};
pub use registry::{generate_master_secret, GeneratedSecret, SecretRegistry};
pub use rng::{generate_dek, generate_iv, generate_salt, OsRandom, RandomSource, ThreadRandom};

/// Size of a DEK or wrap key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM IV (96-bit)
pub const IV_SIZE: usize = 12;

/// Size of a freshly generated KDF salt
pub const SALT_SIZE: usize = 16;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a wrapped DEK: key bytes plus the appended tag
pub const WRAPPED_KEY_SIZE: usize = KEY_SIZE + TAG_SIZE;
