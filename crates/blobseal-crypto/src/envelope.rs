//! Encode and decode pipelines
//!
//! Encode:
//! ```text
//! DEK, payload iv, salt, user iv, admin iv  <- five independent CSPRNG draws
//! user key  = KDF(primary secret, salt, identity)
//! admin key = KDF(primary secret, salt, admin identity)
//! user / admin envelopes = wrap(DEK) under each key with its own iv
//! ciphertext = AES-256-GCM(DEK, payload iv, plaintext)
//! ```
//!
//! Decode picks the principal's envelope, looks the secret up by fingerprint,
//! re-derives the wrap key, unwraps the DEK, and decrypts. Each call is a
//! single stateless transaction that yields either authenticated plaintext
//! or an error.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use zeroize::Zeroize;

use crate::cipher::{decrypt_payload, encrypt_payload, unwrap_key, wrap_key};
use crate::error::{SealError, SealResult};
use crate::headers::{from_headers, to_headers, HeaderMap};
use crate::kdf::derive_wrap_key;
use crate::metadata::{Algorithm, CryptoMetadata, EncodedPayload, KeyVersion, Role, WrappedKeyEnvelope};
use crate::registry::SecretRegistry;
use crate::rng::{generate_dek, generate_iv, generate_salt, RandomSource, ThreadRandom};

/// Who is asking to decrypt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    /// The data owner, by the identity string used at encode time
    User(String),
    /// The registry's administrative identity
    Admin,
}

impl Principal {
    pub fn user(identity: impl Into<String>) -> Self {
        Principal::User(identity.into())
    }

    pub fn role(&self) -> Role {
        match self {
            Principal::User(_) => Role::User,
            Principal::Admin => Role::Admin,
        }
    }
}

/// Envelope orchestrator. Cheap to clone; safe to share across threads.
#[derive(Clone)]
pub struct Sealer {
    registry: Arc<SecretRegistry>,
    rng: Arc<dyn RandomSource>,
}

impl std::fmt::Debug for Sealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sealer")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Sealer {
    pub fn new(registry: Arc<SecretRegistry>) -> Self {
        Self::with_random_source(registry, Arc::new(ThreadRandom))
    }

    pub fn with_random_source(registry: Arc<SecretRegistry>, rng: Arc<dyn RandomSource>) -> Self {
        Self { registry, rng }
    }

    pub fn registry(&self) -> &SecretRegistry {
        &self.registry
    }

    /// Encrypt `plaintext` for `identity` and the admin under the primary secret.
    pub fn encode(&self, identity: &str, plaintext: impl AsRef<[u8]>) -> SealResult<EncodedPayload> {
        if identity.is_empty() {
            return Err(SealError::invalid("identity", "must not be empty"));
        }
        let admin_identity = self.registry.admin_identity();
        if identity == admin_identity {
            tracing::warn!("encoding for the admin identity: user and admin envelopes share one wrap key");
        }

        let (fingerprint, secret) = self.registry.primary();
        let rng = self.rng.as_ref();

        let dek = generate_dek(rng);
        let iv = generate_iv(rng);
        let salt = generate_salt(rng);
        let user_iv = generate_iv(rng);
        let admin_iv = generate_iv(rng);

        let user_key = derive_wrap_key(secret, &salt, identity)?;
        let admin_key = derive_wrap_key(secret, &salt, admin_identity)?;

        let user = WrappedKeyEnvelope {
            iv: user_iv,
            wrapped_key: wrap_key(&user_key, &user_iv, &dek)?,
        };
        let admin = WrappedKeyEnvelope {
            iv: admin_iv,
            wrapped_key: wrap_key(&admin_key, &admin_iv, &dek)?,
        };

        let plaintext = plaintext.as_ref();
        let ciphertext = encrypt_payload(&dek, &iv, plaintext)?;

        tracing::debug!(
            fingerprint = %fingerprint,
            bytes = plaintext.len(),
            "payload sealed"
        );

        Ok(EncodedPayload {
            ciphertext: STANDARD.encode(&ciphertext),
            metadata: CryptoMetadata {
                key_version: KeyVersion::V1,
                algorithm: Algorithm::AesGcm,
                global_fingerprint: fingerprint.to_string(),
                salt,
                iv,
                user,
                admin,
            },
        })
    }

    /// Decrypt a UTF-8 payload.
    pub fn decode(&self, meta: &CryptoMetadata, principal: &Principal, ciphertext: &str) -> SealResult<String> {
        let plaintext = self.decode_bytes(meta, principal, ciphertext)?;
        String::from_utf8(plaintext).map_err(|e| {
            e.into_bytes().zeroize();
            SealError::invalid("plaintext", "decrypted payload is not valid UTF-8")
        })
    }

    /// Decrypt a payload as raw bytes.
    pub fn decode_bytes(
        &self,
        meta: &CryptoMetadata,
        principal: &Principal,
        ciphertext: &str,
    ) -> SealResult<Vec<u8>> {
        let identity = match principal {
            Principal::User(id) if id.is_empty() => {
                return Err(SealError::invalid("identity", "must not be empty"))
            }
            Principal::User(id) => id.as_str(),
            Principal::Admin => self.registry.admin_identity(),
        };
        let role = principal.role();
        let envelope = meta.envelope(role);

        let secret = self.registry.secret(&meta.global_fingerprint).ok_or_else(|| {
            tracing::warn!(
                fingerprint = %meta.global_fingerprint,
                "ciphertext references a secret this registry does not serve"
            );
            SealError::UnknownFingerprint(meta.global_fingerprint.clone())
        })?;

        let ciphertext = STANDARD
            .decode(ciphertext.trim())
            .map_err(|e| SealError::invalid("ciphertext", format!("invalid base64: {e}")))?;

        let wrap = derive_wrap_key(secret, &meta.salt, identity)?;
        let dek = unwrap_key(&wrap, &envelope.iv, &envelope.wrapped_key)
            .inspect_err(|_| {
                tracing::warn!(
                    fingerprint = %meta.global_fingerprint,
                    principal = role.as_str(),
                    "key unwrap failed"
                )
            })?;
        let plaintext = decrypt_payload(&dek, &meta.iv, &ciphertext).inspect_err(|_| {
            tracing::warn!(
                fingerprint = %meta.global_fingerprint,
                principal = role.as_str(),
                "payload authentication failed"
            )
        })?;

        tracing::debug!(
            fingerprint = %meta.global_fingerprint,
            principal = role.as_str(),
            bytes = plaintext.len(),
            "payload opened"
        );
        Ok(plaintext)
    }

    /// Flatten metadata into transport headers.
    pub fn to_headers(&self, meta: &CryptoMetadata) -> HeaderMap {
        to_headers(meta)
    }

    /// Parse transport headers, accepting only fingerprints this registry serves.
    pub fn parse_headers<I, K, V>(&self, headers: I) -> SealResult<CryptoMetadata>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let legal = self.registry.fingerprints();
        Ok(from_headers(headers, &legal)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{Iv, MasterSecret, Salt};
    use crate::rng::testing::SeededRandom;
    use crate::{IV_SIZE, WRAPPED_KEY_SIZE};

    fn registry() -> Arc<SecretRegistry> {
        let secret = MasterSecret::from_bytes(b"S-master-secret-for-tests-000001".to_vec()).unwrap();
        Arc::new(SecretRegistry::new("admin", "fp", secret).unwrap())
    }

    fn sealer() -> Sealer {
        Sealer::new(registry())
    }

    fn flip(b64: &str, index: usize) -> String {
        let mut bytes = STANDARD.decode(b64).unwrap();
        bytes[index] ^= 0x01;
        STANDARD.encode(bytes)
    }

    #[test]
    fn test_alice_scenario() {
        let sealer = sealer();
        let sealed = sealer.encode("alice", "hello").unwrap();

        let user = sealer
            .decode(&sealed.metadata, &Principal::user("alice"), &sealed.ciphertext)
            .unwrap();
        assert_eq!(user, "hello");

        let admin = sealer
            .decode(&sealed.metadata, &Principal::Admin, &sealed.ciphertext)
            .unwrap();
        assert_eq!(admin, "hello");

        let bob = sealer.decode(&sealed.metadata, &Principal::user("bob"), &sealed.ciphertext);
        assert!(matches!(bob, Err(SealError::AuthenticationFailure("key unwrap"))));
    }

    #[test]
    fn test_metadata_shape() {
        let sealed = sealer().encode("alice", "hello").unwrap();
        let meta = &sealed.metadata;

        assert_eq!(meta.key_version, KeyVersion::V1);
        assert_eq!(meta.algorithm, Algorithm::AesGcm);
        assert_eq!(meta.global_fingerprint, "fp");
        assert_eq!(meta.user.wrapped_key.len(), WRAPPED_KEY_SIZE);
        assert_eq!(meta.admin.wrapped_key.len(), WRAPPED_KEY_SIZE);
        assert_ne!(meta.user.wrapped_key, meta.admin.wrapped_key);
    }

    #[test]
    fn test_encode_is_not_deterministic() {
        let sealer = sealer();
        let a = sealer.encode("alice", "same input").unwrap();
        let b = sealer.encode("alice", "same input").unwrap();

        assert_ne!(a.ciphertext, b.ciphertext);
        assert_ne!(a.metadata.salt, b.metadata.salt);
        assert_ne!(a.metadata.iv, b.metadata.iv);
        assert_ne!(a.metadata.user.iv, b.metadata.user.iv);
        assert_ne!(a.metadata.admin.iv, b.metadata.admin.iv);
        assert_ne!(a.metadata.user.wrapped_key, b.metadata.user.wrapped_key);
    }

    #[test]
    fn test_randomness_is_independent_within_one_encode() {
        let sealed = sealer().encode("alice", "x").unwrap();
        let meta = &sealed.metadata;

        let ivs = [meta.iv, meta.user.iv, meta.admin.iv];
        assert_ne!(ivs[0], ivs[1]);
        assert_ne!(ivs[0], ivs[2]);
        assert_ne!(ivs[1], ivs[2]);
        for iv in ivs {
            assert_ne!(&meta.salt.as_bytes()[..IV_SIZE], iv.as_bytes().as_slice());
        }
    }

    #[test]
    fn test_random_source_is_pluggable() {
        let a = Sealer::with_random_source(registry(), Arc::new(SeededRandom::new(7)));
        let b = Sealer::with_random_source(registry(), Arc::new(SeededRandom::new(7)));

        let sealed_a = a.encode("alice", "pinned").unwrap();
        let sealed_b = b.encode("alice", "pinned").unwrap();
        assert_eq!(sealed_a, sealed_b);

        let opened = a
            .decode(&sealed_b.metadata, &Principal::user("alice"), &sealed_b.ciphertext)
            .unwrap();
        assert_eq!(opened, "pinned");
    }

    #[test]
    fn test_empty_plaintext() {
        let sealer = sealer();
        let sealed = sealer.encode("alice", "").unwrap();
        let opened = sealer
            .decode(&sealed.metadata, &Principal::Admin, &sealed.ciphertext)
            .unwrap();
        assert_eq!(opened, "");
    }

    #[test]
    fn test_binary_payload_roundtrip() {
        let sealer = sealer();
        let payload = [0xffu8, 0x00, 0xfe, 0x80];
        let sealed = sealer.encode("alice", payload).unwrap();

        let bytes = sealer
            .decode_bytes(&sealed.metadata, &Principal::user("alice"), &sealed.ciphertext)
            .unwrap();
        assert_eq!(bytes, payload);

        let text = sealer.decode(&sealed.metadata, &Principal::user("alice"), &sealed.ciphertext);
        match text {
            Err(SealError::Validation(errors)) => assert!(errors.mentions("plaintext")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_identity_rejected() {
        let sealer = sealer();
        assert!(matches!(sealer.encode("", "x"), Err(SealError::Validation(_))));

        let sealed = sealer.encode("alice", "x").unwrap();
        let result = sealer.decode(&sealed.metadata, &Principal::user(""), &sealed.ciphertext);
        assert!(matches!(result, Err(SealError::Validation(_))));
    }

    #[test]
    fn test_principal_isolation() {
        let sealer = sealer();
        let sealed = sealer.encode("alice", "secret").unwrap();

        // Admin identity against the user envelope
        let result = sealer.decode(&sealed.metadata, &Principal::user("admin"), &sealed.ciphertext);
        assert!(matches!(result, Err(SealError::AuthenticationFailure(_))));

        // User identity against the admin envelope
        let mut swapped = sealed.metadata.clone();
        swapped.admin = swapped.user.clone();
        let result = sealer.decode(&swapped, &Principal::Admin, &sealed.ciphertext);
        assert!(matches!(result, Err(SealError::AuthenticationFailure(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails_closed() {
        let sealer = sealer();
        let sealed = sealer.encode("alice", "hello world").unwrap();
        let len = STANDARD.decode(&sealed.ciphertext).unwrap().len();

        for i in 0..len {
            let tampered = flip(&sealed.ciphertext, i);
            let result = sealer.decode(&sealed.metadata, &Principal::user("alice"), &tampered);
            assert!(
                matches!(result, Err(SealError::AuthenticationFailure("payload decrypt"))),
                "byte {i}"
            );
        }
    }

    #[test]
    fn test_tampered_ivs_fail_closed() {
        let sealer = sealer();
        let sealed = sealer.encode("alice", "hello world").unwrap();
        let alice = Principal::user("alice");

        for i in 0..IV_SIZE {
            let mut meta = sealed.metadata.clone();
            let mut bytes = *meta.iv.as_bytes();
            bytes[i] ^= 0x01;
            meta.iv = Iv::from_bytes(bytes);
            let result = sealer.decode(&meta, &alice, &sealed.ciphertext);
            assert!(matches!(result, Err(SealError::AuthenticationFailure(_))));

            let mut meta = sealed.metadata.clone();
            let mut bytes = *meta.user.iv.as_bytes();
            bytes[i] ^= 0x01;
            meta.user.iv = Iv::from_bytes(bytes);
            let result = sealer.decode(&meta, &alice, &sealed.ciphertext);
            assert!(matches!(result, Err(SealError::AuthenticationFailure("key unwrap"))));

            let mut meta = sealed.metadata.clone();
            let mut bytes = *meta.admin.iv.as_bytes();
            bytes[i] ^= 0x01;
            meta.admin.iv = Iv::from_bytes(bytes);
            let result = sealer.decode(&meta, &Principal::Admin, &sealed.ciphertext);
            assert!(matches!(result, Err(SealError::AuthenticationFailure("key unwrap"))));
        }
    }

    #[test]
    fn test_tampered_wrapped_keys_and_salt_fail_closed() {
        let sealer = sealer();
        let sealed = sealer.encode("alice", "hello world").unwrap();

        for i in 0..WRAPPED_KEY_SIZE {
            let mut meta = sealed.metadata.clone();
            meta.user.wrapped_key[i] ^= 0x01;
            let result = sealer.decode(&meta, &Principal::user("alice"), &sealed.ciphertext);
            assert!(matches!(result, Err(SealError::AuthenticationFailure(_))));

            let mut meta = sealed.metadata.clone();
            meta.admin.wrapped_key[i] ^= 0x01;
            let result = sealer.decode(&meta, &Principal::Admin, &sealed.ciphertext);
            assert!(matches!(result, Err(SealError::AuthenticationFailure(_))));
        }

        let mut meta = sealed.metadata.clone();
        let mut salt = meta.salt.as_bytes().to_vec();
        salt[0] ^= 0x01;
        meta.salt = Salt::from_bytes(salt).unwrap();
        let result = sealer.decode(&meta, &Principal::Admin, &sealed.ciphertext);
        assert!(matches!(result, Err(SealError::AuthenticationFailure(_))));
    }

    #[test]
    fn test_invalid_ciphertext_encoding() {
        let sealer = sealer();
        let sealed = sealer.encode("alice", "x").unwrap();
        let result = sealer.decode(&sealed.metadata, &Principal::Admin, "***");
        match result {
            Err(SealError::Validation(errors)) => assert!(errors.mentions("ciphertext")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_rotation() {
        let old = MasterSecret::from_bytes(vec![1u8; 32]).unwrap();
        let old_registry = Arc::new(SecretRegistry::new("admin", "v1", old).unwrap());
        let sealed = Sealer::new(old_registry).encode("alice", "before rotation").unwrap();

        // New primary, old secret kept for decoding
        let rotated = Arc::new(
            SecretRegistry::new("admin", "v2", MasterSecret::from_bytes(vec![2u8; 32]).unwrap())
                .unwrap()
                .with_secret("v1", MasterSecret::from_bytes(vec![1u8; 32]).unwrap())
                .unwrap(),
        );
        let sealer = Sealer::new(rotated);
        let opened = sealer
            .decode(&sealed.metadata, &Principal::user("alice"), &sealed.ciphertext)
            .unwrap();
        assert_eq!(opened, "before rotation");
        assert_eq!(sealer.encode("alice", "after").unwrap().metadata.global_fingerprint, "v2");

        // Old secret retired
        let retired = Sealer::new(Arc::new(
            SecretRegistry::new("admin", "v2", MasterSecret::from_bytes(vec![2u8; 32]).unwrap())
                .unwrap(),
        ));
        let result = retired.decode(&sealed.metadata, &Principal::Admin, &sealed.ciphertext);
        match result {
            Err(SealError::UnknownFingerprint(fp)) => assert_eq!(fp, "v1"),
            other => panic!("expected unknown fingerprint, got {other:?}"),
        }
        let headers = retired.to_headers(&sealed.metadata);
        assert!(matches!(retired.parse_headers(&headers), Err(SealError::Validation(_))));
    }

    #[test]
    fn test_different_admin_identity_cannot_open() {
        let sealed = sealer().encode("alice", "x").unwrap();
        let other_admin = Sealer::new(Arc::new(
            SecretRegistry::new(
                "root",
                "fp",
                MasterSecret::from_bytes(b"S-master-secret-for-tests-000001".to_vec()).unwrap(),
            )
            .unwrap(),
        ));

        let result = other_admin.decode(&sealed.metadata, &Principal::Admin, &sealed.ciphertext);
        assert!(matches!(result, Err(SealError::AuthenticationFailure(_))));
    }

    #[test]
    fn test_headers_through_sealer() {
        let sealer = sealer();
        let sealed = sealer.encode("alice", "over the wire").unwrap();

        let headers = sealer.to_headers(&sealed.metadata);
        let parsed = sealer.parse_headers(&headers).unwrap();
        assert_eq!(parsed, sealed.metadata);

        let opened = sealer
            .decode(&parsed, &Principal::user("alice"), &sealed.ciphertext)
            .unwrap();
        assert_eq!(opened, "over the wire");
    }

    #[test]
    fn test_sealer_is_shareable_across_threads() {
        let sealer = sealer();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let sealer = sealer.clone();
                std::thread::spawn(move || {
                    let id = format!("user-{i}");
                    let sealed = sealer.encode(&id, format!("payload {i}")).unwrap();
                    sealer
                        .decode(&sealed.metadata, &Principal::User(id), &sealed.ciphertext)
                        .unwrap()
                })
            })
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap(), format!("payload {i}"));
        }
    }
}
