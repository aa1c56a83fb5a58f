//! Wrap key derivation: HKDF-SHA256(master secret, salt, info = identity)

use hkdf::Hkdf;
use sha2::Sha256;

use crate::error::{SealError, SealResult};
use crate::keys::{MasterSecret, Salt, WrapKey};

/// Derive the 256-bit wrap key for one principal.
///
/// Deterministic in `(secret, salt, identity)`, so decode can re-derive the
/// key instead of storing it. Different identities under the same salt give
/// unrelated keys.
pub fn derive_wrap_key(master: &MasterSecret, salt: &Salt, identity: &str) -> SealResult<WrapKey> {
    hkdf_sha256(master.expose(), salt.as_bytes(), identity.as_bytes())
}

fn hkdf_sha256(ikm: &[u8], salt: &[u8], info: &[u8]) -> SealResult<WrapKey> {
    let hkdf = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut key = WrapKey::zeroed();
    hkdf.expand(info, key.as_mut_bytes())
        .map_err(|e| SealError::Configuration(format!("HKDF expand failed: {e}")))?;
    Ok(key)
}
