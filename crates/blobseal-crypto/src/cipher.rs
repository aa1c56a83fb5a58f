//! AES-256-GCM payload encryption and DEK wrapping
//!
//! Output format for both operations: `[ciphertext][16-byte GCM tag]`.
//! The IV is always supplied by the caller and stored separately.
//!
//! Decryption fails closed: any change to the ciphertext, the tag, the IV, or
//! the key yields an authentication error and no plaintext.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroize;

use crate::error::{SealError, SealResult};
use crate::keys::{DataKey, Iv, WrapKey};
use crate::{KEY_SIZE, TAG_SIZE};

/// Encrypt a payload under the DEK.
pub fn encrypt_payload(dek: &DataKey, iv: &Iv, plaintext: &[u8]) -> SealResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(dek.as_bytes().into());
    cipher
        .encrypt(Nonce::from_slice(iv.as_bytes()), plaintext)
        .map_err(|_| SealError::invalid("plaintext", "payload exceeds the AES-GCM message limit"))
}

/// Decrypt a payload under the DEK, verifying the GCM tag.
pub fn decrypt_payload(dek: &DataKey, iv: &Iv, ciphertext: &[u8]) -> SealResult<Vec<u8>> {
    if ciphertext.len() < TAG_SIZE {
        return Err(SealError::AuthenticationFailure("payload decrypt"));
    }

    let cipher = Aes256Gcm::new(dek.as_bytes().into());
    cipher
        .decrypt(Nonce::from_slice(iv.as_bytes()), ciphertext)
        .map_err(|_| SealError::AuthenticationFailure("payload decrypt"))
}

/// Wrap (encrypt) a DEK under a principal's wrap key.
///
/// Output: `[32-byte encrypted key][16-byte tag]`
pub fn wrap_key(kek: &WrapKey, iv: &Iv, dek: &DataKey) -> SealResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(kek.as_bytes().into());
    cipher
        .encrypt(Nonce::from_slice(iv.as_bytes()), dek.as_bytes().as_ref())
        .map_err(|_| SealError::Configuration("key wrapping failed".into()))
}

/// Unwrap (decrypt) a DEK using a principal's wrap key.
///
/// Input: the output of [`wrap_key`].
pub fn unwrap_key(kek: &WrapKey, iv: &Iv, wrapped: &[u8]) -> SealResult<DataKey> {
    let cipher = Aes256Gcm::new(kek.as_bytes().into());

    let mut plaintext = cipher
        .decrypt(Nonce::from_slice(iv.as_bytes()), wrapped)
        .map_err(|_| SealError::AuthenticationFailure("key unwrap"))?;

    if plaintext.len() != KEY_SIZE {
        plaintext.zeroize();
        return Err(SealError::AuthenticationFailure("key unwrap"));
    }

    let mut key_bytes = [0u8; KEY_SIZE];
    key_bytes.copy_from_slice(&plaintext);
    plaintext.zeroize();

    let key = DataKey::from_bytes(key_bytes);
    key_bytes.zeroize();
    Ok(key)
}
