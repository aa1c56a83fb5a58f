//! Randomness sources and key/nonce generators
//!
//! The cipher never draws randomness on its own; every DEK, IV, and salt is
//! produced here from an injected [`RandomSource`].

use rand::RngCore;

use crate::keys::{DataKey, Iv, Salt};
use crate::{IV_SIZE, KEY_SIZE, SALT_SIZE};

/// A cryptographically secure random byte source, safe to share across threads.
pub trait RandomSource: Send + Sync {
    fn fill_bytes(&self, dest: &mut [u8]);
}

/// The calling thread's CSPRNG (`rand::thread_rng`, reseeded from the OS).
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        rand::thread_rng().fill_bytes(dest);
    }
}

/// The operating system's CSPRNG, read directly on every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsRandom;

impl RandomSource for OsRandom {
    fn fill_bytes(&self, dest: &mut [u8]) {
        rand::rngs::OsRng.fill_bytes(dest);
    }
}

/// Generate a random 256-bit data encryption key.
pub fn generate_dek<R: RandomSource + ?Sized>(rng: &R) -> DataKey {
    let mut bytes = [0u8; KEY_SIZE];
    rng.fill_bytes(&mut bytes);
    let key = DataKey::from_bytes(bytes);
    zeroize::Zeroize::zeroize(&mut bytes);
    key
}

/// Generate a random 96-bit IV.
pub fn generate_iv<R: RandomSource + ?Sized>(rng: &R) -> Iv {
    let mut bytes = [0u8; IV_SIZE];
    rng.fill_bytes(&mut bytes);
    Iv::from_bytes(bytes)
}

/// Generate a random KDF salt of [`SALT_SIZE`] bytes.
pub fn generate_salt<R: RandomSource + ?Sized>(rng: &R) -> Salt {
    let mut bytes = vec![0u8; SALT_SIZE];
    rng.fill_bytes(&mut bytes);
    Salt(bytes)
}
