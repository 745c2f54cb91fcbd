//! AES-256-GCM encryption under an Argon2id password-derived key.
//!
//! # Wire format
//! ```text
//! salt (16 bytes) || nonce (12 bytes) || ciphertext || auth_tag (16 bytes)
//! ```
//!
//! The Argon2id cost parameters are not part of the blob; the wallet file
//! header carries them (see [`crate::store`]).

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::WalletError;

/// Salt length in bytes.
pub const SALT_LEN: usize = 16;

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Minimum encrypted payload size (salt + nonce + auth tag).
const MIN_ENCRYPTED_LEN: usize = SALT_LEN + NONCE_LEN + TAG_LEN;

/// Argon2id cost parameters.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB.
    #[serde(rename = "m")]
    pub memory_kib: u32,
    /// Number of passes.
    #[serde(rename = "t")]
    pub iterations: u32,
    /// Degree of parallelism.
    #[serde(rename = "p")]
    pub parallelism: u32,
}

impl KdfParams {
    pub const fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        Self { memory_kib, iterations, parallelism }
    }

    fn argon2(&self) -> Result<Argon2<'static>, argon2::Error> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, Some(32))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Reject parameters Argon2 cannot run with.
    pub fn validate(&self) -> Result<(), WalletError> {
        self.argon2()
            .map(|_| ())
            .map_err(|e| WalletError::CorruptData(format!("invalid kdf parameters: {e}")))
    }
}

impl Default for KdfParams {
    /// 19 MiB, 2 passes, 1 lane.
    fn default() -> Self {
        Self::new(19 * 1024, 2, 1)
    }
}

/// Derive a 256-bit encryption key from a password and salt with Argon2id.
pub fn derive_key(
    password: &[u8],
    salt: &[u8],
    kdf: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, argon2::Error> {
    let mut key = Zeroizing::new([0u8; 32]);
    kdf.argon2()?.hash_password_into(password, salt, &mut key[..])?;
    Ok(key)
}

/// Encrypt plaintext with a password.
///
/// Generates a random salt and nonce from the OS RNG. Returns
/// `salt || nonce || ciphertext+tag`.
pub fn encrypt(plaintext: &[u8], password: &[u8], kdf: &KdfParams) -> Result<Vec<u8>, WalletError> {
    let mut salt = [0u8; SALT_LEN];
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);

    let key = derive_key(password, &salt, kdf)
        .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| WalletError::Serialization(format!("encryption failed: {e}")))?;

    let mut result = Vec::with_capacity(SALT_LEN + NONCE_LEN + ciphertext.len());
    result.extend_from_slice(&salt);
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt data produced by [`encrypt`] with the same password and parameters.
///
/// A failed authentication tag means the password is wrong (or the blob was
/// tampered with, which is indistinguishable) and yields
/// [`WalletError::WrongPassword`]. Blobs too short to hold the framing yield
/// [`WalletError::CorruptData`].
pub fn decrypt(
    encrypted: &[u8],
    password: &[u8],
    kdf: &KdfParams,
) -> Result<Zeroizing<Vec<u8>>, WalletError> {
    if encrypted.len() < MIN_ENCRYPTED_LEN {
        return Err(WalletError::CorruptData(format!(
            "encrypted data too short: {} < {MIN_ENCRYPTED_LEN}",
            encrypted.len()
        )));
    }

    let salt = &encrypted[..SALT_LEN];
    let nonce_bytes = &encrypted[SALT_LEN..SALT_LEN + NONCE_LEN];
    let ciphertext = &encrypted[SALT_LEN + NONCE_LEN..];

    let key = derive_key(password, salt, kdf)
        .map_err(|e| WalletError::CorruptData(format!("invalid kdf parameters: {e}")))?;
    let cipher = Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| WalletError::KeyDerivation(e.to_string()))?;
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| WalletError::WrongPassword)
}

#[cfg(test)]
pub(crate) const TEST_KDF: KdfParams = KdfParams::new(64, 1, 1);
