//! BIP-39 mnemonic backup phrases.

use bip39::{Language, Mnemonic};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::WalletError;

/// Word counts BIP-39 defines, with their entropy sizes in bytes.
pub const WORD_COUNTS: [(usize, usize); 5] = [(12, 16), (15, 20), (18, 24), (21, 28), (24, 32)];

/// Entropy length in bytes for a mnemonic of `word_count` words.
pub fn entropy_len(word_count: usize) -> Result<usize, WalletError> {
    WORD_COUNTS
        .iter()
        .find(|(words, _)| *words == word_count)
        .map(|(_, bytes)| *bytes)
        .ok_or_else(|| {
            WalletError::InvalidMnemonic(format!(
                "word count must be 12, 15, 18, 21 or 24, got {word_count}"
            ))
        })
}

/// Fresh entropy from the OS RNG for a phrase of `word_count` words.
pub fn generate_entropy(word_count: usize) -> Result<Zeroizing<Vec<u8>>, WalletError> {
    let mut entropy = Zeroizing::new(vec![0u8; entropy_len(word_count)?]);
    rand::rngs::OsRng.fill_bytes(&mut entropy[..]);
    Ok(entropy)
}

/// Encode entropy as an English mnemonic phrase.
pub fn entropy_to_mnemonic(entropy: &[u8]) -> Result<Zeroizing<String>, WalletError> {
    let m = Mnemonic::from_entropy_in(Language::English, entropy)
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    Ok(Zeroizing::new(m.to_string()))
}

/// Parse an English mnemonic phrase back into its entropy.
///
/// Normalizes whitespace and case before parsing; the checksum word is
/// verified.
pub fn mnemonic_to_entropy(phrase: &str) -> Result<Zeroizing<Vec<u8>>, WalletError> {
    let m = parse(phrase)?;
    Ok(Zeroizing::new(m.to_entropy()))
}

/// The 64-byte BIP-32 seed for `entropy` and an optional passphrase.
///
/// PBKDF2-HMAC-SHA512 over the phrase with salt `"mnemonic" || passphrase`.
pub fn seed_from_entropy(entropy: &[u8], passphrase: &str) -> Result<Zeroizing<[u8; 64]>, WalletError> {
    let m = Mnemonic::from_entropy_in(Language::English, entropy)
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    Ok(Zeroizing::new(m.to_seed_normalized(passphrase)))
}

fn parse(phrase: &str) -> Result<Mnemonic, WalletError> {
    let normalized = phrase
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    Mnemonic::parse_in(Language::English, &normalized)
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))
}
