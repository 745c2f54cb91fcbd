//! Master seed custody and BIP-44 key derivation.
//!
//! The master seed is kept as its BIP-39 entropy plus the optional
//! passphrase, which is exactly what a user needs to restore the wallet.
//! The 64-byte BIP-32 seed is recomputed on demand and never stored.

use std::fmt;

use satchel_core::bip32::{ChildNumber, DerivationPath, ExtendedPrivateKey, ExtendedPublicKey};
use satchel_core::constants::{Network, PURPOSE};
use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::WalletError;
use crate::mnemonic;

/// BIP-39 entropy and passphrase from which every wallet key derives.
///
/// Secret material is zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterSeed {
    entropy: Vec<u8>,
    passphrase: String,
}

impl MasterSeed {
    /// Fresh entropy from the OS RNG for a phrase of `word_count` words.
    pub fn generate(word_count: usize, passphrase: &str) -> Result<Self, WalletError> {
        let entropy = mnemonic::generate_entropy(word_count)?;
        Self::from_entropy(&entropy, passphrase)
    }

    /// Wrap raw entropy. Must be 16 to 32 bytes in steps of 4.
    pub fn from_entropy(entropy: &[u8], passphrase: &str) -> Result<Self, WalletError> {
        if !(16..=32).contains(&entropy.len()) || entropy.len() % 4 != 0 {
            return Err(WalletError::InvalidMnemonic(format!(
                "entropy must be 16 to 32 bytes in steps of 4, got {}",
                entropy.len()
            )));
        }
        Ok(Self {
            entropy: entropy.to_vec(),
            passphrase: passphrase.to_string(),
        })
    }

    /// Restore from a backup phrase.
    pub fn from_mnemonic(phrase: &str, passphrase: &str) -> Result<Self, WalletError> {
        let entropy = mnemonic::mnemonic_to_entropy(phrase)?;
        Self::from_entropy(&entropy, passphrase)
    }

    /// The English backup phrase. Handle with care.
    pub fn mnemonic(&self) -> Result<Zeroizing<String>, WalletError> {
        mnemonic::entropy_to_mnemonic(&self.entropy)
    }

    /// Raw entropy bytes. Handle with care.
    pub fn entropy(&self) -> &[u8] {
        &self.entropy
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }

    /// BIP-32 master key for `network`.
    pub fn master_key(&self, network: Network) -> Result<ExtendedPrivateKey, WalletError> {
        let seed = mnemonic::seed_from_entropy(&self.entropy, &self.passphrase)?;
        Ok(ExtendedPrivateKey::new_master(network, &seed[..])?)
    }

    /// Account key at `m/44'/coin'/account'`.
    pub fn account_key(&self, network: Network, account: u32) -> Result<ExtendedPrivateKey, WalletError> {
        let path = DerivationPath::bip44_account(PURPOSE, network.coin_type(), account)?;
        Ok(self.master_key(network)?.derive_path(&path)?)
    }

    /// Account-level extended public key, the root of address derivation.
    pub fn account_xpub(&self, network: Network, account: u32) -> Result<ExtendedPublicKey, WalletError> {
        Ok(self.account_key(network, account)?.to_extended_public())
    }

    /// Signing key for `m/44'/coin'/account'/chain/index`.
    pub fn signing_key(
        &self,
        network: Network,
        account: u32,
        chain: u32,
        index: u32,
    ) -> Result<SecretKey, WalletError> {
        let key = self
            .account_key(network, account)?
            .derive_child(ChildNumber::normal(chain)?)?
            .derive_child(ChildNumber::normal(index)?)?;
        Ok(*key.secret_key())
    }
}

impl Clone for MasterSeed {
    fn clone(&self) -> Self {
        Self {
            entropy: self.entropy.clone(),
            passphrase: self.passphrase.clone(),
        }
    }
}

impl fmt::Debug for MasterSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterSeed")
            .field("entropy", &"[REDACTED]")
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}

/// Serialized form of the seed inside the encrypted wallet payload.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SeedRecord {
    /// Hex-encoded BIP-39 entropy.
    pub entropy: String,
    pub passphrase: String,
}

impl SeedRecord {
    pub fn from_seed(seed: &MasterSeed) -> Self {
        Self {
            entropy: hex::encode(&seed.entropy),
            passphrase: seed.passphrase.clone(),
        }
    }

    pub fn to_seed(&self) -> Result<MasterSeed, WalletError> {
        let entropy = Zeroizing::new(
            hex::decode(&self.entropy)
                .map_err(|e| WalletError::CorruptData(format!("seed entropy: {e}")))?,
        );
        MasterSeed::from_entropy(&entropy, &self.passphrase)
            .map_err(|e| WalletError::CorruptData(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_core::constants::{CHANGE_CHAIN, RECEIVE_CHAIN};

    const ABANDON_12: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn abandon_seed() -> MasterSeed {
        MasterSeed::from_mnemonic(ABANDON_12, "").unwrap()
    }

    #[test]
    fn bip44_first_receive_address() {
        // Well-known first address of the all-"abandon" phrase, m/44'/0'/0'/0/0.
        let xpub = abandon_seed().account_xpub(Network::Bitcoin, 0).unwrap();
        let address = xpub.derive_address_key(RECEIVE_CHAIN, 0).unwrap().address();
        assert_eq!(address.to_string(), "1LqBGSKuX5yYUonjxT5qGfpUsXKYYWeabA");
    }

    #[test]
    fn bip44_account_xpub() {
        let xpub = abandon_seed().account_xpub(Network::Bitcoin, 0).unwrap();
        assert_eq!(
            xpub.encode(),
            "xpub6BosfCnifzxcFwrSzQiqu2DBVTshkCXacvNsWGYJVVhhawA7d4R5WSWGFNbi8Aw6ZRc1brxMyWMzG3DSSSSoekkudhUd9yLb6qx39T9nMdj"
        );
    }

    #[test]
    fn signing_key_matches_public_derivation() {
        let seed = abandon_seed();
        let xpub = seed.account_xpub(Network::Testnet, 2).unwrap();
        for (chain, index) in [(RECEIVE_CHAIN, 0), (CHANGE_CHAIN, 5)] {
            let sk = seed.signing_key(Network::Testnet, 2, chain, index).unwrap();
            let pk = secp256k1::PublicKey::from_secret_key(secp256k1::SECP256K1, &sk);
            assert_eq!(pk, xpub.derive_address_key(chain, index).unwrap().public_key);
        }
    }

    #[test]
    fn passphrase_changes_keys() {
        let plain = abandon_seed().account_xpub(Network::Bitcoin, 0).unwrap();
        let salted = MasterSeed::from_mnemonic(ABANDON_12, "TREZOR")
            .unwrap()
            .account_xpub(Network::Bitcoin, 0)
            .unwrap();
        assert_ne!(plain, salted);
    }

    #[test]
    fn entropy_length_validated() {
        assert!(MasterSeed::from_entropy(&[0u8; 15], "").is_err());
        assert!(MasterSeed::from_entropy(&[0u8; 18], "").is_err());
        assert!(MasterSeed::from_entropy(&[0u8; 36], "").is_err());
        assert!(MasterSeed::from_entropy(&[0u8; 20], "").is_ok());
    }

    #[test]
    fn mnemonic_roundtrip() {
        let seed = MasterSeed::generate(24, "pp").unwrap();
        let phrase = seed.mnemonic().unwrap();
        let back = MasterSeed::from_mnemonic(&phrase, "pp").unwrap();
        assert_eq!(back.entropy(), seed.entropy());
        assert_eq!(back.passphrase(), "pp");
    }

    #[test]
    fn seed_record_roundtrip() {
        let seed = MasterSeed::from_entropy(&[9u8; 16], "x").unwrap();
        let record = SeedRecord::from_seed(&seed);
        assert_eq!(record.entropy, "09".repeat(16));
        let back = record.to_seed().unwrap();
        assert_eq!(back.entropy(), seed.entropy());
    }

    #[test]
    fn seed_record_bad_hex_is_corrupt() {
        let record = SeedRecord { entropy: "zz".into(), passphrase: String::new() };
        assert!(matches!(record.to_seed(), Err(WalletError::CorruptData(_))));
    }

    #[test]
    fn debug_redacts() {
        let seed = MasterSeed::from_entropy(&[0xAB; 16], "hunter2").unwrap();
        let debug = format!("{seed:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("ab"));
    }
}
