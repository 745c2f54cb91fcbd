//! Password-protected custody of the master seed.
//!
//! The seed is decrypted only for the duration of a [`Session`]. Dropping the
//! session zeroizes it.

use std::path::{Path, PathBuf};

use tracing::info;
use zeroize::Zeroizing;

use crate::encryption::KdfParams;
use crate::error::WalletError;
use crate::hierarchy::WalletTree;
use crate::keys::MasterSeed;
use crate::store;

/// Scoped access to the decrypted master seed.
#[derive(Debug)]
pub struct Session {
    seed: MasterSeed,
}

impl Session {
    pub fn seed(&self) -> &MasterSeed {
        &self.seed
    }
}

/// The encrypted wallet file and the Argon2id cost used when sealing it.
#[derive(Debug, Clone)]
pub struct Vault {
    path: PathBuf,
    kdf: KdfParams,
}

impl Vault {
    pub fn new(path: impl Into<PathBuf>, kdf: KdfParams) -> Self {
        Self { path: path.into(), kdf }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kdf(&self) -> &KdfParams {
        &self.kdf
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Generate a new seed and write it with `tree` under `password`.
    ///
    /// Returns the open session and the backup phrase. Never overwrites an
    /// existing wallet.
    pub fn create(
        &self,
        password: &[u8],
        word_count: usize,
        passphrase: &str,
        tree: &WalletTree,
    ) -> Result<(Session, Zeroizing<String>), WalletError> {
        self.ensure_absent()?;
        let seed = MasterSeed::generate(word_count, passphrase)?;
        let mnemonic = seed.mnemonic()?;
        store::save(&self.path, password, &self.kdf, &seed, tree)?;
        info!(path = %self.path.display(), word_count, "wallet created");
        Ok((Session { seed }, mnemonic))
    }

    /// Recreate a wallet from its backup phrase.
    pub fn restore(
        &self,
        mnemonic: &str,
        passphrase: &str,
        password: &[u8],
        tree: &WalletTree,
    ) -> Result<Session, WalletError> {
        self.ensure_absent()?;
        let seed = MasterSeed::from_mnemonic(mnemonic, passphrase)?;
        store::save(&self.path, password, &self.kdf, &seed, tree)?;
        info!(path = %self.path.display(), "wallet restored from mnemonic");
        Ok(Session { seed })
    }

    /// Decrypt the wallet file.
    pub fn unlock(&self, password: &[u8]) -> Result<(Session, WalletTree), WalletError> {
        let loaded = store::load(&self.path, password)?;
        Ok((Session { seed: loaded.seed }, loaded.tree))
    }

    /// Persist `tree` alongside the session's seed.
    pub fn save(&self, session: &Session, password: &[u8], tree: &WalletTree) -> Result<(), WalletError> {
        store::save(&self.path, password, &self.kdf, &session.seed, tree)
    }

    /// Re-encrypt the wallet under `new_password` with a fresh salt and nonce.
    pub fn change_password(&self, old_password: &[u8], new_password: &[u8]) -> Result<(), WalletError> {
        let (session, tree) = self.unlock(old_password)?;
        self.save(&session, new_password, &tree)?;
        info!(path = %self.path.display(), "wallet password changed");
        Ok(())
    }

    fn ensure_absent(&self) -> Result<(), WalletError> {
        if self.path.exists() {
            return Err(WalletError::AlreadyExists(self.path.display().to_string()));
        }
        Ok(())
    }
}
