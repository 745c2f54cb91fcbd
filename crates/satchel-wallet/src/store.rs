//! Encrypted wallet file.
//!
//! # File format
//! ```text
//! header_len (4 bytes LE) || header_json || encrypted_payload
//! ```
//! The header is plaintext JSON holding the magic, the format version and the
//! Argon2id parameters the payload was sealed with. The payload is the JSON
//! encoding of the seed record and the account tree, encrypted with
//! [`crate::encryption`].
//!
//! Writes go to a `.tmp` sibling which is synced and then renamed over the
//! target, so a crash never leaves a half-written wallet behind.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;
use zeroize::Zeroizing;

use crate::encryption::{self, KdfParams};
use crate::error::WalletError;
use crate::hierarchy::WalletTree;
use crate::keys::{MasterSeed, SeedRecord};

/// Magic identifying a wallet file.
pub const WALLET_MAGIC: &[u8; 4] = b"SATW";

/// Current file format version.
pub const WALLET_VERSION: u32 = 1;

/// Plaintext file header.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WalletFileHeader {
    pub magic: String,
    pub version: u32,
    pub kdf: KdfParams,
}

#[derive(Serialize)]
struct PayloadRef<'a> {
    seed: &'a SeedRecord,
    tree: &'a WalletTree,
}

#[derive(Deserialize)]
struct Payload {
    seed: SeedRecord,
    tree: WalletTree,
}

/// Decrypted wallet contents.
#[derive(Debug)]
pub struct LoadedWallet {
    pub seed: MasterSeed,
    pub tree: WalletTree,
    pub kdf: KdfParams,
}

/// Encrypt and atomically write the wallet to `path`, creating parent
/// directories as needed. The file is readable by the owner only.
pub fn save(
    path: &Path,
    password: &[u8],
    kdf: &KdfParams,
    seed: &MasterSeed,
    tree: &WalletTree,
) -> Result<(), WalletError> {
    let header = WalletFileHeader {
        magic: String::from_utf8_lossy(WALLET_MAGIC).to_string(),
        version: WALLET_VERSION,
        kdf: *kdf,
    };
    let header_json =
        serde_json::to_vec(&header).map_err(|e| WalletError::Serialization(e.to_string()))?;

    let record = SeedRecord::from_seed(seed);
    let payload_json = Zeroizing::new(
        serde_json::to_vec(&PayloadRef { seed: &record, tree })
            .map_err(|e| WalletError::Serialization(e.to_string()))?,
    );
    let encrypted = encryption::encrypt(&payload_json, password, kdf)?;

    let header_len = u32::try_from(header_json.len())
        .map_err(|_| WalletError::Serialization("header too large".into()))?;
    let mut file_data = Vec::with_capacity(4 + header_json.len() + encrypted.len());
    file_data.extend_from_slice(&header_len.to_le_bytes());
    file_data.extend_from_slice(&header_json);
    file_data.extend_from_slice(&encrypted);

    write_atomic(path, &file_data)?;
    debug!(path = %path.display(), bytes = file_data.len(), "wallet file written");
    Ok(())
}

/// Read the plaintext header without decrypting anything.
pub fn read_header(path: &Path) -> Result<WalletFileHeader, WalletError> {
    let file_data = std::fs::read(path)?;
    parse(&file_data).map(|(header, _)| header)
}

/// Read and decrypt the wallet at `path`.
pub fn load(path: &Path, password: &[u8]) -> Result<LoadedWallet, WalletError> {
    let file_data = std::fs::read(path)?;
    let (header, encrypted) = parse(&file_data)?;

    let payload_json = encryption::decrypt(encrypted, password, &header.kdf)?;
    let payload: Payload = serde_json::from_slice(&payload_json)
        .map_err(|e| WalletError::CorruptData(format!("invalid payload: {e}")))?;
    let Payload { seed, tree } = payload;

    Ok(LoadedWallet {
        seed: seed.to_seed()?,
        tree,
        kdf: header.kdf,
    })
}

fn parse(file_data: &[u8]) -> Result<(WalletFileHeader, &[u8]), WalletError> {
    let (len_bytes, rest) = file_data
        .split_first_chunk::<4>()
        .ok_or_else(|| WalletError::CorruptData("file too short".into()))?;
    let header_len = u32::from_le_bytes(*len_bytes) as usize;
    if rest.len() < header_len {
        return Err(WalletError::CorruptData("header truncated".into()));
    }
    let (header_json, encrypted) = rest.split_at(header_len);

    let header: WalletFileHeader = serde_json::from_slice(header_json)
        .map_err(|e| WalletError::CorruptData(format!("invalid header: {e}")))?;
    if header.magic.as_bytes() != WALLET_MAGIC {
        return Err(WalletError::CorruptData("invalid magic bytes".into()));
    }
    if header.version != WALLET_VERSION {
        return Err(WalletError::CorruptData(format!(
            "unsupported version: {}",
            header.version
        )));
    }
    header.kdf.validate()?;
    Ok((header, encrypted))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<(), WalletError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    {
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }
    Ok(())
}
