//! BIP-32 hierarchical deterministic key derivation over secp256k1.
//!
//! Master key: `I = HMAC-SHA512(key = "Bitcoin seed", data = seed)`, secret
//! key `IL`, chain code `IR`. Child `i` of a parent with chain code `c`:
//!
//! ```text
//! hardened (i >= 2^31):  I = HMAC-SHA512(c, 0x00 || k_par || ser32(i))
//! normal:                I = HMAC-SHA512(c, serP(K_par) || ser32(i))
//! k_i = IL + k_par (mod n)        K_i = IL*G + K_par
//! ```
//!
//! Extended keys serialize to 78 bytes and are Base58Check encoded with the
//! `xprv`/`xpub` (mainnet) or `tprv`/`tpub` (testnet) version prefixes.

use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, Scalar, SecretKey, SECP256K1};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::Sha512;
use std::fmt;
use std::str::FromStr;

use crate::address::Address;
use crate::constants::{HARDENED_OFFSET, Network};
use crate::crypto::hash160;
use crate::error::KeyError;

type HmacSha512 = Hmac<Sha512>;

/// HMAC key for master key generation.
const MASTER_HMAC_KEY: &[u8] = b"Bitcoin seed";

/// Serialized extended key length before Base58Check.
const EXTENDED_KEY_LEN: usize = 78;

/// A single step in a derivation path.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChildNumber {
    /// Non-hardened index in `0..2^31`.
    Normal(u32),
    /// Hardened index in `0..2^31`, stored without the offset.
    Hardened(u32),
}

impl ChildNumber {
    pub fn normal(index: u32) -> Result<Self, KeyError> {
        if index >= HARDENED_OFFSET {
            return Err(KeyError::IndexOutOfRange(index));
        }
        Ok(Self::Normal(index))
    }

    pub fn hardened(index: u32) -> Result<Self, KeyError> {
        if index >= HARDENED_OFFSET {
            return Err(KeyError::IndexOutOfRange(index));
        }
        Ok(Self::Hardened(index))
    }

    /// Decode the raw 32-bit form (hardened when the top bit is set).
    pub fn from_u32(raw: u32) -> Self {
        if raw >= HARDENED_OFFSET {
            Self::Hardened(raw - HARDENED_OFFSET)
        } else {
            Self::Normal(raw)
        }
    }

    /// The raw 32-bit form fed into the HMAC.
    pub fn to_u32(self) -> u32 {
        match self {
            Self::Normal(i) => i,
            Self::Hardened(i) => i | HARDENED_OFFSET,
        }
    }

    pub fn is_hardened(self) -> bool {
        matches!(self, Self::Hardened(_))
    }
}

impl fmt::Display for ChildNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal(i) => write!(f, "{i}"),
            Self::Hardened(i) => write!(f, "{i}'"),
        }
    }
}

/// A path such as `m/44'/0'/0'/0/5`. `'` or `h` marks a hardened step.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct DerivationPath(Vec<ChildNumber>);

impl DerivationPath {
    pub fn master() -> Self {
        Self(Vec::new())
    }

    /// `m/purpose'/coin_type'/account'`
    pub fn bip44_account(purpose: u32, coin_type: u32, account: u32) -> Result<Self, KeyError> {
        Ok(Self(vec![
            ChildNumber::hardened(purpose)?,
            ChildNumber::hardened(coin_type)?,
            ChildNumber::hardened(account)?,
        ]))
    }

    /// A new path with `child` appended.
    pub fn child(&self, child: ChildNumber) -> Self {
        let mut steps = self.0.clone();
        steps.push(child);
        Self(steps)
    }

    pub fn steps(&self) -> &[ChildNumber] {
        &self.0
    }
}

impl FromStr for DerivationPath {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        if parts.next() != Some("m") {
            return Err(KeyError::InvalidPath(s.to_string()));
        }
        let mut steps = Vec::new();
        for part in parts {
            let (digits, hardened) = match part.strip_suffix('\'').or_else(|| part.strip_suffix('h')) {
                Some(d) => (d, true),
                None => (part, false),
            };
            let index: u32 = digits
                .parse()
                .map_err(|_| KeyError::InvalidPath(s.to_string()))?;
            steps.push(if hardened {
                ChildNumber::hardened(index)?
            } else {
                ChildNumber::normal(index)?
            });
        }
        Ok(Self(steps))
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for step in &self.0 {
            write!(f, "/{step}")?;
        }
        Ok(())
    }
}

/// First four bytes of HASH160 of a compressed public key.
pub fn fingerprint(public_key: &PublicKey) -> [u8; 4] {
    let h = hash160(&public_key.serialize());
    [h[0], h[1], h[2], h[3]]
}

/// An extended private key: secret key plus chain code and position metadata.
#[derive(Clone, PartialEq, Eq)]
pub struct ExtendedPrivateKey {
    pub network: Network,
    pub depth: u8,
    pub parent_fingerprint: [u8; 4],
    pub child_number: ChildNumber,
    pub chain_code: [u8; 32],
    secret_key: SecretKey,
}

impl ExtendedPrivateKey {
    /// Derive the master key from a BIP-39 or raw seed (16 to 64 bytes).
    pub fn new_master(network: Network, seed: &[u8]) -> Result<Self, KeyError> {
        if !(16..=64).contains(&seed.len()) {
            return Err(KeyError::InvalidSeedLength(seed.len()));
        }
        let (il, ir) = hmac_sha512(MASTER_HMAC_KEY, seed)?;
        let secret_key = SecretKey::from_slice(&il).map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self {
            network,
            depth: 0,
            parent_fingerprint: [0; 4],
            child_number: ChildNumber::Normal(0),
            chain_code: ir,
            secret_key,
        })
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret_key
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_secret_key(SECP256K1, &self.secret_key)
    }

    pub fn fingerprint(&self) -> [u8; 4] {
        fingerprint(&self.public_key())
    }

    /// The P2PKH address of this key's public key.
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key(), self.network)
    }

    /// CKDpriv.
    pub fn derive_child(&self, child: ChildNumber) -> Result<Self, KeyError> {
        let depth = self.depth.checked_add(1).ok_or(KeyError::DepthExceeded)?;
        let mut data = Vec::with_capacity(37);
        if child.is_hardened() {
            data.push(0);
            data.extend_from_slice(&self.secret_key.secret_bytes());
        } else {
            data.extend_from_slice(&self.public_key().serialize());
        }
        data.extend_from_slice(&child.to_u32().to_be_bytes());
        let (il, ir) = hmac_sha512(&self.chain_code, &data)?;
        let tweak = Scalar::from_be_bytes(il).map_err(|_| KeyError::InvalidChild(child.to_u32()))?;
        let secret_key = self
            .secret_key
            .add_tweak(&tweak)
            .map_err(|_| KeyError::InvalidChild(child.to_u32()))?;
        Ok(Self {
            network: self.network,
            depth,
            parent_fingerprint: self.fingerprint(),
            child_number: child,
            chain_code: ir,
            secret_key,
        })
    }

    /// Walk every step of `path` from this key.
    pub fn derive_path(&self, path: &DerivationPath) -> Result<Self, KeyError> {
        let mut key = self.clone();
        for step in path.steps() {
            key = key.derive_child(*step)?;
        }
        Ok(key)
    }

    /// Neuter into the matching extended public key.
    pub fn to_extended_public(&self) -> ExtendedPublicKey {
        ExtendedPublicKey {
            network: self.network,
            depth: self.depth,
            parent_fingerprint: self.parent_fingerprint,
            child_number: self.child_number,
            chain_code: self.chain_code,
            public_key: self.public_key(),
        }
    }

    /// Base58Check `xprv`/`tprv` string.
    pub fn encode(&self) -> String {
        let mut key_data = [0u8; 33];
        key_data[1..].copy_from_slice(&self.secret_key.secret_bytes());
        encode_extended(
            self.network.xprv_version(),
            self.depth,
            self.parent_fingerprint,
            self.child_number,
            &self.chain_code,
            &key_data,
        )
    }

    pub fn decode(s: &str) -> Result<Self, KeyError> {
        let raw = decode_extended(s)?;
        let network = Network::ALL
            .into_iter()
            .find(|n| n.xprv_version() == raw.version)
            .ok_or_else(|| KeyError::UnknownVersion(hex::encode(raw.version)))?;
        if raw.key_data[0] != 0 {
            return Err(KeyError::InvalidEncoding("private key data must start with 0x00".into()));
        }
        let secret_key =
            SecretKey::from_slice(&raw.key_data[1..]).map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self {
            network,
            depth: raw.depth,
            parent_fingerprint: raw.parent_fingerprint,
            child_number: raw.child_number,
            chain_code: raw.chain_code,
            secret_key,
        })
    }
}

impl fmt::Debug for ExtendedPrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtendedPrivateKey")
            .field("network", &self.network)
            .field("depth", &self.depth)
            .field("child_number", &self.child_number)
            .field("secret_key", &"[REDACTED]")
            .finish()
    }
}

impl FromStr for ExtendedPrivateKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

/// An extended public key. Derives non-hardened children only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtendedPublicKey {
    pub network: Network,
    pub depth: u8,
    pub parent_fingerprint: [u8; 4],
    pub child_number: ChildNumber,
    pub chain_code: [u8; 32],
    pub public_key: PublicKey,
}

impl ExtendedPublicKey {
    pub fn fingerprint(&self) -> [u8; 4] {
        fingerprint(&self.public_key)
    }

    pub fn address(&self) -> Address {
        Address::from_public_key(&self.public_key, self.network)
    }

    /// CKDpub.
    pub fn derive_child(&self, child: ChildNumber) -> Result<Self, KeyError> {
        if child.is_hardened() {
            return Err(KeyError::HardenedFromPublic(child.to_u32()));
        }
        let depth = self.depth.checked_add(1).ok_or(KeyError::DepthExceeded)?;
        let mut data = Vec::with_capacity(37);
        data.extend_from_slice(&self.public_key.serialize());
        data.extend_from_slice(&child.to_u32().to_be_bytes());
        let (il, ir) = hmac_sha512(&self.chain_code, &data)?;
        let tweak = Scalar::from_be_bytes(il).map_err(|_| KeyError::InvalidChild(child.to_u32()))?;
        let public_key = self
            .public_key
            .add_exp_tweak(SECP256K1, &tweak)
            .map_err(|_| KeyError::InvalidChild(child.to_u32()))?;
        Ok(Self {
            network: self.network,
            depth,
            parent_fingerprint: self.fingerprint(),
            child_number: child,
            chain_code: ir,
            public_key,
        })
    }

    /// Derive `self / chain / index`, the usual address step below an account key.
    pub fn derive_address_key(&self, chain: u32, index: u32) -> Result<Self, KeyError> {
        self.derive_child(ChildNumber::normal(chain)?)?
            .derive_child(ChildNumber::normal(index)?)
    }

    /// Base58Check `xpub`/`tpub` string.
    pub fn encode(&self) -> String {
        encode_extended(
            self.network.xpub_version(),
            self.depth,
            self.parent_fingerprint,
            self.child_number,
            &self.chain_code,
            &self.public_key.serialize(),
        )
    }

    pub fn decode(s: &str) -> Result<Self, KeyError> {
        let raw = decode_extended(s)?;
        let network = Network::ALL
            .into_iter()
            .find(|n| n.xpub_version() == raw.version)
            .ok_or_else(|| KeyError::UnknownVersion(hex::encode(raw.version)))?;
        let public_key =
            PublicKey::from_slice(&raw.key_data).map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self {
            network,
            depth: raw.depth,
            parent_fingerprint: raw.parent_fingerprint,
            child_number: raw.child_number,
            chain_code: raw.chain_code,
            public_key,
        })
    }
}

impl fmt::Display for ExtendedPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for ExtendedPublicKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for ExtendedPublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for ExtendedPublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Derive the key at `path` below the master key of `seed`.
pub fn derive_path(
    network: Network,
    seed: &[u8],
    path: &DerivationPath,
) -> Result<ExtendedPrivateKey, KeyError> {
    ExtendedPrivateKey::new_master(network, seed)?.derive_path(path)
}

fn hmac_sha512(key: &[u8], data: &[u8]) -> Result<([u8; 32], [u8; 32]), KeyError> {
    let mut mac =
        HmacSha512::new_from_slice(key).map_err(|e| KeyError::InvalidEncoding(e.to_string()))?;
    mac.update(data);
    let out = mac.finalize().into_bytes();
    let mut il = [0u8; 32];
    let mut ir = [0u8; 32];
    il.copy_from_slice(&out[..32]);
    ir.copy_from_slice(&out[32..]);
    Ok((il, ir))
}

struct RawExtendedKey {
    version: [u8; 4],
    depth: u8,
    parent_fingerprint: [u8; 4],
    child_number: ChildNumber,
    chain_code: [u8; 32],
    key_data: [u8; 33],
}

fn encode_extended(
    version: [u8; 4],
    depth: u8,
    parent_fingerprint: [u8; 4],
    child_number: ChildNumber,
    chain_code: &[u8; 32],
    key_data: &[u8; 33],
) -> String {
    let mut buf = Vec::with_capacity(EXTENDED_KEY_LEN);
    buf.extend_from_slice(&version);
    buf.push(depth);
    buf.extend_from_slice(&parent_fingerprint);
    buf.extend_from_slice(&child_number.to_u32().to_be_bytes());
    buf.extend_from_slice(chain_code);
    buf.extend_from_slice(key_data);
    bs58::encode(buf).with_check().into_string()
}

fn decode_extended(s: &str) -> Result<RawExtendedKey, KeyError> {
    let data = bs58::decode(s)
        .with_check(None)
        .into_vec()
        .map_err(|e| KeyError::InvalidEncoding(e.to_string()))?;
    if data.len() != EXTENDED_KEY_LEN {
        return Err(KeyError::InvalidEncoding(format!(
            "expected {EXTENDED_KEY_LEN} bytes, got {}",
            data.len()
        )));
    }
    let mut raw = RawExtendedKey {
        version: [0; 4],
        depth: data[4],
        parent_fingerprint: [0; 4],
        child_number: ChildNumber::Normal(0),
        chain_code: [0; 32],
        key_data: [0; 33],
    };
    raw.version.copy_from_slice(&data[0..4]);
    raw.parent_fingerprint.copy_from_slice(&data[5..9]);
    let mut child = [0u8; 4];
    child.copy_from_slice(&data[9..13]);
    raw.child_number = ChildNumber::from_u32(u32::from_be_bytes(child));
    raw.chain_code.copy_from_slice(&data[13..45]);
    raw.key_data.copy_from_slice(&data[45..78]);
    Ok(raw)
}
