//! Pay-to-public-key-hash addresses.
//!
//! An address is a Base58Check string over `version || hash160(pubkey)`:
//! - Mainnet: version `0x00`, addresses start with `1`
//! - Testnet: version `0x6f`, addresses start with `m` or `n`
//!
//! The 4-byte double-SHA256 checksum catches any single-character error.

use secp256k1::PublicKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::constants::Network;
use crate::crypto::hash160;
use crate::error::AddressError;
use crate::script::Script;

/// Length of a decoded address payload: version byte + 20-byte hash.
const PAYLOAD_LEN: usize = 21;

/// A P2PKH address on a specific network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address {
    network: Network,
    pubkey_hash: [u8; 20],
}

impl Address {
    /// Create an address from a 20-byte pubkey hash.
    pub fn from_pubkey_hash(pubkey_hash: [u8; 20], network: Network) -> Self {
        Self { network, pubkey_hash }
    }

    /// Create an address paying to a compressed public key.
    pub fn from_public_key(public_key: &PublicKey, network: Network) -> Self {
        Self::from_pubkey_hash(hash160(&public_key.serialize()), network)
    }

    /// The HASH160 of the public key this address pays to.
    pub fn pubkey_hash(&self) -> &[u8; 20] {
        &self.pubkey_hash
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// The locking script for outputs paying this address.
    pub fn script_pubkey(&self) -> Script {
        Script::new_p2pkh(&self.pubkey_hash)
    }

    /// Encode as a Base58Check string.
    pub fn encode(&self) -> String {
        let mut payload = Vec::with_capacity(PAYLOAD_LEN);
        payload.push(self.network.p2pkh_version());
        payload.extend_from_slice(&self.pubkey_hash);
        bs58::encode(payload).with_check().into_string()
    }

    /// Decode a Base58Check string into an address on whichever network its
    /// version byte names.
    pub fn decode(s: &str) -> Result<Self, AddressError> {
        let payload = bs58::decode(s).with_check(None).into_vec().map_err(|e| match e {
            bs58::decode::Error::InvalidChecksum { .. } => AddressError::InvalidChecksum,
            bs58::decode::Error::InvalidCharacter { character, .. } => {
                AddressError::InvalidCharacter(character)
            }
            other => AddressError::InvalidEncoding(other.to_string()),
        })?;

        if payload.len() != PAYLOAD_LEN {
            return Err(AddressError::InvalidLength(payload.len()));
        }

        let network = Network::from_p2pkh_version(payload[0])
            .ok_or(AddressError::UnsupportedVersion(payload[0]))?;

        let mut pubkey_hash = [0u8; 20];
        pubkey_hash.copy_from_slice(&payload[1..]);
        Ok(Self { network, pubkey_hash })
    }

    /// Decode and require the address to belong to `network`.
    pub fn decode_for(s: &str, network: Network) -> Result<Self, AddressError> {
        let address = Self::decode(s)?;
        if address.network != network {
            return Err(AddressError::NetworkMismatch {
                expected: network.name().to_string(),
                found: address.network.name().to_string(),
            });
        }
        Ok(address)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}
