//! Wallet constants. All monetary values in satoshis (1 BTC = 10^8 satoshis).

use serde::{Deserialize, Serialize};

pub const COIN: u64 = 100_000_000;

/// BIP-44 purpose field, always derived hardened.
pub const PURPOSE: u32 = 44;

/// Offset applied to a child index to mark hardened derivation.
pub const HARDENED_OFFSET: u32 = 0x8000_0000;

/// Maximum run of unused addresses kept derived past the highest used index.
pub const GAP_LIMIT: u32 = 20;

/// Upper bound on inputs in one transaction.
///
/// 500 P2PKH inputs serialize to roughly 74 kB, comfortably under the
/// 100 kvB standardness limit enforced by relaying nodes.
pub const MAX_INPUTS: usize = 500;

/// Change below this value is not worth an output and is added to the fee.
///
/// Matches the dust limit of a P2PKH output at the default 3 sat/vB relay fee.
pub const DUST_THRESHOLD: u64 = 546;

/// Receive chain index within an account.
pub const RECEIVE_CHAIN: u32 = 0;

/// Change chain index within an account.
pub const CHANGE_CHAIN: u32 = 1;

/// Fixed per-transaction bytes: version (4) + lock time (4).
pub const TX_OVERHEAD_SIZE: u64 = 8;

/// Upper estimate of a signed P2PKH input.
///
/// outpoint (36) + script length (1) + scriptSig with a 72-byte DER
/// signature and 33-byte compressed key (107) + sequence (4).
pub const P2PKH_INPUT_SIZE: u64 = 148;

/// Serialized P2PKH output: value (8) + script length (1) + script (25).
pub const P2PKH_OUTPUT_SIZE: u64 = 34;

/// Input sequence number that disables lock time and replace-by-fee.
pub const SEQUENCE_FINAL: u32 = 0xffff_ffff;

/// Legacy signature hash type committing to all inputs and outputs.
pub const SIGHASH_ALL: u32 = 1;

/// Bitcoin network a key or address belongs to.
///
/// Each network maps one-to-one onto a BIP-44 coin type, so the coin type
/// index doubles as the network selector at the command surface.
///
/// # Examples
///
/// ```
/// use satchel_core::constants::Network;
/// assert_eq!(Network::from_coin_type(1), Some(Network::Testnet));
/// assert_eq!(Network::Bitcoin.p2pkh_version(), 0x00);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Network {
    /// Bitcoin mainnet (coin type 0).
    Bitcoin,
    /// Bitcoin testnet (coin type 1).
    Testnet,
}

impl Network {
    /// All supported networks in coin type order.
    pub const ALL: [Network; 2] = [Network::Bitcoin, Network::Testnet];

    /// BIP-44 coin type registered for this network.
    pub fn coin_type(&self) -> u32 {
        match self {
            Self::Bitcoin => 0,
            Self::Testnet => 1,
        }
    }

    /// Look up the network for a BIP-44 coin type.
    pub fn from_coin_type(coin_type: u32) -> Option<Self> {
        match coin_type {
            0 => Some(Self::Bitcoin),
            1 => Some(Self::Testnet),
            _ => None,
        }
    }

    /// Display name shown in the wallet overview.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bitcoin => "Bitcoin",
            Self::Testnet => "Bitcoin Testnet",
        }
    }

    /// Version byte prefixed to a P2PKH address payload.
    pub fn p2pkh_version(&self) -> u8 {
        match self {
            Self::Bitcoin => 0x00,
            Self::Testnet => 0x6f,
        }
    }

    /// Look up the network from a P2PKH version byte.
    pub fn from_p2pkh_version(version: u8) -> Option<Self> {
        match version {
            0x00 => Some(Self::Bitcoin),
            0x6f => Some(Self::Testnet),
            _ => None,
        }
    }

    /// Version bytes of a serialized extended private key (`xprv` / `tprv`).
    pub fn xprv_version(&self) -> [u8; 4] {
        match self {
            Self::Bitcoin => [0x04, 0x88, 0xAD, 0xE4],
            Self::Testnet => [0x04, 0x35, 0x83, 0x94],
        }
    }

    /// Version bytes of a serialized extended public key (`xpub` / `tpub`).
    pub fn xpub_version(&self) -> [u8; 4] {
        match self {
            Self::Bitcoin => [0x04, 0x88, 0xB2, 0x1E],
            Self::Testnet => [0x04, 0x35, 0x87, 0xCF],
        }
    }
}

impl std::fmt::Display for Network {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coin_type_roundtrip() {
        for network in Network::ALL {
            assert_eq!(Network::from_coin_type(network.coin_type()), Some(network));
        }
        assert_eq!(Network::from_coin_type(2), None);
    }

    #[test]
    fn p2pkh_version_roundtrip() {
        for network in Network::ALL {
            assert_eq!(Network::from_p2pkh_version(network.p2pkh_version()), Some(network));
        }
        assert_eq!(Network::from_p2pkh_version(0x05), None);
    }

    #[test]
    fn display_names() {
        assert_eq!(Network::Bitcoin.to_string(), "Bitcoin");
        assert_eq!(Network::Testnet.to_string(), "Bitcoin Testnet");
    }

    #[test]
    fn size_constants_consistent() {
        // Two-output single-input transaction: 8 + 1 + 148 + 1 + 68 = 226.
        let size = TX_OVERHEAD_SIZE + 1 + P2PKH_INPUT_SIZE + 1 + 2 * P2PKH_OUTPUT_SIZE;
        assert_eq!(size, 226);
    }

    #[test]
    fn hardened_offset_is_two_pow_31() {
        assert_eq!(HARDENED_OFFSET, 1 << 31);
    }
}
