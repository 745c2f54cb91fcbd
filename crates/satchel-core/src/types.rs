//! Transaction identifiers and the records exchanged with chain data providers.
//!
//! All monetary values are in satoshis.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::TransactionError;

/// A transaction id in internal byte order.
///
/// Bitcoin displays txids byte-reversed relative to the double-SHA256
/// digest; [`Display`](fmt::Display) and [`FromStr`] use the reversed
/// (explorer) order while [`as_bytes`](Self::as_bytes) returns the order
/// used inside serialized transactions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Txid(pub [u8; 32]);

impl Txid {
    /// Wrap a digest in internal byte order.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Bytes in internal (serialization) order.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter().rev() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txid({self})")
    }
}

impl FromStr for Txid {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| TransactionError::InvalidTxid(e.to_string()))?;
        let mut arr: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| TransactionError::InvalidTxid(format!("{} bytes", v.len())))?;
        arr.reverse();
        Ok(Self(arr))
    }
}

impl Serialize for Txid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Txid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Reference to a specific output of a previous transaction.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    /// Transaction containing the referenced output.
    pub txid: Txid,
    /// Index of the output within the transaction.
    pub vout: u32,
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

/// Confirmation status reported by a provider.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TxStatus {
    pub confirmed: bool,
    pub block_height: Option<u64>,
    /// Unix timestamp of the confirming block.
    pub block_time: Option<i64>,
}

/// An unspent output paying a queried address.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AddressUtxo {
    pub txid: Txid,
    pub vout: u32,
    pub value: u64,
    pub status: TxStatus,
}

impl AddressUtxo {
    pub fn outpoint(&self) -> OutPoint {
        OutPoint { txid: self.txid, vout: self.vout }
    }
}

/// One side of a historical transaction: an input's spent output or an output.
///
/// `address` is `None` for scripts that have no address form (OP_RETURN,
/// bare multisig).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HistoryEntry {
    pub address: Option<String>,
    pub value: u64,
}

/// A transaction touching a queried address.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HistoryTx {
    pub txid: Txid,
    /// Spent outputs of each input.
    pub inputs: Vec<HistoryEntry>,
    pub outputs: Vec<HistoryEntry>,
    pub fee: u64,
    pub status: TxStatus,
}

/// Recommended fee rates in sat/vB for several confirmation targets.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FeeEstimates {
    pub fastest_fee: u64,
    pub half_hour_fee: u64,
    pub hour_fee: u64,
    pub economy_fee: u64,
    pub minimum_fee: u64,
}
