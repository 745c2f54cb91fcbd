//! Esplora REST response bodies and their mapping to core types.

use satchel_core::error::ProviderError;
use satchel_core::types::{AddressUtxo, FeeEstimates, HistoryEntry, HistoryTx, TxStatus, Txid};
use serde::Deserialize;

/// Confirmed transactions per page of `/address/:address/txs/chain`.
pub const CHAIN_PAGE_SIZE: usize = 25;

#[derive(Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct EsploraStatus {
    pub confirmed: bool,
    pub block_height: Option<u64>,
    pub block_time: Option<i64>,
}

impl From<EsploraStatus> for TxStatus {
    fn from(s: EsploraStatus) -> Self {
        TxStatus {
            confirmed: s.confirmed,
            block_height: s.block_height,
            block_time: s.block_time,
        }
    }
}

/// Entry of `GET /address/:address/utxo`.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EsploraUtxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    #[serde(default)]
    pub status: EsploraStatus,
}

impl EsploraUtxo {
    pub fn into_utxo(self) -> Result<AddressUtxo, ProviderError> {
        Ok(AddressUtxo {
            txid: parse_txid(&self.txid)?,
            vout: self.vout,
            value: self.value,
            status: self.status.into(),
        })
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EsploraTxOut {
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

impl From<EsploraTxOut> for HistoryEntry {
    fn from(out: EsploraTxOut) -> Self {
        HistoryEntry { address: out.scriptpubkey_address, value: out.value }
    }
}

#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EsploraTxIn {
    /// `None` for coinbase inputs.
    pub prevout: Option<EsploraTxOut>,
    #[serde(default)]
    pub is_coinbase: bool,
}

/// Entry of `GET /address/:address/txs`.
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EsploraTx {
    pub txid: String,
    pub vin: Vec<EsploraTxIn>,
    pub vout: Vec<EsploraTxOut>,
    #[serde(default)]
    pub fee: u64,
    #[serde(default)]
    pub status: EsploraStatus,
}

impl EsploraTx {
    pub fn into_history(self) -> Result<HistoryTx, ProviderError> {
        Ok(HistoryTx {
            txid: parse_txid(&self.txid)?,
            inputs: self
                .vin
                .into_iter()
                .filter_map(|input| input.prevout)
                .map(HistoryEntry::from)
                .collect(),
            outputs: self.vout.into_iter().map(HistoryEntry::from).collect(),
            fee: self.fee,
            status: self.status.into(),
        })
    }
}

/// Body of `GET /v1/fees/recommended`.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RecommendedFees {
    pub fastest_fee: u64,
    pub half_hour_fee: u64,
    pub hour_fee: u64,
    #[serde(default)]
    pub economy_fee: Option<u64>,
    #[serde(default)]
    pub minimum_fee: Option<u64>,
}

impl From<RecommendedFees> for FeeEstimates {
    /// Servers without economy/minimum tiers fall back to the hour rate.
    fn from(f: RecommendedFees) -> Self {
        let economy = f.economy_fee.unwrap_or(f.hour_fee);
        FeeEstimates {
            fastest_fee: f.fastest_fee,
            half_hour_fee: f.half_hour_fee,
            hour_fee: f.hour_fee,
            economy_fee: economy,
            minimum_fee: f.minimum_fee.unwrap_or(economy),
        }
    }
}

pub fn parse_txid(s: &str) -> Result<Txid, ProviderError> {
    s.trim()
        .parse()
        .map_err(|e| ProviderError::Decode(format!("txid {s:?}: {e}")))
}
