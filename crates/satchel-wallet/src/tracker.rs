//! Per-account UTXO sets, balances and the simplified transaction history.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use satchel_core::address::Address;
use satchel_core::traits::ChainProvider;
use satchel_core::types::{HistoryTx, OutPoint, Txid};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::WalletError;
use crate::hierarchy::AddressEntry;

/// An unspent output paying one of the wallet's addresses.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct OwnedUtxo {
    pub outpoint: OutPoint,
    pub value: u64,
    pub address: Address,
    pub chain: u32,
    pub index: u32,
    pub confirmed: bool,
    pub block_height: Option<u64>,
}

/// Account balance in satoshis.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Balance {
    pub confirmed: u64,
    pub unconfirmed: u64,
    pub utxo_count: usize,
}

impl Balance {
    pub fn total(&self) -> u64 {
        self.confirmed.saturating_add(self.unconfirmed)
    }
}

/// The unspent outputs of one account.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AccountUtxos {
    utxos: BTreeMap<OutPoint, OwnedUtxo>,
    synced_at: Option<DateTime<Utc>>,
}

impl AccountUtxos {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, utxo: OwnedUtxo) {
        self.utxos.insert(utxo.outpoint, utxo);
    }

    /// Drop outputs consumed by a broadcast transaction.
    pub fn remove_spent(&mut self, spent: &[OutPoint]) -> usize {
        spent.iter().filter(|op| self.utxos.remove(op).is_some()).count()
    }

    pub fn get(&self, outpoint: &OutPoint) -> Option<&OwnedUtxo> {
        self.utxos.get(outpoint)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OwnedUtxo> {
        self.utxos.values()
    }

    /// Snapshot for coin selection.
    pub fn to_vec(&self) -> Vec<OwnedUtxo> {
        self.utxos.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.utxos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utxos.is_empty()
    }

    /// When the set was last refreshed from the provider.
    pub fn synced_at(&self) -> Option<DateTime<Utc>> {
        self.synced_at
    }

    pub fn balance(&self) -> Balance {
        self.utxos.values().fold(Balance::default(), |mut b, utxo| {
            if utxo.confirmed {
                b.confirmed = b.confirmed.saturating_add(utxo.value);
            } else {
                b.unconfirmed = b.unconfirmed.saturating_add(utxo.value);
            }
            b.utxo_count += 1;
            b
        })
    }
}

/// Query every address for unspent outputs and build the account set.
pub fn sync(addresses: &[AddressEntry], provider: &dyn ChainProvider) -> Result<AccountUtxos, WalletError> {
    let mut set = AccountUtxos::new();
    for entry in addresses {
        for utxo in provider.get_utxos(&entry.address)? {
            set.insert(OwnedUtxo {
                outpoint: utxo.outpoint(),
                value: utxo.value,
                address: entry.address,
                chain: entry.chain,
                index: entry.index,
                confirmed: utxo.status.confirmed,
                block_height: utxo.status.block_height,
            });
        }
    }
    set.synced_at = Some(Utc::now());
    debug!(addresses = addresses.len(), utxos = set.len(), "utxo sync complete");
    Ok(set)
}

/// Which addresses have any on-chain history. Returns `(chain, index)` pairs.
pub fn scan_usage(addresses: &[AddressEntry], provider: &dyn ChainProvider) -> Result<Vec<(u32, u32)>, WalletError> {
    let mut used = Vec::new();
    for entry in addresses {
        if provider.is_used(&entry.address)? {
            used.push((entry.chain, entry.index));
        }
    }
    Ok(used)
}

/// Fetch the history of every address, deduplicated by txid.
pub fn fetch_history(addresses: &[AddressEntry], provider: &dyn ChainProvider) -> Result<Vec<HistoryTx>, WalletError> {
    let mut seen = HashSet::new();
    let mut history = Vec::new();
    for entry in addresses {
        for tx in provider.get_address_history(&entry.address)? {
            if seen.insert(tx.txid) {
                history.push(tx);
            }
        }
    }
    Ok(history)
}

/// Direction of a transaction relative to the account.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Funds arrived from outside.
    Incoming,
    /// Funds left to a foreign address.
    Outgoing,
    /// Funds moved between the account's own addresses.
    Internal,
}

/// A wallet-centric summary of one transaction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SimpleTransaction {
    pub txid: Txid,
    pub direction: Direction,
    /// Received amount for incoming, sent-outside amount for outgoing, 0 for internal.
    pub value: u64,
    pub fee: u64,
    pub confirmed: bool,
    pub block_height: Option<u64>,
    pub block_time: Option<DateTime<Utc>>,
}

/// Classify and order an account's history.
///
/// Deduplicates by txid, then lists unconfirmed transactions first and
/// confirmed ones by descending height.
pub fn list_simple_transactions(
    history: impl IntoIterator<Item = HistoryTx>,
    owned: &HashSet<String>,
) -> Vec<SimpleTransaction> {
    let mut unique: HashMap<Txid, HistoryTx> = HashMap::new();
    for tx in history {
        unique.entry(tx.txid).or_insert(tx);
    }

    let mut simple: Vec<SimpleTransaction> = unique.into_values().map(|tx| classify(&tx, owned)).collect();
    simple.sort_by(|a, b| {
        // Unconfirmed first, then newest block first, txid as tie-break.
        let key = |t: &SimpleTransaction| (t.confirmed, std::cmp::Reverse(t.block_height));
        key(a).cmp(&key(b)).then_with(|| a.txid.cmp(&b.txid))
    });
    simple
}

fn is_owned(address: &Option<String>, owned: &HashSet<String>) -> bool {
    address.as_ref().is_some_and(|a| owned.contains(a))
}

fn classify(tx: &HistoryTx, owned: &HashSet<String>) -> SimpleTransaction {
    let spends_owned = tx.inputs.iter().any(|input| is_owned(&input.address, owned));
    let (to_owned, to_foreign) = tx.outputs.iter().fold((0u64, 0u64), |(mine, theirs), out| {
        if is_owned(&out.address, owned) {
            (mine.saturating_add(out.value), theirs)
        } else {
            (mine, theirs.saturating_add(out.value))
        }
    });

    let (direction, value) = if !spends_owned {
        (Direction::Incoming, to_owned)
    } else if to_foreign == 0 {
        (Direction::Internal, 0)
    } else {
        (Direction::Outgoing, to_foreign)
    };

    SimpleTransaction {
        txid: tx.txid,
        direction,
        value,
        fee: tx.fee,
        confirmed: tx.status.confirmed,
        block_height: tx.status.block_height,
        block_time: tx
            .status
            .block_time
            .and_then(|secs| DateTime::from_timestamp(secs, 0)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_core::constants::Network;
    use satchel_core::error::ProviderError;
    use satchel_core::types::{AddressUtxo, FeeEstimates, HistoryEntry, TxStatus};

    const MINE: &str = "mipcBbFg9gMiCh81Kj8tqqdgoZub1ZJRfn";
    const MINE_CHANGE: &str = "mqM3BCGU3Sjmx8FAsgBXSNgD5S1hpXvPPs";
    const THEIRS: &str = "1BoatSLRHtKNngkdXEeobR76b53LETtpyT";

    fn entry(addr: &str, value: u64) -> HistoryEntry {
        HistoryEntry { address: Some(addr.to_string()), value }
    }

    fn status(height: Option<u64>) -> TxStatus {
        TxStatus { confirmed: height.is_some(), block_height: height, block_time: height.map(|_| 1_700_000_000) }
    }

    fn tx(id: u8, inputs: Vec<HistoryEntry>, outputs: Vec<HistoryEntry>, height: Option<u64>) -> HistoryTx {
        HistoryTx { txid: Txid([id; 32]), inputs, outputs, fee: 226, status: status(height) }
    }

    fn owned() -> HashSet<String> {
        [MINE, MINE_CHANGE].into_iter().map(String::from).collect()
    }

    #[test]
    fn classify_incoming() {
        let t = tx(1, vec![entry(THEIRS, 10_000)], vec![entry(MINE, 4_000), entry(THEIRS, 5_774)], Some(10));
        let s = classify(&t, &owned());
        assert_eq!(s.direction, Direction::Incoming);
        assert_eq!(s.value, 4_000);
        assert_eq!(s.block_time.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn classify_outgoing_excludes_change() {
        let t = tx(2, vec![entry(MINE, 10_000)], vec![entry(THEIRS, 4_000), entry(MINE_CHANGE, 5_774)], None);
        let s = classify(&t, &owned());
        assert_eq!(s.direction, Direction::Outgoing);
        assert_eq!(s.value, 4_000);
        assert!(!s.confirmed);
    }

    #[test]
    fn classify_internal() {
        let t = tx(3, vec![entry(MINE, 10_000)], vec![entry(MINE_CHANGE, 9_774)], Some(5));
        let s = classify(&t, &owned());
        assert_eq!(s.direction, Direction::Internal);
        assert_eq!(s.value, 0);
    }

    #[test]
    fn addressless_outputs_count_as_foreign() {
        let t = tx(
            4,
            vec![entry(MINE, 1_000)],
            vec![HistoryEntry { address: None, value: 0 }, entry(MINE_CHANGE, 774)],
            Some(1),
        );
        // An OP_RETURN with zero value sends nothing outside.
        assert_eq!(classify(&t, &owned()).direction, Direction::Internal);
    }

    #[test]
    fn dedupe_and_order() {
        let history = vec![
            tx(1, vec![entry(THEIRS, 1)], vec![entry(MINE, 1)], Some(100)),
            tx(2, vec![entry(THEIRS, 1)], vec![entry(MINE, 1)], Some(300)),
            tx(3, vec![entry(THEIRS, 1)], vec![entry(MINE, 1)], None),
            tx(1, vec![entry(THEIRS, 1)], vec![entry(MINE, 1)], Some(100)),
            tx(4, vec![entry(THEIRS, 1)], vec![entry(MINE, 1)], Some(200)),
        ];
        let list = list_simple_transactions(history, &owned());
        let ids: Vec<u8> = list.iter().map(|t| t.txid.0[0]).collect();
        assert_eq!(ids, vec![3, 2, 4, 1]);
    }

    #[test]
    fn balance_splits_confirmed() {
        let addr: Address = MINE.parse().unwrap();
        let mut set = AccountUtxos::new();
        for (i, (value, confirmed)) in [(5_000, true), (3_000, false), (2_000, true)].into_iter().enumerate() {
            set.insert(OwnedUtxo {
                outpoint: OutPoint { txid: Txid([i as u8; 32]), vout: 0 },
                value,
                address: addr,
                chain: 0,
                index: 0,
                confirmed,
                block_height: None,
            });
        }
        let b = set.balance();
        assert_eq!((b.confirmed, b.unconfirmed, b.utxo_count), (7_000, 3_000, 3));
        assert_eq!(b.total(), 10_000);

        let removed = set.remove_spent(&[
            OutPoint { txid: Txid([0; 32]), vout: 0 },
            OutPoint { txid: Txid([9; 32]), vout: 0 },
        ]);
        assert_eq!(removed, 1);
        assert_eq!(set.balance().total(), 5_000);
    }

    struct FixedProvider {
        utxos: HashMap<String, Vec<AddressUtxo>>,
    }

    impl ChainProvider for FixedProvider {
        fn get_utxos(&self, address: &Address) -> Result<Vec<AddressUtxo>, ProviderError> {
            Ok(self.utxos.get(&address.to_string()).cloned().unwrap_or_default())
        }
        fn get_fee_estimates(&self) -> Result<FeeEstimates, ProviderError> {
            Err(ProviderError::Timeout)
        }
        fn broadcast(&self, _: &str) -> Result<Txid, ProviderError> {
            Err(ProviderError::Rejected("read-only".into()))
        }
        fn get_address_history(&self, address: &Address) -> Result<Vec<HistoryTx>, ProviderError> {
            Ok(if self.utxos.contains_key(&address.to_string()) {
                vec![tx(7, vec![], vec![entry(MINE, 1)], Some(1))]
            } else {
                vec![]
            })
        }
    }

    #[test]
    fn sync_and_scan_against_provider() {
        let mine: Address = MINE.parse().unwrap();
        let other = Address::from_pubkey_hash([1; 20], Network::Testnet);
        let provider = FixedProvider {
            utxos: HashMap::from([(
                MINE.to_string(),
                vec![AddressUtxo { txid: Txid([7; 32]), vout: 1, value: 2_500, status: status(Some(9)) }],
            )]),
        };
        let entries = vec![
            AddressEntry { chain: 0, index: 0, address: other, used: false },
            AddressEntry { chain: 1, index: 4, address: mine, used: false },
        ];

        let set = sync(&entries, &provider).unwrap();
        assert_eq!(set.len(), 1);
        let utxo = set.iter().next().unwrap();
        assert_eq!((utxo.chain, utxo.index, utxo.value), (1, 4, 2_500));
        assert!(set.synced_at().is_some());

        assert_eq!(scan_usage(&entries, &provider).unwrap(), vec![(1, 4)]);
        assert_eq!(fetch_history(&entries, &provider).unwrap().len(), 1);
    }
}
