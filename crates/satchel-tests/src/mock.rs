//! In-memory chain for driving the wallet engine without a network.
//!
//! Funding creates confirmed outputs with a matching history entry. Broadcast
//! decodes the raw transaction, spends its inputs and credits its P2PKH
//! outputs as unconfirmed, like a mempool would.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;

use parking_lot::Mutex;
use satchel_core::address::Address;
use satchel_core::constants::Network;
use satchel_core::error::ProviderError;
use satchel_core::traits::ChainProvider;
use satchel_core::transaction::Transaction;
use satchel_core::types::{AddressUtxo, FeeEstimates, HistoryEntry, HistoryTx, OutPoint, TxStatus, Txid};

/// Address the mock uses as the sender of funding transactions.
pub fn faucet_address(network: Network) -> Address {
    Address::from_pubkey_hash([0xfa; 20], network)
}

struct MockChain {
    utxos: HashMap<Address, Vec<AddressUtxo>>,
    history: HashMap<Address, Vec<HistoryTx>>,
    fees: FeeEstimates,
    broadcasts: Vec<Transaction>,
    read_failures: VecDeque<ProviderError>,
    broadcast_failure: Option<ProviderError>,
    broadcast_gate: Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>,
    height: u64,
    funded: u32,
}

/// Holds one broadcast open until released.
pub struct BroadcastGate {
    entered: mpsc::Receiver<()>,
    release: mpsc::Sender<()>,
}

impl BroadcastGate {
    /// Block until a broadcast is waiting at the gate.
    pub fn wait_entered(&self) {
        let _ = self.entered.recv();
    }

    pub fn release(&self) {
        let _ = self.release.send(());
    }
}

pub struct MockProvider {
    network: Network,
    chain: Mutex<MockChain>,
    reads: AtomicU32,
}

impl MockProvider {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            chain: Mutex::new(MockChain {
                utxos: HashMap::new(),
                history: HashMap::new(),
                fees: FeeEstimates { fastest_fee: 25, half_hour_fee: 12, hour_fee: 6, economy_fee: 3, minimum_fee: 1 },
                broadcasts: Vec::new(),
                read_failures: VecDeque::new(),
                broadcast_failure: None,
                broadcast_gate: None,
                height: 800_000,
                funded: 0,
            }),
            reads: AtomicU32::new(0),
        }
    }

    /// Pay `value` to `address` in a new confirmed transaction.
    pub fn fund(&self, address: &Address, value: u64) -> OutPoint {
        let mut chain = self.chain.lock();
        chain.funded += 1;
        chain.height += 1;
        let mut id = [0xf0; 32];
        id[..4].copy_from_slice(&chain.funded.to_le_bytes());
        let txid = Txid(id);
        let status = TxStatus {
            confirmed: true,
            block_height: Some(chain.height),
            block_time: Some(1_700_000_000 + i64::from(chain.funded) * 600),
        };

        chain.utxos.entry(*address).or_default().push(AddressUtxo {
            txid,
            vout: 0,
            value,
            status: status.clone(),
        });
        let history = HistoryTx {
            txid,
            inputs: vec![HistoryEntry {
                address: Some(faucet_address(self.network).to_string()),
                value: value + 1_000,
            }],
            outputs: vec![HistoryEntry { address: Some(address.to_string()), value }],
            fee: 1_000,
            status,
        };
        chain.history.entry(*address).or_default().push(history);
        OutPoint { txid, vout: 0 }
    }

    /// Fail the next reads with these errors, in order.
    pub fn fail_reads(&self, errors: impl IntoIterator<Item = ProviderError>) {
        self.chain.lock().read_failures.extend(errors);
    }

    /// Fail the next broadcast with `error`.
    pub fn fail_next_broadcast(&self, error: ProviderError) {
        self.chain.lock().broadcast_failure = Some(error);
    }

    /// Park the next broadcast before it touches the chain.
    pub fn pause_next_broadcast(&self) -> BroadcastGate {
        let (entered_tx, entered) = mpsc::channel();
        let (release, release_rx) = mpsc::channel();
        self.chain.lock().broadcast_gate = Some((entered_tx, release_rx));
        BroadcastGate { entered, release }
    }

    pub fn set_fees(&self, fees: FeeEstimates) {
        self.chain.lock().fees = fees;
    }

    /// Accepted transactions in broadcast order.
    pub fn broadcasts(&self) -> Vec<Transaction> {
        self.chain.lock().broadcasts.clone()
    }

    pub fn utxos_of(&self, address: &Address) -> Vec<AddressUtxo> {
        self.chain.lock().utxos.get(address).cloned().unwrap_or_default()
    }

    /// Read calls made so far, failed ones included.
    pub fn read_calls(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }

    fn read(&self) -> Result<parking_lot::MutexGuard<'_, MockChain>, ProviderError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut chain = self.chain.lock();
        match chain.read_failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(chain),
        }
    }
}

impl ChainProvider for MockProvider {
    fn get_utxos(&self, address: &Address) -> Result<Vec<AddressUtxo>, ProviderError> {
        Ok(self.read()?.utxos.get(address).cloned().unwrap_or_default())
    }

    fn get_fee_estimates(&self) -> Result<FeeEstimates, ProviderError> {
        Ok(self.read()?.fees)
    }

    fn broadcast(&self, raw_tx: &str) -> Result<Txid, ProviderError> {
        let gate = self.chain.lock().broadcast_gate.take();
        if let Some((entered, release)) = gate {
            let _ = entered.send(());
            let _ = release.recv();
        }
        let mut chain = self.chain.lock();
        if let Some(e) = chain.broadcast_failure.take() {
            return Err(e);
        }
        let tx = Transaction::from_hex(raw_tx).map_err(|e| ProviderError::Rejected(e.to_string()))?;
        let txid = tx.txid();

        // Resolve every input before touching state.
        let mut spent = Vec::with_capacity(tx.inputs.len());
        for input in &tx.inputs {
            let op = input.previous_output;
            let found = chain.utxos.iter().find_map(|(addr, list)| {
                list.iter()
                    .find(|u| u.outpoint() == op)
                    .map(|u| (*addr, u.value))
            });
            match found {
                Some(hit) => spent.push((op, hit)),
                None => return Err(ProviderError::Rejected(format!("missing input {op}"))),
            }
        }
        let value_in: u64 = spent.iter().map(|(_, (_, v))| v).sum();
        let value_out = tx
            .output_value()
            .ok_or_else(|| ProviderError::Rejected("output value overflow".into()))?;
        let fee = value_in
            .checked_sub(value_out)
            .ok_or_else(|| ProviderError::Rejected("outputs exceed inputs".into()))?;

        for (op, (addr, _)) in &spent {
            if let Some(list) = chain.utxos.get_mut(addr) {
                list.retain(|u| u.outpoint() != *op);
            }
        }

        let unconfirmed = TxStatus::default();
        let mut touched: Vec<Address> = spent.iter().map(|(_, (addr, _))| *addr).collect();
        let mut outputs = Vec::with_capacity(tx.outputs.len());
        for (vout, out) in tx.outputs.iter().enumerate() {
            let address = out
                .script_pubkey
                .p2pkh_hash()
                .map(|hash| Address::from_pubkey_hash(hash, self.network));
            if let Some(addr) = address {
                chain.utxos.entry(addr).or_default().push(AddressUtxo {
                    txid,
                    vout: vout as u32,
                    value: out.value,
                    status: unconfirmed.clone(),
                });
                touched.push(addr);
            }
            outputs.push(HistoryEntry { address: address.map(|a| a.to_string()), value: out.value });
        }

        let history = HistoryTx {
            txid,
            inputs: spent
                .iter()
                .map(|(_, (addr, value))| HistoryEntry { address: Some(addr.to_string()), value: *value })
                .collect(),
            outputs,
            fee,
            status: unconfirmed,
        };
        touched.sort();
        touched.dedup();
        for addr in touched {
            chain.history.entry(addr).or_default().push(history.clone());
        }
        chain.broadcasts.push(tx);
        Ok(txid)
    }

    fn get_address_history(&self, address: &Address) -> Result<Vec<HistoryTx>, ProviderError> {
        Ok(self.read()?.history.get(address).cloned().unwrap_or_default())
    }
}
