//! The wallet engine: one instance per process serving every wallet command.
//!
//! # Locking
//! - `tree`: the unlocked public tree. Held only briefly, never across
//!   provider calls.
//! - one mutex per account, held for a whole command on that account
//!   (sync, usage refresh, allocation, send) so that commands on the same
//!   account serialize while distinct accounts proceed in parallel.
//!
//! Always take an account lock before the tree lock. Account locks live for
//! the life of the engine, so reloading the tree never hands out a second
//! lock for an account.
//!
//! Commands that allocate accounts or addresses apply the change to a copy,
//! write the wallet file, and only then publish the copy. Usage flags learned
//! from the provider are applied to the published tree in place and reach the
//! file with the next write.
//!
//! Every wallet file write happens under the tree lock. A password change
//! bumps `key_epoch` under that lock, and a write by a command that unlocked
//! under an older epoch first checks that its password still opens the file.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use satchel_core::address::Address;
use satchel_core::constants::{CHANGE_CHAIN, Network};
use satchel_core::traits::ChainProvider;
use satchel_core::types::{FeeEstimates, OutPoint};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use zeroize::Zeroizing;

use crate::builder::TransactionBuilder;
use crate::coin_selection::CoinSelector;
use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::hierarchy::{AccountSummary, AddressEntry, WalletOverview, WalletTree};
use crate::retry::RetryingProvider;
use crate::tracker::{self, AccountUtxos, Balance, OwnedUtxo, SimpleTransaction};
use crate::vault::{Session, Vault};

/// Chain providers keyed by coin type.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<u32, Arc<dyn ChainProvider>>,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the provider serving `network`.
    pub fn with(mut self, network: Network, provider: Arc<dyn ChainProvider>) -> Self {
        self.providers.insert(network.coin_type(), provider);
        self
    }

    pub fn get(&self, coin_type: u32) -> Result<Arc<dyn ChainProvider>, WalletError> {
        self.providers
            .get(&coin_type)
            .cloned()
            .ok_or(WalletError::UnknownCoinType(coin_type))
    }

    /// Wrap every provider so transient read failures are retried.
    fn retrying(self, config: &WalletConfig) -> Self {
        let providers = self
            .providers
            .into_iter()
            .map(|(coin_type, inner)| {
                let wrapped: Arc<dyn ChainProvider> = Arc::new(RetryingProvider::new(inner, config.retry));
                (coin_type, wrapped)
            })
            .collect();
        Self { providers }
    }
}

/// A handed-out receive address and whether it has on-chain history.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct MarkedAddress {
    pub address: Address,
    pub index: u32,
    pub used: bool,
}

#[derive(Default)]
struct AccountState {
    utxos: AccountUtxos,
}

/// Seed unlocked for one command, tagged with the password epoch it was
/// unlocked under.
struct Unlocked {
    session: Session,
    epoch: u64,
}

pub struct WalletEngine {
    config: WalletConfig,
    vault: Vault,
    providers: ProviderSet,
    tree: Mutex<Option<WalletTree>>,
    accounts: Mutex<HashMap<(u32, u32), Arc<Mutex<AccountState>>>>,
    key_epoch: AtomicU64,
}

impl WalletEngine {
    pub fn new(config: WalletConfig, providers: ProviderSet) -> Self {
        let vault = Vault::new(config.wallet_path.clone(), config.kdf);
        let providers = providers.retrying(&config);
        Self {
            config,
            vault,
            providers,
            tree: Mutex::new(None),
            accounts: Mutex::new(HashMap::new()),
            key_epoch: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn does_wallet_exist(&self) -> bool {
        self.vault.exists()
    }

    /// Whether the public tree is loaded.
    pub fn is_loaded(&self) -> bool {
        self.tree.lock().is_some()
    }

    /// Create a new wallet file and load it. Returns the backup phrase.
    pub fn create_wallet(
        &self,
        password: &str,
        word_count: usize,
        passphrase: &str,
    ) -> Result<Zeroizing<String>, WalletError> {
        let tree = self.empty_tree();
        let (_session, mnemonic) = self.vault.create(password.as_bytes(), word_count, passphrase, &tree)?;
        self.install(tree);
        Ok(mnemonic)
    }

    /// Recreate a wallet from its backup phrase and load it.
    ///
    /// Accounts are not recreated automatically; call
    /// [`create_new_account`](Self::create_new_account) for each one used
    /// before and refresh to rediscover their addresses.
    pub fn restore_wallet(&self, mnemonic: &str, passphrase: &str, password: &str) -> Result<(), WalletError> {
        let tree = self.empty_tree();
        self.vault.restore(mnemonic, passphrase, password.as_bytes(), &tree)?;
        self.install(tree);
        Ok(())
    }

    /// Decrypt the wallet file and cache its public tree.
    pub fn load_master_key(&self, password: &str) -> Result<(), WalletError> {
        let (_session, tree) = self.vault.unlock(password.as_bytes())?;
        let accounts: usize = tree.coin_types().map(|ct| ct.accounts().count()).sum();
        self.install(tree);
        info!(accounts, "wallet loaded");
        Ok(())
    }

    /// Re-encrypt the wallet file under `new_password`.
    ///
    /// Commands already running under the old password can no longer write
    /// the file afterwards.
    pub fn change_password(&self, old_password: &str, new_password: &str) -> Result<(), WalletError> {
        let guard = self.tree.lock();
        let (session, file_tree) = self.vault.unlock(old_password.as_bytes())?;
        let tree = guard.as_ref().unwrap_or(&file_tree);
        self.vault.save(&session, new_password.as_bytes(), tree)?;
        self.key_epoch.fetch_add(1, Ordering::SeqCst);
        info!("wallet password changed");
        Ok(())
    }

    /// Derive the next account of `coin_type`.
    pub fn create_new_account(&self, coin_type: u32, password: &str) -> Result<AccountSummary, WalletError> {
        let unlocked = self.open(password)?;
        let summary = self.commit(&unlocked, password, |tree| {
            tree.create_account(unlocked.session.seed(), coin_type)
        })?;
        info!(coin_type, account = summary.index, "account created");
        Ok(summary)
    }

    pub fn get_accounts_overview(&self) -> Result<WalletOverview, WalletError> {
        self.with_tree(|tree| Ok(tree.overview()))
    }

    /// Refresh usage, sync unspent outputs and return the balance.
    pub fn get_account_balance(&self, coin_type: u32, account: u32) -> Result<Balance, WalletError> {
        let provider = self.providers.get(coin_type)?;
        let handle = self.account_state(coin_type, account)?;
        let mut state = handle.lock();

        self.refresh_usage(coin_type, account, provider.as_ref())?;
        let entries = self.entries(coin_type, account)?;
        state.utxos = tracker::sync(&entries, provider.as_ref())?;
        let balance = state.utxos.balance();
        debug!(coin_type, account, total = balance.total(), utxos = balance.utxo_count, "balance synced");
        Ok(balance)
    }

    /// The account's transactions, newest first.
    pub fn get_simple_transactions(
        &self,
        coin_type: u32,
        account: u32,
    ) -> Result<Vec<SimpleTransaction>, WalletError> {
        let provider = self.providers.get(coin_type)?;
        let handle = self.account_state(coin_type, account)?;
        let _state = handle.lock();

        self.refresh_usage(coin_type, account, provider.as_ref())?;
        let entries = self.entries(coin_type, account)?;
        let history = tracker::fetch_history(&entries, provider.as_ref())?;
        let owned: HashSet<String> = entries.iter().map(|e| e.address.to_string()).collect();
        Ok(tracker::list_simple_transactions(history, &owned))
    }

    /// Handed-out receive addresses, most recent first, with fresh usage flags.
    pub fn get_all_receive_addresses_marked(
        &self,
        coin_type: u32,
        account: u32,
    ) -> Result<Vec<MarkedAddress>, WalletError> {
        let provider = self.providers.get(coin_type)?;
        let handle = self.account_state(coin_type, account)?;
        let _state = handle.lock();

        self.refresh_usage(coin_type, account, provider.as_ref())?;
        self.with_tree(|tree| {
            Ok(tree
                .account(coin_type, account)?
                .receive()
                .allocated()
                .map(|e| MarkedAddress { address: e.address, index: e.index, used: e.used })
                .collect())
        })
    }

    /// Hand out the next receive address.
    ///
    /// When the gap-limit window is exhausted, usage is refreshed once from
    /// the provider before giving up with [`WalletError::GapLimitReached`].
    pub fn get_new_receive_address(
        &self,
        coin_type: u32,
        account: u32,
        password: &str,
    ) -> Result<Address, WalletError> {
        let unlocked = self.open(password)?;
        let handle = self.account_state(coin_type, account)?;
        let _state = handle.lock();

        let entry = match self.commit(&unlocked, password, |tree| tree.next_receive_address(coin_type, account)) {
            Err(WalletError::GapLimitReached(gap)) => {
                debug!(coin_type, account, gap, "receive window exhausted, refreshing usage");
                let provider = self.providers.get(coin_type)?;
                self.refresh_usage(coin_type, account, provider.as_ref())?;
                self.commit(&unlocked, password, |tree| tree.next_receive_address(coin_type, account))?
            }
            other => other?,
        };
        info!(coin_type, account, index = entry.index, "receive address allocated");
        Ok(entry.address)
    }

    /// Check that `address` is a well-formed P2PKH address of `coin_type`.
    pub fn validate_address(&self, address: &str, coin_type: u32) -> Result<Address, WalletError> {
        let network = Network::from_coin_type(coin_type).ok_or(WalletError::UnknownCoinType(coin_type))?;
        Ok(Address::decode_for(address, network)?)
    }

    pub fn get_recommended_fees(&self, coin_type: u32) -> Result<FeeEstimates, WalletError> {
        Ok(self.providers.get(coin_type)?.get_fee_estimates()?)
    }

    /// Pay `amount` satoshis to `address` at `fee_rate` sat/vB.
    ///
    /// Returns the total leaving the account (amount plus fee). The spent
    /// outputs and the change index are committed only after the provider
    /// accepts the transaction.
    pub fn send_transaction(
        &self,
        coin_type: u32,
        account: u32,
        address: &str,
        amount: u64,
        fee_rate: u64,
        password: &str,
    ) -> Result<u64, WalletError> {
        let destination = self.validate_address(address, coin_type)?;
        if amount == 0 {
            return Err(WalletError::InvalidAmount("amount must be positive".into()));
        }
        if fee_rate == 0 {
            return Err(WalletError::InvalidAmount("fee rate must be positive".into()));
        }
        let network = destination.network();
        let provider = self.providers.get(coin_type)?;
        let unlocked = self.open(password)?;
        let handle = self.account_state(coin_type, account)?;
        let mut state = handle.lock();

        self.refresh_usage(coin_type, account, provider.as_ref())?;
        let entries = self.entries(coin_type, account)?;
        state.utxos = tracker::sync(&entries, provider.as_ref())?;

        let selection = CoinSelector::new(self.config.policy).select_random_improve(
            &state.utxos.to_vec(),
            amount,
            fee_rate,
            &mut rand::thread_rng(),
        )?;
        let change_entry = match selection.change {
            Some(_) => Some(self.with_tree(|tree| tree.peek_change_address(coin_type, account))?),
            None => None,
        };

        let mut builder = TransactionBuilder::new(network);
        builder.add_recipient(destination, amount)?;
        let unsigned = builder.build(&selection, change_entry.as_ref().map(|e| &e.address))?;
        let signed = TransactionBuilder::sign(unsigned, |utxo| {
            unlocked.session.seed().signing_key(network, account, utxo.chain, utxo.index)
        })?;
        self.with_tree(|_| self.ensure_current(&unlocked, password))?;

        let accepted = provider
            .broadcast(&signed.raw_hex)
            .map_err(|e| WalletError::SendTx(e.to_string()))?;
        if accepted != signed.txid {
            warn!(ours = %signed.txid, theirs = %accepted, "provider returned a different txid");
        }
        info!(
            coin_type,
            account,
            txid = %signed.txid,
            amount,
            fee = signed.fee,
            inputs = signed.spent.len(),
            "transaction broadcast"
        );

        // The transaction is on the network: commit in memory first.
        state.utxos.remove_spent(&signed.spent);
        if let (Some(entry), Some((_, value))) = (&change_entry, signed.change) {
            let vout = u32::try_from(signed.tx.outputs.len().saturating_sub(1)).unwrap_or(u32::MAX);
            state.utxos.insert(OwnedUtxo {
                outpoint: OutPoint { txid: signed.txid, vout },
                value,
                address: entry.address,
                chain: entry.chain,
                index: entry.index,
                confirmed: false,
                block_height: None,
            });
        }

        let mut guard = self.tree.lock();
        let tree = guard.as_mut().ok_or(WalletError::NotLoaded)?;
        if let Some(entry) = &change_entry {
            tree.mark_usage(coin_type, account, &[(CHANGE_CHAIN, entry.index)])?;
        }
        let saved = self
            .ensure_current(&unlocked, password)
            .and_then(|()| self.vault.save(&unlocked.session, password.as_bytes(), tree));
        if let Err(e) = saved {
            error!(txid = %signed.txid, error = %e, "transaction sent but wallet file not updated");
            return Err(WalletError::Io(format!(
                "transaction {} sent but wallet file not updated: {e}",
                signed.txid
            )));
        }
        Ok(signed.total_sent())
    }

    /// Unspent outputs as of the account's last sync.
    pub fn cached_utxos(&self, coin_type: u32, account: u32) -> Result<Vec<OwnedUtxo>, WalletError> {
        let handle = self.account_state(coin_type, account)?;
        let state = handle.lock();
        Ok(state.utxos.to_vec())
    }

    /// Check every not-yet-used address for history and mark the used ones.
    /// Repeats while marking widens the derivation window.
    fn refresh_usage(&self, coin_type: u32, account: u32, provider: &dyn ChainProvider) -> Result<(), WalletError> {
        let mut checked: HashSet<(u32, u32)> = HashSet::new();
        loop {
            let pending: Vec<AddressEntry> = self.with_tree(|tree| {
                Ok(tree
                    .account(coin_type, account)?
                    .entries()
                    .filter(|e| !e.used && !checked.contains(&(e.chain, e.index)))
                    .cloned()
                    .collect())
            })?;
            if pending.is_empty() {
                return Ok(());
            }
            let used = tracker::scan_usage(&pending, provider)?;
            checked.extend(pending.iter().map(|e| (e.chain, e.index)));
            if used.is_empty() {
                return Ok(());
            }

            let mut guard = self.tree.lock();
            let tree = guard.as_mut().ok_or(WalletError::NotLoaded)?;
            let added = tree.mark_usage(coin_type, account, &used)?;
            debug!(coin_type, account, used = used.len(), added, "address usage refreshed");
            if added == 0 {
                return Ok(());
            }
        }
    }

    fn empty_tree(&self) -> WalletTree {
        WalletTree::new(&Network::ALL, self.config.gap_limit)
    }

    fn install(&self, tree: WalletTree) {
        *self.tree.lock() = Some(tree);
    }

    /// Unlock the seed, loading the tree if it is not cached yet.
    fn open(&self, password: &str) -> Result<Unlocked, WalletError> {
        // Read before unlocking: a change landing in between then shows up as
        // a newer epoch at write time.
        let epoch = self.key_epoch.load(Ordering::SeqCst);
        let (session, file_tree) = self.vault.unlock(password.as_bytes())?;
        let mut guard = self.tree.lock();
        if guard.is_none() {
            *guard = Some(file_tree);
        }
        Ok(Unlocked { session, epoch })
    }

    /// Check that `password` may still write the wallet file. Call with the
    /// tree lock held.
    fn ensure_current(&self, unlocked: &Unlocked, password: &str) -> Result<(), WalletError> {
        if self.key_epoch.load(Ordering::SeqCst) == unlocked.epoch {
            return Ok(());
        }
        debug!("password changed since unlock, re-checking");
        self.vault.unlock(password.as_bytes()).map(|_| ())
    }

    /// Apply `change` to a copy of the tree, persist it, then publish it.
    fn commit<T>(
        &self,
        unlocked: &Unlocked,
        password: &str,
        change: impl FnOnce(&mut WalletTree) -> Result<T, WalletError>,
    ) -> Result<T, WalletError> {
        let mut guard = self.tree.lock();
        self.ensure_current(unlocked, password)?;
        let mut tree = guard.as_ref().ok_or(WalletError::NotLoaded)?.clone();
        let out = change(&mut tree)?;
        self.vault.save(&unlocked.session, password.as_bytes(), &tree)?;
        *guard = Some(tree);
        Ok(out)
    }

    fn with_tree<T>(&self, read: impl FnOnce(&WalletTree) -> Result<T, WalletError>) -> Result<T, WalletError> {
        let guard = self.tree.lock();
        read(guard.as_ref().ok_or(WalletError::NotLoaded)?)
    }

    fn entries(&self, coin_type: u32, account: u32) -> Result<Vec<AddressEntry>, WalletError> {
        self.with_tree(|tree| Ok(tree.account(coin_type, account)?.entries().cloned().collect()))
    }

    fn account_state(&self, coin_type: u32, account: u32) -> Result<Arc<Mutex<AccountState>>, WalletError> {
        self.with_tree(|tree| tree.account(coin_type, account).map(|_| ()))?;
        Ok(self.accounts.lock().entry((coin_type, account)).or_default().clone())
    }
}
