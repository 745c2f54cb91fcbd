//! BIP-44 account and address hierarchy with a gap-limited derivation window.
//!
//! ```text
//! m / 44' / coin_type' / account' / chain / index
//! ```
//!
//! Only public data lives here: each account stores its account-level
//! extended public key and derives addresses with CKDpub, so the tree can be
//! held unlocked in memory while the seed stays encrypted.
//!
//! Each chain keeps exactly `highest_used + 1 + gap_limit` addresses derived
//! (`gap_limit` when nothing is used yet). Handing out addresses never
//! widens the window; only observed on-chain usage does.

use std::collections::BTreeMap;
use std::fmt;

use satchel_core::address::Address;
use satchel_core::bip32::{ChildNumber, ExtendedPublicKey};
use satchel_core::constants::{CHANGE_CHAIN, Network, PURPOSE, RECEIVE_CHAIN};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::WalletError;
use crate::keys::MasterSeed;

/// A derived address and whether the chain has seen it used.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AddressEntry {
    pub chain: u32,
    pub index: u32,
    pub address: Address,
    pub used: bool,
}

/// Full derivation position of a wallet address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AddressPath {
    pub coin_type: u32,
    pub account: u32,
    pub chain: u32,
    pub index: u32,
}

impl fmt::Display for AddressPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "m/{PURPOSE}'/{}'/{}'/{}/{}",
            self.coin_type, self.account, self.chain, self.index
        )
    }
}

/// One external (receive) or internal (change) chain of an account.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Chain {
    index: u32,
    next_index: u32,
    highest_used: Option<u32>,
    addresses: BTreeMap<u32, AddressEntry>,
}

impl Chain {
    fn new(account_xpub: &ExtendedPublicKey, index: u32, gap_limit: u32) -> Result<Self, WalletError> {
        let mut chain = Self {
            index,
            next_index: 0,
            highest_used: None,
            addresses: BTreeMap::new(),
        };
        chain.extend(account_xpub, gap_limit)?;
        Ok(chain)
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Index the next allocation hands out.
    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    pub fn highest_used(&self) -> Option<u32> {
        self.highest_used
    }

    /// Number of addresses the window allows: `highest_used + 1 + gap_limit`.
    pub fn window_end(&self, gap_limit: u32) -> u32 {
        self.highest_used
            .map_or(0, |h| h.saturating_add(1))
            .saturating_add(gap_limit)
    }

    /// Derived addresses in index order.
    pub fn addresses(&self) -> impl DoubleEndedIterator<Item = &AddressEntry> {
        self.addresses.values()
    }

    pub fn get(&self, index: u32) -> Option<&AddressEntry> {
        self.addresses.get(&index)
    }

    /// Number of derived addresses.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Addresses already handed out, most recent first.
    pub fn allocated(&self) -> impl Iterator<Item = &AddressEntry> {
        self.addresses.range(..self.next_index).rev().map(|(_, entry)| entry)
    }

    /// Derive any missing addresses up to the window end. Returns how many
    /// were added.
    fn extend(&mut self, account_xpub: &ExtendedPublicKey, gap_limit: u32) -> Result<u32, WalletError> {
        let end = self.window_end(gap_limit);
        let start = self.addresses.keys().next_back().map_or(0, |last| last + 1);
        if start >= end {
            return Ok(0);
        }
        let chain_key = account_xpub.derive_child(ChildNumber::normal(self.index)?)?;
        for index in start..end {
            let address = chain_key.derive_child(ChildNumber::normal(index)?)?.address();
            self.addresses.insert(
                index,
                AddressEntry { chain: self.index, index, address, used: false },
            );
        }
        Ok(end - start)
    }

    fn peek(&self, gap_limit: u32) -> Option<&AddressEntry> {
        if self.next_index < self.window_end(gap_limit) {
            self.addresses.get(&self.next_index)
        } else {
            None
        }
    }

    fn allocate(&mut self, gap_limit: u32) -> Result<AddressEntry, WalletError> {
        let entry = self
            .peek(gap_limit)
            .cloned()
            .ok_or(WalletError::GapLimitReached(gap_limit))?;
        self.next_index = entry.index + 1;
        Ok(entry)
    }

    /// Mark `index` used. Returns whether anything changed.
    fn mark_used(&mut self, index: u32) -> bool {
        let Some(entry) = self.addresses.get_mut(&index) else {
            return false;
        };
        if entry.used {
            return false;
        }
        entry.used = true;
        self.highest_used = Some(self.highest_used.map_or(index, |h| h.max(index)));
        // Never hand out an address that already has history.
        self.next_index = self.next_index.max(index + 1);
        true
    }
}

/// A BIP-44 account: hardened account key plus its two chains.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Account {
    index: u32,
    xpub: ExtendedPublicKey,
    receive: Chain,
    change: Chain,
}

impl Account {
    /// Initialize both chains with the first `gap_limit` addresses.
    pub fn new(index: u32, xpub: ExtendedPublicKey, gap_limit: u32) -> Result<Self, WalletError> {
        let receive = Chain::new(&xpub, RECEIVE_CHAIN, gap_limit)?;
        let change = Chain::new(&xpub, CHANGE_CHAIN, gap_limit)?;
        Ok(Self { index, xpub, receive, change })
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Account-level extended public key (`m/44'/coin'/account'`).
    pub fn xpub(&self) -> &ExtendedPublicKey {
        &self.xpub
    }

    pub fn receive(&self) -> &Chain {
        &self.receive
    }

    pub fn change(&self) -> &Chain {
        &self.change
    }

    pub fn chain(&self, chain: u32) -> Option<&Chain> {
        match chain {
            RECEIVE_CHAIN => Some(&self.receive),
            CHANGE_CHAIN => Some(&self.change),
            _ => None,
        }
    }

    fn chain_mut(&mut self, chain: u32) -> Option<&mut Chain> {
        match chain {
            RECEIVE_CHAIN => Some(&mut self.receive),
            CHANGE_CHAIN => Some(&mut self.change),
            _ => None,
        }
    }

    /// Every derived address of both chains, receive chain first.
    pub fn entries(&self) -> impl Iterator<Item = &AddressEntry> {
        self.receive.addresses().chain(self.change.addresses())
    }

    pub fn find(&self, address: &Address) -> Option<&AddressEntry> {
        self.entries().find(|entry| entry.address == *address)
    }

    fn summary(&self, coin_type: u32) -> AccountSummary {
        AccountSummary {
            coin_type,
            index: self.index,
            xpub: self.xpub.encode(),
            next_receive_index: self.receive.next_index,
            next_change_index: self.change.next_index,
            receive_addresses: self.receive.len(),
            change_addresses: self.change.len(),
            used_addresses: self.entries().filter(|e| e.used).count(),
        }
    }
}

/// A coin type (network) and its accounts.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CoinTypeEntry {
    index: u32,
    name: String,
    accounts: BTreeMap<u32, Account>,
}

impl CoinTypeEntry {
    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn accounts(&self) -> impl Iterator<Item = &Account> {
        self.accounts.values()
    }
}

/// Public state of one account for overviews.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AccountSummary {
    pub coin_type: u32,
    pub index: u32,
    pub xpub: String,
    pub next_receive_index: u32,
    pub next_change_index: u32,
    /// Derived receive addresses, including the unused look-ahead window.
    pub receive_addresses: usize,
    pub change_addresses: usize,
    pub used_addresses: usize,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct CoinTypeOverview {
    pub index: u32,
    pub name: String,
    pub accounts: Vec<AccountSummary>,
}

/// Coin types and accounts of the whole wallet.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WalletOverview {
    pub purpose: u32,
    pub coin_types: Vec<CoinTypeOverview>,
}

/// The purpose node: coin types, accounts and their derived addresses.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WalletTree {
    purpose: u32,
    gap_limit: u32,
    coin_types: BTreeMap<u32, CoinTypeEntry>,
}

impl WalletTree {
    /// An empty tree serving `networks`.
    pub fn new(networks: &[Network], gap_limit: u32) -> Self {
        let coin_types = networks
            .iter()
            .map(|network| {
                let entry = CoinTypeEntry {
                    index: network.coin_type(),
                    name: network.name().to_string(),
                    accounts: BTreeMap::new(),
                };
                (network.coin_type(), entry)
            })
            .collect();
        Self { purpose: PURPOSE, gap_limit, coin_types }
    }

    pub fn gap_limit(&self) -> u32 {
        self.gap_limit
    }

    /// Network of a coin type this tree serves.
    pub fn network(&self, coin_type: u32) -> Result<Network, WalletError> {
        if !self.coin_types.contains_key(&coin_type) {
            return Err(WalletError::UnknownCoinType(coin_type));
        }
        Network::from_coin_type(coin_type).ok_or(WalletError::UnknownCoinType(coin_type))
    }

    pub fn coin_types(&self) -> impl Iterator<Item = &CoinTypeEntry> {
        self.coin_types.values()
    }

    /// Derive the next account of `coin_type` at `m/44'/coin'/account'`.
    ///
    /// The new index is one past the highest existing account (0 for the
    /// first).
    pub fn create_account(&mut self, seed: &MasterSeed, coin_type: u32) -> Result<AccountSummary, WalletError> {
        let network = self.network(coin_type)?;
        let gap_limit = self.gap_limit;
        let entry = self
            .coin_types
            .get_mut(&coin_type)
            .ok_or(WalletError::UnknownCoinType(coin_type))?;
        let index = entry.accounts.keys().next_back().map_or(0, |last| last + 1);
        let xpub = seed.account_xpub(network, index)?;
        let account = Account::new(index, xpub, gap_limit)?;
        let summary = account.summary(coin_type);
        entry.accounts.insert(index, account);
        debug!(coin_type, account = index, "account derived");
        Ok(summary)
    }

    pub fn account(&self, coin_type: u32, account: u32) -> Result<&Account, WalletError> {
        self.coin_types
            .get(&coin_type)
            .ok_or(WalletError::UnknownCoinType(coin_type))?
            .accounts
            .get(&account)
            .ok_or(WalletError::UnknownAccount { coin_type, account })
    }

    fn account_mut(&mut self, coin_type: u32, account: u32) -> Result<&mut Account, WalletError> {
        self.coin_types
            .get_mut(&coin_type)
            .ok_or(WalletError::UnknownCoinType(coin_type))?
            .accounts
            .get_mut(&account)
            .ok_or(WalletError::UnknownAccount { coin_type, account })
    }

    pub fn account_summary(&self, coin_type: u32, account: u32) -> Result<AccountSummary, WalletError> {
        Ok(self.account(coin_type, account)?.summary(coin_type))
    }

    /// Hand out the next receive address and advance the chain.
    pub fn next_receive_address(&mut self, coin_type: u32, account: u32) -> Result<AddressEntry, WalletError> {
        let gap_limit = self.gap_limit;
        self.account_mut(coin_type, account)?.receive.allocate(gap_limit)
    }

    /// Hand out the next change address and advance the chain.
    pub fn next_change_address(&mut self, coin_type: u32, account: u32) -> Result<AddressEntry, WalletError> {
        let gap_limit = self.gap_limit;
        self.account_mut(coin_type, account)?.change.allocate(gap_limit)
    }

    /// The address [`next_change_address`](Self::next_change_address) would
    /// return, without advancing.
    pub fn peek_change_address(&self, coin_type: u32, account: u32) -> Result<AddressEntry, WalletError> {
        self.account(coin_type, account)?
            .change
            .peek(self.gap_limit)
            .cloned()
            .ok_or(WalletError::GapLimitReached(self.gap_limit))
    }

    /// Record on-chain usage of `(chain, index)` pairs and re-extend both
    /// chains. Returns the number of newly derived addresses, which the
    /// caller should check for usage in turn.
    pub fn mark_usage(
        &mut self,
        coin_type: u32,
        account: u32,
        used: &[(u32, u32)],
    ) -> Result<u32, WalletError> {
        let gap_limit = self.gap_limit;
        let acct = self.account_mut(coin_type, account)?;
        for &(chain, index) in used {
            if let Some(c) = acct.chain_mut(chain) {
                c.mark_used(index);
            }
        }
        let xpub = acct.xpub.clone();
        let added = acct.receive.extend(&xpub, gap_limit)? + acct.change.extend(&xpub, gap_limit)?;
        if added > 0 {
            debug!(coin_type, account, added, "derivation window extended");
        }
        Ok(added)
    }

    /// Coin types and account summaries.
    pub fn overview(&self) -> WalletOverview {
        WalletOverview {
            purpose: self.purpose,
            coin_types: self
                .coin_types
                .values()
                .map(|ct| CoinTypeOverview {
                    index: ct.index,
                    name: ct.name.clone(),
                    accounts: ct.accounts.values().map(|a| a.summary(ct.index)).collect(),
                })
                .collect(),
        }
    }

    /// Locate the derivation path of a wallet address.
    pub fn find_path(&self, address: &Address) -> Option<AddressPath> {
        let coin_type = address.network().coin_type();
        let ct = self.coin_types.get(&coin_type)?;
        ct.accounts.values().find_map(|account| {
            account.find(address).map(|entry| AddressPath {
                coin_type,
                account: account.index,
                chain: entry.chain,
                index: entry.index,
            })
        })
    }
}
