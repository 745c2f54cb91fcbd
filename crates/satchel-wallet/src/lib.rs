//! # satchel-wallet — HD Bitcoin wallet engine.
//!
//! Keeps a BIP-39 seed in an Argon2id/AES-256-GCM encrypted file, derives
//! BIP-44 accounts with a gap-limited address window, tracks unspent outputs
//! through a [`ChainProvider`](satchel_core::traits::ChainProvider), selects
//! coins with Random-Improve and signs legacy P2PKH transactions.
//!
//! # Modules
//!
//! - [`error`] — `WalletError` enum
//! - [`encryption`] — Argon2id key derivation and AES-256-GCM sealing
//! - [`mnemonic`] — BIP-39 phrases and seeds
//! - [`keys`] — master seed custody and BIP-44 signing keys
//! - [`vault`] — password-protected wallet file and unlocked sessions
//! - [`store`] — wallet file format and atomic writes
//! - [`hierarchy`] — coin types, accounts and gap-limited address chains
//! - [`tracker`] — UTXO sync, balances and simplified history
//! - [`coin_selection`] — Random-Improve selection
//! - [`builder`] — transaction building, signing and verification
//! - [`retry`] — backoff for transient provider failures
//! - [`config`] — engine configuration
//! - [`engine`] — the command surface

pub mod builder;
pub mod coin_selection;
pub mod config;
pub mod encryption;
pub mod engine;
pub mod error;
pub mod hierarchy;
pub mod keys;
pub mod mnemonic;
pub mod retry;
pub mod store;
pub mod tracker;
pub mod vault;

// Re-exports for convenient access
pub use builder::{Recipient, SignedTransaction, TransactionBuilder, UnsignedTransaction};
pub use coin_selection::{CoinSelection, CoinSelector, SelectionPolicy};
pub use config::WalletConfig;
pub use encryption::{KdfParams, decrypt, encrypt};
pub use engine::{MarkedAddress, ProviderSet, WalletEngine};
pub use error::WalletError;
pub use hierarchy::{AccountSummary, AddressEntry, WalletOverview, WalletTree};
pub use keys::MasterSeed;
pub use retry::{RetryPolicy, RetryingProvider};
pub use tracker::{Balance, Direction, OwnedUtxo, SimpleTransaction};
pub use vault::{Session, Vault};
