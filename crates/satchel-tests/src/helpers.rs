//! Shared test helpers for E2E and property tests.

use std::sync::Arc;
use std::time::Duration;

use satchel_core::address::Address;
use satchel_core::constants::Network;
use satchel_wallet::{KdfParams, ProviderSet, RetryPolicy, WalletConfig, WalletEngine};

use crate::mock::MockProvider;

/// BIP-39 test phrase with well-known derived addresses.
pub const TEST_MNEMONIC: &str =
    "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

pub const PASSWORD: &str = "correct horse battery staple";

/// Testnet coin type.
pub const TESTNET: u32 = 1;

/// Cheapest Argon2id parameters the KDF accepts.
pub const FAST_KDF: KdfParams = KdfParams::new(64, 1, 1);

/// Gap limit small enough to exhaust in a test.
pub const TEST_GAP_LIMIT: u32 = 3;

/// Config for a wallet file inside `dir` with fast KDF and near-zero backoff.
pub fn test_config(dir: &tempfile::TempDir) -> WalletConfig {
    WalletConfig {
        wallet_path: dir.path().join("wallet.dat"),
        gap_limit: TEST_GAP_LIMIT,
        kdf: FAST_KDF,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        },
        ..WalletConfig::default()
    }
}

/// Engine over a fresh testnet mock, not yet holding a wallet.
pub fn test_engine() -> (WalletEngine, Arc<MockProvider>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mock = Arc::new(MockProvider::new(Network::Testnet));
    let providers = ProviderSet::new().with(Network::Testnet, mock.clone());
    let engine = WalletEngine::new(test_config(&dir), providers);
    (engine, mock, dir)
}

/// Engine with [`TEST_MNEMONIC`] restored, loaded, and testnet account 0 created.
pub fn restored_engine() -> (WalletEngine, Arc<MockProvider>, tempfile::TempDir) {
    let (engine, mock, dir) = test_engine();
    engine.restore_wallet(TEST_MNEMONIC, "", PASSWORD).unwrap();
    engine.load_master_key(PASSWORD).unwrap();
    engine.create_new_account(TESTNET, PASSWORD).unwrap();
    (engine, mock, dir)
}

/// A testnet address the wallet does not own.
pub fn foreign_address() -> Address {
    Address::from_pubkey_hash([0x42; 20], Network::Testnet)
}
