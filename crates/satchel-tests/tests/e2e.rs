//! End-to-end wallet flows against the in-memory chain.
//!
//! Each test restores the well-known test phrase into a temp directory,
//! creates testnet account 0, funds it through the mock and drives the
//! engine the way the CLI does.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;

use satchel_core::bip32::ExtendedPublicKey;
use satchel_core::constants::Network;
use satchel_core::error::ProviderError;
use satchel_core::types::OutPoint;
use satchel_tests::helpers::*;
use satchel_wallet::{Direction, WalletEngine, WalletError};

fn receive_address(engine: &WalletEngine) -> satchel_core::address::Address {
    engine.get_new_receive_address(TESTNET, 0, PASSWORD).unwrap()
}

// ======================================================================
// Unlock, account, receive, fund, send
// ======================================================================

#[test]
fn e2e_receive_then_send() {
    let (engine, mock, _dir) = test_engine();
    assert!(!engine.does_wallet_exist());
    engine.restore_wallet(TEST_MNEMONIC, "", PASSWORD).unwrap();
    assert!(engine.does_wallet_exist());
    engine.load_master_key(PASSWORD).unwrap();

    let summary = engine.create_new_account(TESTNET, PASSWORD).unwrap();
    assert_eq!(summary.index, 0);
    assert_eq!(summary.next_receive_index, 0);

    // First receive address is m/44'/1'/0'/0/0.
    let address = receive_address(&engine);
    let xpub = ExtendedPublicKey::decode(&summary.xpub).unwrap();
    assert_eq!(address, xpub.derive_address_key(0, 0).unwrap().address());
    let overview = engine.get_accounts_overview().unwrap();
    let account = &overview.coin_types.iter().find(|c| c.index == TESTNET).unwrap().accounts[0];
    assert_eq!(account.next_receive_index, 1);

    let mut funded: HashMap<OutPoint, u64> = HashMap::new();
    for value in [5_000, 3_000, 2_000] {
        funded.insert(mock.fund(&address, value), value);
    }
    assert_eq!(engine.get_account_balance(TESTNET, 0).unwrap().confirmed, 10_000);

    let destination = foreign_address();
    let total = engine
        .send_transaction(TESTNET, 0, &destination.to_string(), 4_000, 1, PASSWORD)
        .unwrap();

    // The relayed transaction matches what the engine reports.
    let sent = mock.broadcasts();
    assert_eq!(sent.len(), 1);
    let tx = &sent[0];
    let value_in: u64 = tx.inputs.iter().map(|i| funded[&i.previous_output]).sum();
    let fee = value_in - tx.output_value().unwrap();
    assert_eq!(total, 4_000 + fee);
    assert!(fee >= 192, "fee {fee} below one-input minimum");
    assert_eq!(tx.outputs[0].value, 4_000);
    assert_eq!(tx.outputs[0].script_pubkey, destination.script_pubkey());

    // Spent outputs are gone from the cached set.
    let cached: HashSet<OutPoint> = engine.cached_utxos(TESTNET, 0).unwrap().iter().map(|u| u.outpoint).collect();
    for input in &tx.inputs {
        assert!(!cached.contains(&input.previous_output));
    }

    let balance = engine.get_account_balance(TESTNET, 0).unwrap();
    assert_eq!(balance.total(), 10_000 - total);

    let history = engine.get_simple_transactions(TESTNET, 0).unwrap();
    let incoming: Vec<_> = history.iter().filter(|t| t.direction == Direction::Incoming).collect();
    let outgoing: Vec<_> = history.iter().filter(|t| t.direction == Direction::Outgoing).collect();
    assert_eq!(incoming.len(), 3);
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].value, 4_000);
    assert_eq!(outgoing[0].fee, fee);
    assert!(!outgoing[0].confirmed);
    // Unconfirmed first.
    assert_eq!(history[0].txid, tx.txid());
}

#[test]
fn e2e_change_goes_to_change_chain() {
    let (engine, mock, _dir) = restored_engine();
    let address = receive_address(&engine);
    mock.fund(&address, 50_000);

    let total = engine
        .send_transaction(TESTNET, 0, &foreign_address().to_string(), 10_000, 2, PASSWORD)
        .unwrap();
    assert_eq!(total, 10_000 + 226 * 2);

    let tx = &mock.broadcasts()[0];
    assert_eq!(tx.outputs.len(), 2);
    let change = engine
        .cached_utxos(TESTNET, 0)
        .unwrap()
        .into_iter()
        .find(|u| u.chain == 1)
        .expect("change output tracked");
    assert_eq!(change.index, 0);
    assert_eq!(change.value, 50_000 - total);
    assert!(!change.confirmed);

    let overview = engine.get_accounts_overview().unwrap();
    let account = &overview.coin_types.iter().find(|c| c.index == TESTNET).unwrap().accounts[0];
    assert_eq!(account.next_change_index, 1);
}

#[test]
fn e2e_state_survives_reload() {
    let (engine, mock, dir) = restored_engine();
    let first = receive_address(&engine);
    mock.fund(&first, 20_000);
    engine
        .send_transaction(TESTNET, 0, &foreign_address().to_string(), 5_000, 1, PASSWORD)
        .unwrap();

    let providers = satchel_wallet::ProviderSet::new().with(Network::Testnet, mock.clone());
    let reopened = WalletEngine::new(test_config(&dir), providers);
    reopened.load_master_key(PASSWORD).unwrap();
    let overview = reopened.get_accounts_overview().unwrap();
    let account = &overview.coin_types.iter().find(|c| c.index == TESTNET).unwrap().accounts[0];
    assert_eq!(account.next_receive_index, 1);
    assert_eq!(account.next_change_index, 1);

    // Allocation continues after the last handed-out index.
    let second = reopened.get_new_receive_address(TESTNET, 0, PASSWORD).unwrap();
    assert_ne!(first, second);
}

// ======================================================================
// Failure paths
// ======================================================================

#[test]
fn e2e_rejected_broadcast_changes_nothing() {
    let (engine, mock, _dir) = restored_engine();
    let address = receive_address(&engine);
    mock.fund(&address, 5_000);
    mock.fund(&address, 3_000);

    mock.fail_next_broadcast(ProviderError::Rejected("min relay fee not met".into()));
    let err = engine
        .send_transaction(TESTNET, 0, &foreign_address().to_string(), 4_000, 1, PASSWORD)
        .unwrap_err();
    assert!(matches!(err, WalletError::SendTx(_)), "unexpected error: {err:?}");
    assert_eq!(err.kind(), "send_tx_error");

    assert!(mock.broadcasts().is_empty());
    assert_eq!(mock.utxos_of(&address).len(), 2);
    assert_eq!(engine.cached_utxos(TESTNET, 0).unwrap().len(), 2);
    let overview = engine.get_accounts_overview().unwrap();
    let account = &overview.coin_types.iter().find(|c| c.index == TESTNET).unwrap().accounts[0];
    assert_eq!(account.next_change_index, 0);

    // The same funds are still spendable.
    engine
        .send_transaction(TESTNET, 0, &foreign_address().to_string(), 4_000, 1, PASSWORD)
        .unwrap();
    assert_eq!(mock.broadcasts().len(), 1);
}

#[test]
fn e2e_insufficient_balance_reports_amounts() {
    let (engine, mock, _dir) = restored_engine();
    let address = receive_address(&engine);
    mock.fund(&address, 1_000);

    let err = engine
        .send_transaction(TESTNET, 0, &foreign_address().to_string(), 1_000, 1, PASSWORD)
        .unwrap_err();
    match err {
        WalletError::BalanceInsufficient { have, need } => {
            assert_eq!(have, 1_000);
            assert!(need > 1_000);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(mock.broadcasts().is_empty());
}

#[test]
fn e2e_send_rejects_bad_input() {
    let (engine, _mock, _dir) = restored_engine();
    let mainnet = "1BoatSLRHtKNngkdXEeobR76b53LETtpyT";
    assert!(matches!(
        engine.send_transaction(TESTNET, 0, mainnet, 1_000, 1, PASSWORD),
        Err(WalletError::InvalidAddress(_))
    ));

    let to = foreign_address().to_string();
    assert!(matches!(
        engine.send_transaction(TESTNET, 0, &to, 0, 1, PASSWORD),
        Err(WalletError::InvalidAmount(_))
    ));
    assert!(matches!(
        engine.send_transaction(TESTNET, 0, &to, 1_000, 0, PASSWORD),
        Err(WalletError::InvalidAmount(_))
    ));
    assert!(matches!(
        engine.send_transaction(TESTNET, 0, &to, 1_000, 1, "wrong"),
        Err(WalletError::WrongPassword)
    ));
    assert!(matches!(
        engine.send_transaction(TESTNET, 7, &to, 1_000, 1, PASSWORD),
        Err(WalletError::UnknownAccount { .. })
    ));
}

#[test]
fn e2e_transient_reads_are_retried() {
    let (engine, mock, _dir) = restored_engine();
    let before = mock.read_calls();
    mock.fail_reads([ProviderError::Timeout, ProviderError::Unreachable("reset".into())]);

    let fees = engine.get_recommended_fees(TESTNET).unwrap();
    assert_eq!(fees.half_hour_fee, 12);
    assert_eq!(mock.read_calls() - before, 3);
}

#[test]
fn e2e_persistent_failure_surfaces_as_network_error() {
    let (engine, mock, _dir) = restored_engine();
    mock.fail_reads([ProviderError::Timeout, ProviderError::Timeout, ProviderError::Timeout]);
    let err = engine.get_recommended_fees(TESTNET).unwrap_err();
    assert!(matches!(err, WalletError::Network(_)), "unexpected error: {err:?}");

    // Permanent errors are not retried.
    let before = mock.read_calls();
    mock.fail_reads([ProviderError::Http { status: 404, body: "not found".into() }]);
    assert!(engine.get_recommended_fees(TESTNET).is_err());
    assert_eq!(mock.read_calls() - before, 1);
}

// ======================================================================
// Address discovery
// ======================================================================

#[test]
fn e2e_usage_discovery_marks_addresses() {
    let (engine, mock, _dir) = restored_engine();
    let summary = engine.get_accounts_overview().unwrap();
    let xpub_str = &summary.coin_types.iter().find(|c| c.index == TESTNET).unwrap().accounts[0].xpub;
    let xpub = ExtendedPublicKey::decode(xpub_str).unwrap();

    // Someone paid index 2 out of band.
    let third = xpub.derive_address_key(0, 2).unwrap().address();
    mock.fund(&third, 7_000);

    let marked = engine.get_all_receive_addresses_marked(TESTNET, 0).unwrap();
    let indices: Vec<u32> = marked.iter().map(|m| m.index).collect();
    assert_eq!(indices, vec![2, 1, 0]);
    let used: Vec<bool> = marked.iter().map(|m| m.used).collect();
    assert_eq!(used, vec![true, false, false]);
    assert_eq!(marked[0].address, third);

    // The next address skips past the used one.
    let next = receive_address(&engine);
    assert_eq!(next, xpub.derive_address_key(0, 3).unwrap().address());
    assert_eq!(engine.get_account_balance(TESTNET, 0).unwrap().confirmed, 7_000);
}

#[test]
fn e2e_gap_limit_blocks_then_recovers() {
    let (engine, mock, _dir) = restored_engine();
    let handed: Vec<_> = (0..TEST_GAP_LIMIT).map(|_| receive_address(&engine)).collect();

    let err = engine.get_new_receive_address(TESTNET, 0, PASSWORD).unwrap_err();
    assert_eq!(err, WalletError::GapLimitReached(TEST_GAP_LIMIT));

    // Once one of them sees funds the window moves.
    mock.fund(&handed[0], 1_000);
    let fresh = receive_address(&engine);
    assert!(!handed.contains(&fresh));
}

// ======================================================================
// Concurrency
// ======================================================================

#[test]
fn e2e_concurrent_receive_addresses_are_unique() {
    let (engine, _mock, _dir) = restored_engine();
    let engine = Arc::new(engine);

    let handles: Vec<_> = (0..TEST_GAP_LIMIT)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.get_new_receive_address(TESTNET, 0, PASSWORD).unwrap())
        })
        .collect();
    let addresses: HashSet<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(addresses.len(), TEST_GAP_LIMIT as usize);
}

#[test]
fn e2e_concurrent_sends_never_double_spend() {
    let (engine, mock, _dir) = restored_engine();
    let address = receive_address(&engine);
    for value in [5_000, 3_000, 2_000] {
        mock.fund(&address, value);
    }
    let engine = Arc::new(engine);
    let to = foreign_address().to_string();

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let to = to.clone();
            thread::spawn(move || engine.send_transaction(TESTNET, 0, &to, 2_500, 1, PASSWORD))
        })
        .collect();
    let totals: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect();

    let sent = mock.broadcasts();
    assert_eq!(sent.len(), 2);
    let first: HashSet<OutPoint> = sent[0].inputs.iter().map(|i| i.previous_output).collect();
    assert!(sent[1].inputs.iter().all(|i| !first.contains(&i.previous_output)));

    let balance = engine.get_account_balance(TESTNET, 0).unwrap();
    assert_eq!(balance.total(), 10_000 - totals.iter().sum::<u64>());
}

#[test]
fn e2e_password_change_during_send_wins() {
    let (engine, mock, dir) = restored_engine();
    mock.fund(&receive_address(&engine), 10_000);
    let engine = Arc::new(engine);
    let gate = mock.pause_next_broadcast();

    let sender = {
        let engine = Arc::clone(&engine);
        let to = foreign_address().to_string();
        thread::spawn(move || engine.send_transaction(TESTNET, 0, &to, 4_000, 1, PASSWORD))
    };
    gate.wait_entered();
    engine.change_password(PASSWORD, "new password").unwrap();
    gate.release();

    // Relayed, but the old password may no longer write the file.
    let err = sender.join().unwrap().unwrap_err();
    assert!(matches!(err, WalletError::Io(_)), "{err:?}");
    assert_eq!(mock.broadcasts().len(), 1);
    assert_eq!(engine.get_account_balance(TESTNET, 0).unwrap().total(), 10_000 - 4_000 - 226);

    let providers = satchel_wallet::ProviderSet::new().with(Network::Testnet, mock.clone());
    let reopened = WalletEngine::new(test_config(&dir), providers);
    assert_eq!(reopened.load_master_key(PASSWORD).unwrap_err(), WalletError::WrongPassword);
    reopened.load_master_key("new password").unwrap();

    // A send started under the old password after the change is refused up front.
    assert_eq!(
        engine
            .send_transaction(TESTNET, 0, &foreign_address().to_string(), 1_000, 1, PASSWORD)
            .unwrap_err(),
        WalletError::WrongPassword
    );
    assert_eq!(mock.broadcasts().len(), 1);
}
