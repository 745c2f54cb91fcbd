//! Criterion benchmarks for satchel-core hot paths.
//!
//! Covers: BIP-32 hardened and public derivation, P2PKH address encoding,
//! and legacy signature hashing.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use satchel_core::bip32::{ChildNumber, DerivationPath, ExtendedPrivateKey};
use satchel_core::constants::{Network, SEQUENCE_FINAL, SIGHASH_ALL};
use satchel_core::script::Script;
use satchel_core::transaction::{Transaction, TxIn, TxOut};
use satchel_core::types::{OutPoint, Txid};

const SEED: [u8; 32] = [0x42; 32];

fn sample_transaction(n_inputs: usize) -> Transaction {
    Transaction {
        version: 1,
        inputs: (0..n_inputs)
            .map(|i| TxIn {
                previous_output: OutPoint {
                    txid: Txid([i as u8; 32]),
                    vout: 0,
                },
                script_sig: Script::new(),
                sequence: SEQUENCE_FINAL,
            })
            .collect(),
        outputs: vec![
            TxOut { value: 50_000, script_pubkey: Script::new_p2pkh(&[0xCC; 20]) },
            TxOut { value: 25_000, script_pubkey: Script::new_p2pkh(&[0xDD; 20]) },
        ],
        lock_time: 0,
    }
}

fn bench_account_derivation(c: &mut Criterion) {
    let master = ExtendedPrivateKey::new_master(Network::Bitcoin, &SEED).unwrap();
    let path = DerivationPath::bip44_account(44, 0, 0).unwrap();
    c.bench_function("bip32_account_path", |b| {
        b.iter(|| master.derive_path(black_box(&path)).unwrap())
    });
}

fn bench_public_derivation(c: &mut Criterion) {
    let account = ExtendedPrivateKey::new_master(Network::Bitcoin, &SEED)
        .unwrap()
        .derive_path(&DerivationPath::bip44_account(44, 0, 0).unwrap())
        .unwrap()
        .to_extended_public();
    let chain = account.derive_child(ChildNumber::Normal(0)).unwrap();
    c.bench_function("bip32_ckdpub_address", |b| {
        b.iter(|| chain.derive_child(black_box(ChildNumber::Normal(7))).unwrap().address())
    });
}

fn bench_address_encode(c: &mut Criterion) {
    let account = ExtendedPrivateKey::new_master(Network::Bitcoin, &SEED).unwrap();
    let address = account.address();
    c.bench_function("p2pkh_address_encode", |b| b.iter(|| black_box(&address).encode()));
}

fn bench_signature_hash(c: &mut Criterion) {
    let tx = sample_transaction(50);
    let code = Script::new_p2pkh(&[0xAA; 20]);
    c.bench_function("sighash_50_inputs", |b| {
        b.iter(|| tx.signature_hash(black_box(25), &code, SIGHASH_ALL).unwrap())
    });
}

criterion_group!(
    benches,
    bench_account_derivation,
    bench_public_derivation,
    bench_address_encode,
    bench_signature_hash
);
criterion_main!(benches);
