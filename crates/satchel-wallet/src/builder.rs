//! P2PKH transaction construction and signing.
//!
//! 1. Add recipients (address + amount)
//! 2. Build an unsigned transaction from a [`CoinSelection`]
//! 3. Sign every input with the key of the address it spends from, then
//!    verify each signature before the transaction leaves the wallet

use satchel_core::address::Address;
use satchel_core::constants::{Network, SEQUENCE_FINAL, SIGHASH_ALL};
use satchel_core::crypto::hash160;
use satchel_core::error::TransactionError;
use satchel_core::script::Script;
use satchel_core::transaction::{Transaction, TxIn, TxOut};
use satchel_core::types::{OutPoint, Txid};
use secp256k1::ecdsa::Signature;
use secp256k1::{Message, PublicKey, SECP256K1, SecretKey};

use crate::coin_selection::CoinSelection;
use crate::error::WalletError;
use crate::tracker::OwnedUtxo;

/// Transaction version used for every wallet transaction.
pub const TX_VERSION: i32 = 1;

/// A payment destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub address: Address,
    /// Amount in satoshis.
    pub amount: u64,
}

/// A transaction with empty scriptSigs, ready for signing.
#[derive(Debug, Clone)]
pub struct UnsignedTransaction {
    pub tx: Transaction,
    /// Spent outputs, parallel to `tx.inputs`.
    pub inputs: Vec<OwnedUtxo>,
    pub fee: u64,
    /// Sum paid to recipients.
    pub amount: u64,
    pub change: Option<(Address, u64)>,
}

/// A fully signed and verified transaction.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub tx: Transaction,
    pub txid: Txid,
    /// Consensus serialization, hex-encoded for broadcast.
    pub raw_hex: String,
    pub fee: u64,
    pub amount: u64,
    pub change: Option<(Address, u64)>,
    pub spent: Vec<OutPoint>,
}

impl SignedTransaction {
    /// Amount leaving the account: payments plus fee.
    pub fn total_sent(&self) -> u64 {
        self.amount.saturating_add(self.fee)
    }
}

/// Builder for wallet payments.
///
/// # Example
/// ```ignore
/// let mut builder = TransactionBuilder::new(Network::Testnet);
/// builder.add_recipient(address, 4_000)?;
/// let unsigned = builder.build(&selection, Some(&change_address))?;
/// let signed = TransactionBuilder::sign(unsigned, |utxo| key_for(utxo))?;
/// ```
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    network: Network,
    recipients: Vec<Recipient>,
    lock_time: u32,
}

impl TransactionBuilder {
    pub fn new(network: Network) -> Self {
        Self {
            network,
            recipients: Vec::new(),
            lock_time: 0,
        }
    }

    /// Add a payment. The address must belong to the builder's network.
    pub fn add_recipient(&mut self, address: Address, amount: u64) -> Result<&mut Self, WalletError> {
        if address.network() != self.network {
            return Err(WalletError::InvalidAddress(format!(
                "{address} is not a {} address",
                self.network
            )));
        }
        if amount == 0 {
            return Err(WalletError::InvalidAmount("recipient amount is zero".into()));
        }
        self.recipients.push(Recipient { address, amount });
        Ok(self)
    }

    pub fn set_lock_time(&mut self, lock_time: u32) -> &mut Self {
        self.lock_time = lock_time;
        self
    }

    /// Sum of all recipient amounts.
    pub fn total_amount(&self) -> Result<u64, WalletError> {
        self.recipients.iter().try_fold(0u64, |acc, r| {
            acc.checked_add(r.amount)
                .ok_or_else(|| WalletError::InvalidAmount("total amount overflow".into()))
        })
    }

    /// Assemble inputs and outputs from a selection.
    ///
    /// Change, when the selection has any, goes to `change_address` as the
    /// last output.
    pub fn build(
        &self,
        selection: &CoinSelection,
        change_address: Option<&Address>,
    ) -> Result<UnsignedTransaction, WalletError> {
        if self.recipients.is_empty() {
            return Err(WalletError::TxBuild("no recipients".into()));
        }
        if selection.selected.is_empty() {
            return Err(WalletError::TxBuild("no inputs selected".into()));
        }
        let amount = self.total_amount()?;
        let spent_total = amount
            .checked_add(selection.fee)
            .and_then(|v| v.checked_add(selection.change.unwrap_or(0)))
            .ok_or(TransactionError::ValueOverflow)?;
        if spent_total != selection.total {
            return Err(WalletError::TxBuild(format!(
                "selection total {} does not match outputs plus fee {spent_total}",
                selection.total
            )));
        }

        let inputs = selection
            .selected
            .iter()
            .map(|utxo| TxIn {
                previous_output: utxo.outpoint,
                script_sig: Script::new(),
                sequence: SEQUENCE_FINAL,
            })
            .collect();

        let mut outputs: Vec<TxOut> = self
            .recipients
            .iter()
            .map(|r| TxOut { value: r.amount, script_pubkey: r.address.script_pubkey() })
            .collect();

        let change = match (selection.change, change_address) {
            (Some(value), Some(address)) => {
                outputs.push(TxOut { value, script_pubkey: address.script_pubkey() });
                Some((*address, value))
            }
            (Some(_), None) => return Err(WalletError::TxBuild("change without a change address".into())),
            (None, _) => None,
        };

        Ok(UnsignedTransaction {
            tx: Transaction {
                version: TX_VERSION,
                inputs,
                outputs,
                lock_time: self.lock_time,
            },
            inputs: selection.selected.clone(),
            fee: selection.fee,
            amount,
            change,
        })
    }

    /// Sign every input with the key `key_for` returns for its spent output,
    /// then verify all signatures.
    pub fn sign<F>(unsigned: UnsignedTransaction, mut key_for: F) -> Result<SignedTransaction, WalletError>
    where
        F: FnMut(&OwnedUtxo) -> Result<SecretKey, WalletError>,
    {
        let mut tx = unsigned.tx;
        for (i, utxo) in unsigned.inputs.iter().enumerate() {
            let secret_key = key_for(utxo)?;
            let public_key = PublicKey::from_secret_key(SECP256K1, &secret_key);
            if hash160(&public_key.serialize()) != *utxo.address.pubkey_hash() {
                return Err(WalletError::TxBuild(format!(
                    "signing key does not match {} for input {i}",
                    utxo.address
                )));
            }
            sign_input(&mut tx, i, &secret_key)?;
        }
        for (i, utxo) in unsigned.inputs.iter().enumerate() {
            verify_input(&tx, i, &utxo.address.script_pubkey())?;
        }

        Ok(SignedTransaction {
            txid: tx.txid(),
            raw_hex: tx.to_hex(),
            spent: unsigned.inputs.iter().map(|u| u.outpoint).collect(),
            tx,
            fee: unsigned.fee,
            amount: unsigned.amount,
            change: unsigned.change,
        })
    }
}

/// Sign input `index` as a P2PKH spend by `secret_key` with SIGHASH_ALL.
///
/// ECDSA nonces follow RFC 6979 and signatures are low-S normalized, so the
/// result is deterministic.
pub fn sign_input(tx: &mut Transaction, index: usize, secret_key: &SecretKey) -> Result<(), WalletError> {
    let public_key = PublicKey::from_secret_key(SECP256K1, secret_key).serialize();
    let script_code = Script::new_p2pkh(&hash160(&public_key));
    let digest = tx.signature_hash(index, &script_code, SIGHASH_ALL)?;

    let signature = SECP256K1.sign_ecdsa(&Message::from_digest(digest), secret_key);
    let mut sig_bytes = signature.serialize_der().to_vec();
    sig_bytes.push(SIGHASH_ALL as u8);

    tx.inputs[index].script_sig = Script::new_p2pkh_sig(&sig_bytes, &public_key);
    Ok(())
}

/// Check that input `index` validly spends a P2PKH output locked by
/// `script_pubkey`.
pub fn verify_input(tx: &Transaction, index: usize, script_pubkey: &Script) -> Result<(), WalletError> {
    let invalid = || WalletError::from(TransactionError::InvalidSignature(index));
    let input = tx.inputs.get(index).ok_or(TransactionError::InputIndexOutOfBounds {
        index,
        len: tx.inputs.len(),
    })?;
    let (sig_bytes, pubkey_bytes) = split_p2pkh_sig(input.script_sig.as_bytes()).ok_or_else(invalid)?;
    let expected_hash = script_pubkey.p2pkh_hash().ok_or_else(invalid)?;
    if hash160(pubkey_bytes) != expected_hash {
        return Err(invalid());
    }
    let (&sighash_type, der) = sig_bytes.split_last().ok_or_else(invalid)?;
    if u32::from(sighash_type) != SIGHASH_ALL {
        return Err(invalid());
    }

    let signature = Signature::from_der(der).map_err(|_| invalid())?;
    let public_key = PublicKey::from_slice(pubkey_bytes).map_err(|_| invalid())?;
    let digest = tx.signature_hash(index, script_pubkey, SIGHASH_ALL)?;
    SECP256K1
        .verify_ecdsa(&Message::from_digest(digest), &signature, &public_key)
        .map_err(|_| invalid())
}

/// Split `<sig> <pubkey>` into its two direct pushes.
fn split_p2pkh_sig(script: &[u8]) -> Option<(&[u8], &[u8])> {
    let (&sig_len, rest) = script.split_first()?;
    let sig_len = usize::from(sig_len);
    if sig_len == 0 || sig_len > 75 || rest.len() <= sig_len {
        return None;
    }
    let (sig, rest) = rest.split_at(sig_len);
    let (&pk_len, pk) = rest.split_first()?;
    (usize::from(pk_len) == pk.len() && matches!(pk.len(), 33 | 65)).then_some((sig, pk))
}

#[cfg(test)]
mod tests {
    use super::*;
    use satchel_core::types::Txid;

    const SECRET: &str = "786dddc837161fdf8e36eba9537d944a210e8616a564592053ad0405a7cc20b1";
    const PREV_TXID: &str = "d8cb1a81c683dde549e474566345c4d74f649e6dad642aab7d5fcee5d4583e5a";
    const OWN_HASH: &str = "6bd18c889da9d66610354ccdc4676f055bae2980";
    const DEST_HASH: &str = "fd158402792612f4d87a9f5f37e14a584e364a65";
    const SIGNED_HEX: &str = "01000000015a3e58d4e5ce5f7dab2a64ad6d9e644fd7c445635674e449e5dd83c6811acbd8000000006b48304502210082d5afc04466b7566bcc44a4670980393edbfa88d0daf02c163372fdcb5a1dc902203aa732322fd0cfca0d7fef4889779471d832dc0fa73ff5518a30f92054b02d51012103597f57b176a4fd0bbf9b163ad341ed002101572b595485c537c3673281a83ebcffffffff02e8030000000000001976a914fd158402792612f4d87a9f5f37e14a584e364a6588ac60220000000000001976a9146bd18c889da9d66610354ccdc4676f055bae298088ac00000000";

    fn hash20(s: &str) -> [u8; 20] {
        hex::decode(s).unwrap().try_into().unwrap()
    }

    fn secret() -> SecretKey {
        SecretKey::from_slice(&hex::decode(SECRET).unwrap()).unwrap()
    }

    fn own_address() -> Address {
        Address::from_pubkey_hash(hash20(OWN_HASH), Network::Testnet)
    }

    fn own_utxo(txid: Txid, vout: u32, value: u64) -> OwnedUtxo {
        OwnedUtxo {
            outpoint: OutPoint { txid, vout },
            value,
            address: own_address(),
            chain: 0,
            index: 0,
            confirmed: true,
            block_height: Some(1),
        }
    }

    fn vector_unsigned() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxIn {
                previous_output: OutPoint { txid: PREV_TXID.parse().unwrap(), vout: 0 },
                script_sig: Script::new(),
                sequence: SEQUENCE_FINAL,
            }],
            outputs: vec![
                TxOut { value: 1_000, script_pubkey: Script::new_p2pkh(&hash20(DEST_HASH)) },
                TxOut { value: 8_800, script_pubkey: Script::new_p2pkh(&hash20(OWN_HASH)) },
            ],
            lock_time: 0,
        }
    }

    #[test]
    fn signs_known_vector() {
        let mut tx = vector_unsigned();
        sign_input(&mut tx, 0, &secret()).unwrap();
        assert_eq!(tx.to_hex(), SIGNED_HEX);
        verify_input(&tx, 0, &own_address().script_pubkey()).unwrap();
    }

    #[test]
    fn signing_is_deterministic() {
        let mut a = vector_unsigned();
        let mut b = vector_unsigned();
        sign_input(&mut a, 0, &secret()).unwrap();
        sign_input(&mut b, 0, &secret()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn tampered_output_fails_verification() {
        let mut tx = vector_unsigned();
        sign_input(&mut tx, 0, &secret()).unwrap();
        tx.outputs[0].value += 1;
        assert_eq!(
            verify_input(&tx, 0, &own_address().script_pubkey()).unwrap_err(),
            WalletError::TxBuild("signature verification failed on input 0".into())
        );
    }

    #[test]
    fn wrong_prevout_script_fails_verification() {
        let mut tx = vector_unsigned();
        sign_input(&mut tx, 0, &secret()).unwrap();
        let other = Script::new_p2pkh(&hash20(DEST_HASH));
        assert!(verify_input(&tx, 0, &other).is_err());
    }

    #[test]
    fn unsigned_input_fails_verification() {
        let tx = vector_unsigned();
        assert!(verify_input(&tx, 0, &own_address().script_pubkey()).is_err());
        assert!(verify_input(&tx, 3, &own_address().script_pubkey()).is_err());
    }

    #[test]
    fn build_and_sign_with_change() {
        let prev: Txid = PREV_TXID.parse().unwrap();
        let selection = CoinSelection {
            selected: vec![own_utxo(prev, 0, 10_000)],
            total: 10_000,
            fee: 226,
            change: Some(5_774),
        };
        let dest = Address::from_pubkey_hash(hash20(DEST_HASH), Network::Testnet);
        let change_addr = own_address();

        let mut builder = TransactionBuilder::new(Network::Testnet);
        builder.add_recipient(dest, 4_000).unwrap();
        let unsigned = builder.build(&selection, Some(&change_addr)).unwrap();
        assert_eq!(unsigned.tx.outputs.len(), 2);
        assert_eq!(unsigned.tx.outputs[1].value, 5_774);
        assert_eq!(unsigned.tx.inputs[0].sequence, SEQUENCE_FINAL);

        let signed = TransactionBuilder::sign(unsigned, |_| Ok(secret())).unwrap();
        assert_eq!(signed.total_sent(), 4_226);
        assert_eq!(signed.spent, vec![OutPoint { txid: prev, vout: 0 }]);
        assert_eq!(signed.txid, signed.tx.txid());
        assert_eq!(Transaction::from_hex(&signed.raw_hex).unwrap(), signed.tx);
        // Estimated size is an upper bound of the signed size.
        assert!(signed.raw_hex.len() as u64 / 2 <= signed.tx.estimated_size());
    }

    #[test]
    fn build_without_change() {
        let selection = CoinSelection {
            selected: vec![own_utxo(Txid([3; 32]), 1, 4_200)],
            total: 4_200,
            fee: 200,
            change: None,
        };
        let mut builder = TransactionBuilder::new(Network::Testnet);
        builder
            .add_recipient(Address::from_pubkey_hash([9; 20], Network::Testnet), 4_000)
            .unwrap();
        let unsigned = builder.build(&selection, None).unwrap();
        assert_eq!(unsigned.tx.outputs.len(), 1);
        assert!(unsigned.change.is_none());
    }

    #[test]
    fn build_rejects_inconsistent_selection() {
        let selection = CoinSelection {
            selected: vec![own_utxo(Txid([3; 32]), 1, 4_200)],
            total: 4_200,
            fee: 100,
            change: None,
        };
        let mut builder = TransactionBuilder::new(Network::Testnet);
        builder
            .add_recipient(Address::from_pubkey_hash([9; 20], Network::Testnet), 4_000)
            .unwrap();
        assert!(matches!(builder.build(&selection, None), Err(WalletError::TxBuild(_))));
    }

    #[test]
    fn build_requires_change_address() {
        let selection = CoinSelection {
            selected: vec![own_utxo(Txid([3; 32]), 1, 10_000)],
            total: 10_000,
            fee: 226,
            change: Some(5_774),
        };
        let mut builder = TransactionBuilder::new(Network::Testnet);
        builder
            .add_recipient(Address::from_pubkey_hash([9; 20], Network::Testnet), 4_000)
            .unwrap();
        assert!(matches!(builder.build(&selection, None), Err(WalletError::TxBuild(_))));
    }

    #[test]
    fn build_no_recipients_fails() {
        let selection = CoinSelection { selected: vec![], total: 0, fee: 0, change: None };
        let builder = TransactionBuilder::new(Network::Testnet);
        assert_eq!(
            builder.build(&selection, None).unwrap_err(),
            WalletError::TxBuild("no recipients".into())
        );
    }

    #[test]
    fn recipient_network_and_amount_checked() {
        let mut builder = TransactionBuilder::new(Network::Testnet);
        let mainnet = Address::from_pubkey_hash([9; 20], Network::Bitcoin);
        assert!(matches!(builder.add_recipient(mainnet, 1_000), Err(WalletError::InvalidAddress(_))));
        let testnet = Address::from_pubkey_hash([9; 20], Network::Testnet);
        assert!(matches!(builder.add_recipient(testnet, 0), Err(WalletError::InvalidAmount(_))));
    }

    #[test]
    fn sign_rejects_foreign_key() {
        let selection = CoinSelection {
            selected: vec![own_utxo(Txid([3; 32]), 0, 5_000)],
            total: 5_000,
            fee: 1_000,
            change: None,
        };
        let mut builder = TransactionBuilder::new(Network::Testnet);
        builder
            .add_recipient(Address::from_pubkey_hash([9; 20], Network::Testnet), 4_000)
            .unwrap();
        let unsigned = builder.build(&selection, None).unwrap();
        let other = SecretKey::from_slice(&[0x11; 32]).unwrap();
        assert!(matches!(
            TransactionBuilder::sign(unsigned, |_| Ok(other)),
            Err(WalletError::TxBuild(_))
        ));
    }
}
