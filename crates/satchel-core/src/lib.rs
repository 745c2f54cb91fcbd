//! # satchel-core
//! Foundation types for the Satchel wallet: networks, P2PKH addresses,
//! BIP-32 key derivation, legacy transaction encoding and the chain
//! provider interface.

pub mod address;
pub mod bip32;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod script;
pub mod traits;
pub mod transaction;
pub mod types;
