//! Wallet error types.

use satchel_core::error::{AddressError, KeyError, ProviderError, TransactionError};
use thiserror::Error;

/// Errors surfaced by wallet operations.
///
/// Each variant maps to a stable tag through [`WalletError::kind`], which is
/// what front ends match on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    /// Authentication tag mismatch while decrypting the wallet file.
    #[error("wrong password")]
    WrongPassword,

    /// Wallet file missing, unreadable or unwritable.
    #[error("I/O error: {0}")]
    Io(String),

    /// Wallet file decrypted or parsed into something invalid.
    #[error("corrupt wallet data: {0}")]
    CorruptData(String),

    /// Provider unreachable, timed out or answered with garbage.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed address or address for another network.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Account funds do not cover the amount plus fee.
    #[error("insufficient balance: have {have}, need {need}")]
    BalanceInsufficient {
        /// Spendable satoshis in the account.
        have: u64,
        /// Amount plus fee in satoshis.
        need: u64,
    },

    /// Paying the amount would take more inputs than allowed.
    #[error("payment needs {needed} inputs, maximum is {max}")]
    MaxInputCountExceeded {
        /// Inputs the smallest covering selection needs.
        needed: usize,
        /// Configured cap.
        max: usize,
    },

    /// The provider refused the signed transaction.
    #[error("broadcast failed: {0}")]
    SendTx(String),

    /// The transaction could not be constructed or signed.
    #[error("transaction build failed: {0}")]
    TxBuild(String),

    /// Invalid BIP-39 mnemonic phrase.
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    #[error("unknown coin type: {0}")]
    UnknownCoinType(u32),

    #[error("unknown account {account} for coin type {coin_type}")]
    UnknownAccount { coin_type: u32, account: u32 },

    /// Every address within the gap limit has been handed out unused.
    #[error("gap limit of {0} unused addresses reached")]
    GapLimitReached(u32),

    /// No wallet has been unlocked in this engine yet.
    #[error("wallet not loaded")]
    NotLoaded,

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Refused to overwrite an existing wallet file.
    #[error("wallet already exists: {0}")]
    AlreadyExists(String),

    #[error("key derivation: {0}")]
    KeyDerivation(String),

    #[error("serialization: {0}")]
    Serialization(String),
}

impl WalletError {
    /// Stable snake_case tag for front ends.
    ///
    /// A missing wallet and a wallet that has not been loaded both report
    /// `io_error`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::WrongPassword => "wrong_password_error",
            Self::Io(_) | Self::NotLoaded | Self::AlreadyExists(_) => "io_error",
            Self::CorruptData(_) | Self::Serialization(_) => "corrupt_data_error",
            Self::Network(_) => "network_error",
            Self::InvalidAddress(_) => "invalid_address_error",
            Self::BalanceInsufficient { .. } => "balance_insufficient_error",
            Self::MaxInputCountExceeded { .. } => "max_input_count_exceeded_error",
            Self::SendTx(_) => "send_tx_error",
            Self::TxBuild(_) | Self::KeyDerivation(_) => "create_tx_error",
            Self::InvalidMnemonic(_) => "invalid_mnemonic_error",
            Self::UnknownCoinType(_) | Self::UnknownAccount { .. } => "unknown_account_error",
            Self::GapLimitReached(_) => "gap_limit_error",
            Self::InvalidAmount(_) => "invalid_amount_error",
        }
    }
}

impl From<AddressError> for WalletError {
    fn from(e: AddressError) -> Self {
        Self::InvalidAddress(e.to_string())
    }
}

impl From<KeyError> for WalletError {
    fn from(e: KeyError) -> Self {
        Self::KeyDerivation(e.to_string())
    }
}

impl From<TransactionError> for WalletError {
    fn from(e: TransactionError) -> Self {
        Self::TxBuild(e.to_string())
    }
}

impl From<ProviderError> for WalletError {
    fn from(e: ProviderError) -> Self {
        Self::Network(e.to_string())
    }
}

impl From<std::io::Error> for WalletError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_balance_insufficient() {
        let e = WalletError::BalanceInsufficient { have: 100, need: 200 };
        assert_eq!(e.to_string(), "insufficient balance: have 100, need 200");
    }

    #[test]
    fn display_max_inputs() {
        let e = WalletError::MaxInputCountExceeded { needed: 646, max: 500 };
        assert_eq!(e.to_string(), "payment needs 646 inputs, maximum is 500");
    }

    #[test]
    fn kind_tags() {
        assert_eq!(WalletError::WrongPassword.kind(), "wrong_password_error");
        assert_eq!(WalletError::Io("gone".into()).kind(), "io_error");
        assert_eq!(WalletError::NotLoaded.kind(), "io_error");
        assert_eq!(WalletError::SendTx("rejected".into()).kind(), "send_tx_error");
        assert_eq!(WalletError::TxBuild("no inputs".into()).kind(), "create_tx_error");
        assert_eq!(
            WalletError::BalanceInsufficient { have: 0, need: 1 }.kind(),
            "balance_insufficient_error"
        );
    }

    #[test]
    fn clone_and_eq() {
        let e1 = WalletError::InvalidAmount("zero".into());
        let e2 = e1.clone();
        assert_eq!(e1, e2);
    }

    #[test]
    fn from_address_error() {
        let wallet: WalletError = AddressError::InvalidChecksum.into();
        assert_eq!(wallet, WalletError::InvalidAddress("invalid checksum".into()));
    }

    #[test]
    fn from_provider_error() {
        let wallet: WalletError = ProviderError::Timeout.into();
        assert_eq!(wallet.kind(), "network_error");
    }

    #[test]
    fn from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let wallet: WalletError = io.into();
        assert!(matches!(wallet, WalletError::Io(ref msg) if msg.contains("missing")));
    }
}
