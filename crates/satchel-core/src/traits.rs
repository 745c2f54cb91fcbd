//! Trait interfaces between the wallet engine and its collaborators.
//!
//! - [`ChainProvider`] — blockchain data, fee and broadcast service
//!   (satchel-esplora implements over HTTP; tests use in-memory mocks)

use crate::address::Address;
use crate::error::ProviderError;
use crate::types::{AddressUtxo, FeeEstimates, HistoryTx, Txid};

/// Read access to chain state for wallet addresses, plus transaction relay.
///
/// One provider serves one network. Calls block until the provider answers
/// or its own timeout elapses. Everything except [`broadcast`](Self::broadcast)
/// is idempotent and may be retried by callers.
pub trait ChainProvider: Send + Sync {
    /// Unspent outputs currently paying `address`, confirmed or not.
    fn get_utxos(&self, address: &Address) -> Result<Vec<AddressUtxo>, ProviderError>;

    /// Recommended fee rates in sat/vB.
    fn get_fee_estimates(&self) -> Result<FeeEstimates, ProviderError>;

    /// Submit a hex-encoded raw transaction. Returns the txid the provider accepted.
    fn broadcast(&self, raw_tx: &str) -> Result<Txid, ProviderError>;

    /// Every transaction that spends from or pays to `address`.
    fn get_address_history(&self, address: &Address) -> Result<Vec<HistoryTx>, ProviderError>;

    /// Whether `address` has any on-chain history.
    ///
    /// Default implementation delegates to
    /// [`get_address_history`](Self::get_address_history).
    fn is_used(&self, address: &Address) -> Result<bool, ProviderError> {
        Ok(!self.get_address_history(address)?.is_empty())
    }
}
