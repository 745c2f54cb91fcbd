//! Retrying wrapper around a [`ChainProvider`].

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use satchel_core::address::Address;
use satchel_core::error::ProviderError;
use satchel_core::traits::ChainProvider;
use satchel_core::types::{AddressUtxo, FeeEstimates, HistoryTx, Txid};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Exponential backoff for transient provider failures.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first. 1 disables retries.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// No retries at all.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before attempt `attempt + 1`, doubling from `initial_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
        }
    }
}

/// Provider that retries idempotent reads on transient errors.
///
/// [`broadcast`](ChainProvider::broadcast) goes through exactly once: a
/// timed-out broadcast may still have reached the network.
pub struct RetryingProvider {
    inner: Arc<dyn ChainProvider>,
    policy: RetryPolicy,
}

impl RetryingProvider {
    pub fn new(inner: Arc<dyn ChainProvider>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn with_retry<T>(
        &self,
        op: &'static str,
        mut call: impl FnMut() -> Result<T, ProviderError>,
    ) -> Result<T, ProviderError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match call() {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    warn!(op, attempt, max_attempts, delay_ms = delay.as_millis() as u64, error = %e, "provider call failed, retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => {
                    warn!(op, attempt, error = %e, "provider call failed");
                    return Err(e);
                }
            }
        }
    }
}

impl ChainProvider for RetryingProvider {
    fn get_utxos(&self, address: &Address) -> Result<Vec<AddressUtxo>, ProviderError> {
        self.with_retry("get_utxos", || self.inner.get_utxos(address))
    }

    fn get_fee_estimates(&self) -> Result<FeeEstimates, ProviderError> {
        self.with_retry("get_fee_estimates", || self.inner.get_fee_estimates())
    }

    fn broadcast(&self, raw_tx: &str) -> Result<Txid, ProviderError> {
        self.inner.broadcast(raw_tx).inspect_err(|e| {
            warn!(error = %e, "broadcast failed");
        })
    }

    fn get_address_history(&self, address: &Address) -> Result<Vec<HistoryTx>, ProviderError> {
        self.with_retry("get_address_history", || self.inner.get_address_history(address))
    }

    fn is_used(&self, address: &Address) -> Result<bool, ProviderError> {
        self.with_retry("is_used", || self.inner.is_used(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use satchel_core::constants::Network;

    /// Fails with queued errors, then succeeds.
    struct Flaky {
        errors: Mutex<Vec<ProviderError>>,
        calls: Mutex<u32>,
    }

    impl Flaky {
        fn new(mut errors: Vec<ProviderError>) -> Self {
            errors.reverse();
            Self { errors: Mutex::new(errors), calls: Mutex::new(0) }
        }

        fn next(&self) -> Result<(), ProviderError> {
            *self.calls.lock() += 1;
            match self.errors.lock().pop() {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock()
        }
    }

    impl ChainProvider for Flaky {
        fn get_utxos(&self, _: &Address) -> Result<Vec<AddressUtxo>, ProviderError> {
            self.next().map(|_| Vec::new())
        }
        fn get_fee_estimates(&self) -> Result<FeeEstimates, ProviderError> {
            self.next().map(|_| FeeEstimates {
                fastest_fee: 5,
                half_hour_fee: 4,
                hour_fee: 3,
                economy_fee: 2,
                minimum_fee: 1,
            })
        }
        fn broadcast(&self, _: &str) -> Result<Txid, ProviderError> {
            self.next().map(|_| Txid([1; 32]))
        }
        fn get_address_history(&self, _: &Address) -> Result<Vec<HistoryTx>, ProviderError> {
            self.next().map(|_| Vec::new())
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    fn address() -> Address {
        Address::from_pubkey_hash([0; 20], Network::Testnet)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
        assert_eq!(policy.backoff(40), Duration::from_millis(350));
    }

    #[test]
    fn transient_errors_are_retried() {
        let inner = Arc::new(Flaky::new(vec![ProviderError::Timeout, ProviderError::Unreachable("x".into())]));
        let provider = RetryingProvider::new(inner.clone(), fast_policy(3));
        provider.get_utxos(&address()).unwrap();
        assert_eq!(inner.calls(), 3);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let inner = Arc::new(Flaky::new(vec![ProviderError::Timeout; 5]));
        let provider = RetryingProvider::new(inner.clone(), fast_policy(2));
        assert_eq!(provider.get_fee_estimates().unwrap_err(), ProviderError::Timeout);
        assert_eq!(inner.calls(), 2);
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let inner = Arc::new(Flaky::new(vec![ProviderError::Http { status: 400, body: "bad".into() }]));
        let provider = RetryingProvider::new(inner.clone(), fast_policy(5));
        assert!(provider.get_address_history(&address()).is_err());
        assert_eq!(inner.calls(), 1);
    }

    #[test]
    fn broadcast_is_never_retried() {
        let inner = Arc::new(Flaky::new(vec![ProviderError::Timeout]));
        let provider = RetryingProvider::new(inner.clone(), fast_policy(5));
        assert_eq!(provider.broadcast("00").unwrap_err(), ProviderError::Timeout);
        assert_eq!(inner.calls(), 1);
    }

    #[test]
    fn no_retry_policy_makes_one_call() {
        let inner = Arc::new(Flaky::new(vec![ProviderError::Timeout]));
        let provider = RetryingProvider::new(inner.clone(), RetryPolicy::none());
        assert!(provider.is_used(&address()).is_err());
        assert_eq!(inner.calls(), 1);
    }
}
