//! Random-Improve coin selection.
//!
//! 1. **Random phase**: draw unspent outputs uniformly at random until they
//!    cover `target + fee` for a transaction with a change output. If that
//!    takes more than `max_inputs` draws, fall back to largest-first, which
//!    also tries the cheaper shape without change before giving up on the
//!    input cap.
//! 2. **Improve phase**: walk the remaining outputs in random order and add
//!    one whenever it brings the total strictly closer to twice the payment
//!    (`ideal`) without passing three times the payment (`upper`) or the
//!    input cap. Equal distance keeps the smaller input set.
//! 3. **Finalize**: recompute the fee for the final input count. Change
//!    below the dust threshold is not worth an output and goes to the fee.
//!
//! Fees follow the P2PKH size estimate in
//! [`satchel_core::transaction::estimate_size`], multiplied by the fee rate
//! in sat/vB.

use rand::Rng;
use rand::seq::SliceRandom;
use satchel_core::constants::{DUST_THRESHOLD, MAX_INPUTS};
use satchel_core::transaction::estimate_size;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::WalletError;
use crate::tracker::OwnedUtxo;

/// Limits applied to every selection.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectionPolicy {
    /// Maximum inputs in one transaction.
    pub max_inputs: usize,
    /// Smallest change worth its own output.
    pub dust_threshold: u64,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self { max_inputs: MAX_INPUTS, dust_threshold: DUST_THRESHOLD }
    }
}

/// Result of coin selection: which outputs to spend and the fee/change split.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoinSelection {
    /// Outputs to spend, in selection order.
    pub selected: Vec<OwnedUtxo>,
    /// Sum of the selected values.
    pub total: u64,
    /// Transaction fee, including any donated dust.
    pub fee: u64,
    /// Change to return to the wallet, if worth an output.
    pub change: Option<u64>,
}

impl CoinSelection {
    /// Number of outputs the transaction needs (payment plus optional change).
    pub fn output_count(&self) -> usize {
        1 + usize::from(self.change.is_some())
    }
}

/// Fee for a P2PKH transaction of the given shape at `fee_rate` sat/vB.
pub fn fee_for(n_inputs: usize, n_outputs: usize, fee_rate: u64) -> u64 {
    estimate_size(n_inputs, n_outputs).saturating_mul(fee_rate)
}

/// Coin selector bound to a policy.
#[derive(Clone, Copy, Debug, Default)]
pub struct CoinSelector {
    policy: SelectionPolicy,
}

impl CoinSelector {
    pub fn new(policy: SelectionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &SelectionPolicy {
        &self.policy
    }

    /// Random-Improve selection for paying `target` at `fee_rate` sat/vB.
    ///
    /// # Errors
    /// - [`WalletError::InvalidAmount`] for a zero target
    /// - [`WalletError::BalanceInsufficient`] when all outputs together
    ///   cannot pay target plus fee
    /// - [`WalletError::MaxInputCountExceeded`] when even largest-first needs
    ///   more than `max_inputs` inputs
    pub fn select_random_improve<R: Rng + ?Sized>(
        &self,
        utxos: &[OwnedUtxo],
        target: u64,
        fee_rate: u64,
        rng: &mut R,
    ) -> Result<CoinSelection, WalletError> {
        validate_target(target)?;

        let mut order: Vec<usize> = (0..utxos.len()).collect();
        order.shuffle(rng);

        let drawn = self.draw(utxos, &order, target, fee_rate, 2);
        let (mut selected, mut total) = if drawn.0.len() > self.policy.max_inputs {
            debug!(inputs = drawn.0.len(), "random draw over input cap, using largest-first");
            let chosen = self.largest_first_indices(utxos, target, fee_rate)?;
            let total = sum(utxos, &chosen);
            (chosen, total)
        } else {
            drawn
        };

        // Remaining candidates in random order.
        let mut remaining: Vec<usize> = order.into_iter().filter(|i| !selected.contains(i)).collect();
        remaining.shuffle(rng);

        for candidate in remaining {
            let n = selected.len();
            if n >= self.policy.max_inputs {
                break;
            }
            let needed = target.saturating_add(fee_for(n + 1, 2, fee_rate));
            let ideal = needed.saturating_mul(2);
            let upper = needed.saturating_mul(3);
            let new_total = total.saturating_add(utxos[candidate].value);
            if new_total >= needed
                && new_total <= upper
                && new_total.abs_diff(ideal) < total.abs_diff(ideal)
            {
                selected.push(candidate);
                total = new_total;
            }
        }

        self.finalize(utxos, selected, target, fee_rate)
    }

    /// Deterministic largest-first selection.
    pub fn select_largest_first(
        &self,
        utxos: &[OwnedUtxo],
        target: u64,
        fee_rate: u64,
    ) -> Result<CoinSelection, WalletError> {
        validate_target(target)?;
        let chosen = self.largest_first_indices(utxos, target, fee_rate)?;
        self.finalize(utxos, chosen, target, fee_rate)
    }

    /// Take outputs in `order` until they cover `target + fee(n, outputs)`.
    fn draw(
        &self,
        utxos: &[OwnedUtxo],
        order: &[usize],
        target: u64,
        fee_rate: u64,
        outputs: usize,
    ) -> (Vec<usize>, u64) {
        let mut selected = Vec::new();
        let mut total = 0u64;
        for &i in order {
            if total >= target.saturating_add(fee_for(selected.len(), outputs, fee_rate)) {
                break;
            }
            selected.push(i);
            total = total.saturating_add(utxos[i].value);
        }
        (selected, total)
    }

    fn largest_first_indices(
        &self,
        utxos: &[OwnedUtxo],
        target: u64,
        fee_rate: u64,
    ) -> Result<Vec<usize>, WalletError> {
        let mut order: Vec<usize> = (0..utxos.len()).collect();
        order.sort_by(|&a, &b| utxos[b].value.cmp(&utxos[a].value));
        let (chosen, total) = self.draw(utxos, &order, target, fee_rate, 2);
        if chosen.len() <= self.policy.max_inputs
            && total >= target.saturating_add(fee_for(chosen.len(), 1, fee_rate))
        {
            return Ok(chosen);
        }

        // Dropping the change output may fit under the cap.
        let (chosen, total) = self.draw(utxos, &order, target, fee_rate, 1);
        let need = target.saturating_add(fee_for(chosen.len(), 1, fee_rate));
        if total < need {
            return Err(WalletError::BalanceInsufficient { have: total, need });
        }
        if chosen.len() > self.policy.max_inputs {
            return Err(WalletError::MaxInputCountExceeded {
                needed: chosen.len(),
                max: self.policy.max_inputs,
            });
        }
        Ok(chosen)
    }

    fn finalize(
        &self,
        utxos: &[OwnedUtxo],
        chosen: Vec<usize>,
        target: u64,
        fee_rate: u64,
    ) -> Result<CoinSelection, WalletError> {
        let n = chosen.len();
        let total = sum(utxos, &chosen);

        let fee_with_change = fee_for(n, 2, fee_rate);
        let fee_without_change = fee_for(n, 1, fee_rate);
        let (fee, change) = match total.checked_sub(target.saturating_add(fee_with_change)) {
            Some(change) if change >= self.policy.dust_threshold => (fee_with_change, Some(change)),
            _ => {
                let need = target.saturating_add(fee_without_change);
                if total < need {
                    return Err(WalletError::BalanceInsufficient { have: total, need });
                }
                // Sub-dust remainder is donated to the fee.
                (total - target, None)
            }
        };

        debug!(inputs = n, total, fee, change = ?change, "coins selected");
        Ok(CoinSelection {
            selected: chosen.into_iter().map(|i| utxos[i].clone()).collect(),
            total,
            fee,
            change,
        })
    }
}

fn validate_target(target: u64) -> Result<(), WalletError> {
    if target == 0 {
        return Err(WalletError::InvalidAmount("target must be non-zero".into()));
    }
    Ok(())
}

fn sum(utxos: &[OwnedUtxo], indices: &[usize]) -> u64 {
    indices.iter().fold(0u64, |acc, &i| acc.saturating_add(utxos[i].value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use satchel_core::address::Address;
    use satchel_core::constants::Network;
    use satchel_core::types::{OutPoint, Txid};

    fn make_utxos(values: &[u64]) -> Vec<OwnedUtxo> {
        values
            .iter()
            .enumerate()
            .map(|(i, &value)| OwnedUtxo {
                outpoint: OutPoint { txid: Txid([i as u8; 32]), vout: i as u32 },
                value,
                address: Address::from_pubkey_hash([1; 20], Network::Testnet),
                chain: 0,
                index: i as u32,
                confirmed: true,
                block_height: Some(100),
            })
            .collect()
    }

    fn rng(seed: u64) -> StdRng {
        StdRng::seed_from_u64(seed)
    }

    fn assert_balanced(sel: &CoinSelection, target: u64) {
        assert_eq!(sel.total, sel.selected.iter().map(|u| u.value).sum::<u64>());
        assert_eq!(sel.total, target + sel.fee + sel.change.unwrap_or(0));
    }

    #[test]
    fn fee_model_matches_p2pkh_sizes() {
        assert_eq!(fee_for(1, 2, 1), 226);
        assert_eq!(fee_for(1, 1, 1), 192);
        assert_eq!(fee_for(2, 2, 10), 3_740);
    }

    #[test]
    fn select_with_change() {
        let utxos = make_utxos(&[5_000, 3_000, 2_000]);
        for seed in 0..20 {
            let sel = CoinSelector::default()
                .select_random_improve(&utxos, 4_000, 1, &mut rng(seed))
                .unwrap();
            assert_balanced(&sel, 4_000);
            assert!(sel.total >= 4_000 + sel.fee);
            assert_eq!(sel.fee, fee_for(sel.selected.len(), sel.output_count(), 1));
        }
    }

    #[test]
    fn deterministic_under_seed() {
        let utxos = make_utxos(&[700, 1_200, 5_000, 3_300, 8_000, 450, 2_000]);
        let a = CoinSelector::default().select_random_improve(&utxos, 4_000, 2, &mut rng(42)).unwrap();
        let b = CoinSelector::default().select_random_improve(&utxos, 4_000, 2, &mut rng(42)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn dust_change_donated_to_fee() {
        // 5_000 - 4_000 - 226 = 774 change at 1 sat/vB; with a 1_000 dust
        // threshold it is folded into the fee.
        let utxos = make_utxos(&[5_000]);
        let selector = CoinSelector::new(SelectionPolicy { max_inputs: 10, dust_threshold: 1_000 });
        let sel = selector.select_random_improve(&utxos, 4_000, 1, &mut rng(1)).unwrap();
        assert_eq!(sel.change, None);
        assert_eq!(sel.fee, 1_000);
        assert_eq!(sel.output_count(), 1);
        assert_balanced(&sel, 4_000);
    }

    #[test]
    fn exact_without_change_output() {
        // Enough for the one-output fee but not the two-output fee.
        let utxos = make_utxos(&[4_200]);
        let sel = CoinSelector::default().select_random_improve(&utxos, 4_000, 1, &mut rng(3)).unwrap();
        assert_eq!(sel.change, None);
        assert_eq!(sel.fee, 200);
    }

    #[test]
    fn insufficient_balance() {
        let utxos = make_utxos(&[1_000, 2_000]);
        let err = CoinSelector::default()
            .select_random_improve(&utxos, 5_000, 1, &mut rng(0))
            .unwrap_err();
        assert!(matches!(err, WalletError::BalanceInsufficient { have: 3_000, .. }));
    }

    #[test]
    fn empty_set_is_insufficient() {
        let err = CoinSelector::default().select_random_improve(&[], 1, 1, &mut rng(0)).unwrap_err();
        assert!(matches!(err, WalletError::BalanceInsufficient { have: 0, .. }));
    }

    #[test]
    fn zero_target_rejected() {
        let utxos = make_utxos(&[1_000]);
        let err = CoinSelector::default().select_random_improve(&utxos, 0, 1, &mut rng(0)).unwrap_err();
        assert!(matches!(err, WalletError::InvalidAmount(_)));
    }

    #[test]
    fn max_inputs_exceeded() {
        let utxos = make_utxos(&[1_000; 10]);
        let selector = CoinSelector::new(SelectionPolicy { max_inputs: 5, dust_threshold: DUST_THRESHOLD });
        let err = selector.select_random_improve(&utxos, 6_000, 1, &mut rng(9)).unwrap_err();
        assert!(matches!(err, WalletError::MaxInputCountExceeded { max: 5, .. }));
    }

    #[test]
    fn cap_reached_only_without_change_still_selects() {
        // 5 inputs cover 4_200 + fee(5, 1) = 4_984 but not 4_200 + fee(5, 2) = 5_018.
        let utxos = make_utxos(&[1_000; 10]);
        let selector = CoinSelector::new(SelectionPolicy { max_inputs: 5, dust_threshold: DUST_THRESHOLD });

        let sel = selector.select_largest_first(&utxos, 4_200, 1).unwrap();
        assert_eq!(sel.selected.len(), 5);
        assert_eq!(sel.change, None);
        assert_eq!(sel.fee, 800);
        assert_balanced(&sel, 4_200);

        for seed in 0..20 {
            let sel = selector.select_random_improve(&utxos, 4_200, 1, &mut rng(seed)).unwrap();
            assert_eq!(sel.selected.len(), 5);
            assert_eq!(sel.change, None);
            assert_balanced(&sel, 4_200);
        }
    }

    #[test]
    fn falls_back_to_largest_first() {
        let mut values = vec![300u64; 20];
        values.push(10_000);
        let utxos = make_utxos(&values);
        let selector = CoinSelector::new(SelectionPolicy { max_inputs: 3, dust_threshold: DUST_THRESHOLD });
        for seed in 0..20 {
            let sel = selector.select_random_improve(&utxos, 1_500, 1, &mut rng(seed)).unwrap();
            assert!(sel.selected.len() <= 3);
            assert!(sel.selected.iter().any(|u| u.value == 10_000));
            assert_balanced(&sel, 1_500);
        }
    }

    #[test]
    fn improve_never_exceeds_upper_bound() {
        let utxos = make_utxos(&[1_000, 1_100, 900, 1_050, 950, 1_000, 1_020, 980]);
        for seed in 0..50 {
            let sel = CoinSelector::default().select_random_improve(&utxos, 1_500, 1, &mut rng(seed)).unwrap();
            let n = sel.selected.len();
            let needed = 1_500 + fee_for(n, 2, 1);
            assert!(sel.total <= 3 * needed + 1_100, "seed {seed}: total {}", sel.total);
            assert_balanced(&sel, 1_500);
        }
    }

    #[test]
    fn largest_first_is_deterministic() {
        let utxos = make_utxos(&[1_000, 9_000, 3_000]);
        let sel = CoinSelector::default().select_largest_first(&utxos, 5_000, 1).unwrap();
        assert_eq!(sel.selected.len(), 1);
        assert_eq!(sel.selected[0].value, 9_000);
        assert_eq!(sel.change, Some(9_000 - 5_000 - 226));
    }

    #[test]
    fn largest_first_insufficient() {
        let utxos = make_utxos(&[1_000, 2_000]);
        let err = CoinSelector::default().select_largest_first(&utxos, 2_900, 1).unwrap_err();
        assert!(matches!(err, WalletError::BalanceInsufficient { .. }));
    }
}
