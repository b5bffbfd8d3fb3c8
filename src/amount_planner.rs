//! Pure, deterministic per-wallet amount distribution with balance-based
//! admission control. Never performs I/O and never mutates wallet state.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::{AdmissionVerdict, Strategy, Wallet, WalletPlan};

/// A wallet together with its available balance in the input token's base
/// units, as snapshotted once by the orchestrator before execution begins.
#[derive(Debug, Clone, Copy)]
pub struct WalletSnapshot<'a> {
    pub wallet: &'a Wallet,
    pub available_balance: u64,
}

/// Raised when a strategy's shape cannot match the selected wallet set
/// (currently only `custom` with a mismatched length). This is a
/// configuration error surfaced before any execution begins.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PlanningError {
    #[error("custom strategy has {amounts} amount(s) but {wallets} wallet(s) were selected")]
    CustomLengthMismatch { amounts: usize, wallets: usize },
}

pub struct AmountPlanner;

impl AmountPlanner {
    /// Produces one `WalletPlan` per selected wallet, in the order the
    /// snapshots were supplied. `run_id` seeds the `random` strategy so
    /// planning is reproducible given the same inputs.
    pub fn plan(
        wallets: &[WalletSnapshot<'_>],
        strategy: &Strategy,
        minimum_input_amount: u64,
        run_id: u64,
    ) -> Result<Vec<WalletPlan>, PlanningError> {
        let amounts = Self::amounts_for(wallets, strategy, run_id)?;

        Ok(wallets
            .iter()
            .zip(amounts)
            .map(|(snapshot, amount)| {
                let verdict = if amount < minimum_input_amount {
                    AdmissionVerdict::BelowMinimum
                } else if amount > snapshot.available_balance {
                    AdmissionVerdict::InsufficientBalance
                } else {
                    AdmissionVerdict::Ok
                };

                WalletPlan {
                    wallet: snapshot.wallet.clone(),
                    input_amount: amount,
                    verdict,
                }
            })
            .collect())
    }

    fn amounts_for(
        wallets: &[WalletSnapshot<'_>],
        strategy: &Strategy,
        run_id: u64,
    ) -> Result<Vec<u64>, PlanningError> {
        match strategy {
            Strategy::Fixed { base } => Ok(vec![*base; wallets.len()]),

            Strategy::Percentage { fraction } => Ok(wallets
                .iter()
                .map(|w| ((w.available_balance as f64) * fraction).floor() as u64)
                .collect()),

            Strategy::Random { min, max } => {
                let mut rng = StdRng::seed_from_u64(run_id);
                // Wallets are already presented in ascending index order by
                // the orchestrator; draw in that order so the sequence is
                // reproducible for a fixed run id.
                Ok(wallets
                    .iter()
                    .map(|_| {
                        if min == max {
                            *min
                        } else {
                            rng.gen_range(*min..=*max)
                        }
                    })
                    .collect())
            }

            Strategy::Custom { amounts } => {
                if amounts.len() != wallets.len() {
                    return Err(PlanningError::CustomLengthMismatch {
                        amounts: amounts.len(),
                        wallets: wallets.len(),
                    });
                }
                Ok(amounts.clone())
            }
        }
    }
}
