//! Provider and delegate splits.
//!
//! A provider keeps `round(amount * service_charge)` of each reward and
//! passes the rest to its delegate pools. The delegate part is then divided
//! among the rewarded pools in proportion to their stake, with the integer
//! remainder going to the largest stake (first in pool order on ties).
//! A provider with no pools keeps the whole amount.

use tally_types::{Amount, PoolId};

use crate::{Result, RewardError};

/// How one reward divides between a provider and its delegates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceChargeSplit {
    /// Kept by the provider.
    pub provider_cut: Amount,
    /// Passed to the delegate pools.
    pub delegates: Amount,
}

/// Split `amount` by `service_charge`.
///
/// # Errors
///
/// Returns [`RewardError::InvalidServiceCharge`] if the charge is outside `[0, 1]`.
pub fn split_service_charge(
    amount: Amount,
    service_charge: f64,
    has_pools: bool,
) -> Result<ServiceChargeSplit> {
    if !(0.0..=1.0).contains(&service_charge) {
        return Err(RewardError::InvalidServiceCharge(service_charge));
    }
    if !has_pools {
        return Ok(ServiceChargeSplit {
            provider_cut: amount,
            delegates: 0,
        });
    }
    let provider_cut = (amount as f64 * service_charge).round() as Amount;
    Ok(ServiceChargeSplit {
        provider_cut,
        delegates: amount - provider_cut,
    })
}

/// Divide `amount` among pools in proportion to stake.
///
/// All-zero stakes split evenly. Shares sum to `amount` exactly.
///
/// # Errors
///
/// - [`RewardError::NoPools`] if `stakes` is empty
/// - [`RewardError::NegativeStake`] if any balance is negative
/// - [`RewardError::Overflow`] if the stake total overflows
pub fn distribute_by_stake(amount: Amount, stakes: &[(PoolId, Amount)]) -> Result<Vec<(PoolId, Amount)>> {
    if stakes.is_empty() {
        return Err(RewardError::NoPools);
    }
    if let Some((pool, balance)) = stakes.iter().find(|(_, b)| *b < 0) {
        return Err(RewardError::NegativeStake {
            pool: pool.clone(),
            balance: *balance,
        });
    }

    let total = stakes
        .iter()
        .try_fold(0i128, |acc, (_, b)| acc.checked_add(i128::from(*b)))
        .ok_or(RewardError::Overflow)?;

    let mut shares: Vec<(PoolId, Amount)> = if total == 0 {
        let each = amount / stakes.len() as Amount;
        stakes.iter().map(|(p, _)| (p.clone(), each)).collect()
    } else {
        stakes
            .iter()
            .map(|(p, b)| {
                let share = i128::from(amount) * i128::from(*b) / total;
                (p.clone(), share as Amount)
            })
            .collect()
    };

    let distributed: Amount = shares.iter().map(|(_, s)| s).sum();
    let remainder = amount - distributed;
    if remainder != 0 {
        let mut largest = 0;
        for (i, (_, balance)) in stakes.iter().enumerate() {
            if *balance > stakes[largest].1 {
                largest = i;
            }
        }
        shares[largest].1 += remainder;
    }

    Ok(shares)
}
