//! Per-provider checks over each provider's own window.
//!
//! Reconciles the provider's reward delta against its postings, then walks
//! every round in which the provider took a block reward to check how the
//! reward was divided among its delegate pools.

use std::collections::BTreeMap;

use tally_history::RoundHistory;
use tally_rewards::{distribute_by_stake, split_service_charge, Tolerance};
use tally_types::{Amount, PoolId, ProtocolConfig, Provider, RewardType, RoundRecord};
use tracing::debug;

use crate::report::{Check, Ledger, ProviderSummary, Violation, Window};

pub(crate) fn check_provider(
    config: &ProtocolConfig,
    tolerance: &Tolerance,
    before: &Provider,
    after: &Provider,
    window: Window,
    history: &RoundHistory,
    ledger: &mut Ledger,
) -> ProviderSummary {
    check_reward_types(before, window, history, ledger);

    let recorded_by_type = history.provider_rewards_by_type(&before.id, window.from, window.to);
    let recorded: Amount = recorded_by_type.values().sum();
    let reward_delta = after.total_reward - before.total_reward;
    ledger.compare(
        Check::Reconciliation,
        tolerance.compare(reward_delta, recorded),
        || {
            Violation::new(
                Check::Reconciliation,
                format!("total reward delta over {window} does not match recorded reward events"),
            )
            .for_provider(before.id.clone())
        },
    );

    let mut split = SplitTotals::default();
    if let Some(block_type) = RewardType::block_reward_for(before.category) {
        let splitter = RoundSplit {
            config,
            tolerance,
            provider: before,
            pools: PoolState::new(before, after),
            block_type,
        };
        for record in history.rounds(window.from, window.to) {
            splitter.check(record, ledger, &mut split);
        }
    } else {
        for check in [
            Check::DelegateExclusivity,
            Check::DelegateCount,
            Check::ServiceChargeSplit,
        ] {
            ledger.skip(check, format!("{}s take no block reward", before.category));
        }
    }

    let pool_reward_delta = check_pool_rewards(tolerance, before, after, window, history, ledger);

    ProviderSummary {
        id: before.id.clone(),
        category: before.category,
        window,
        reward_delta,
        recorded,
        recorded_by_type,
        block_rewards: split.block_rewards,
        delegated: split.delegated,
        provider_cut: split.block_rewards - split.delegated,
        pool_reward_delta,
    }
}

fn check_reward_types(provider: &Provider, window: Window, history: &RoundHistory, ledger: &mut Ledger) {
    ledger.ran(Check::RewardTypes);
    for record in history.rounds(window.from, window.to) {
        let provider_types = record
            .provider_rewards
            .iter()
            .filter(|e| e.provider_id == provider.id)
            .map(|e| e.reward_type);
        let delegate_types = record.delegate_rewards_for(&provider.id).map(|e| e.reward_type);
        for reward_type in provider_types.chain(delegate_types) {
            if !reward_type.is_recognized_for(provider.category) {
                ledger.fail(
                    Violation::new(
                        Check::RewardTypes,
                        format!(
                            "reward type {reward_type:?} (code {}) is not recognized for {}s",
                            reward_type.code(),
                            provider.category
                        ),
                    )
                    .at_round(record.round)
                    .for_provider(provider.id.clone()),
                );
            }
        }
    }
}

#[derive(Debug, Default)]
struct SplitTotals {
    block_rewards: Amount,
    delegated: Amount,
}

/// What the two snapshots say about a provider's pools.
struct PoolState {
    /// Pool set unchanged between snapshots.
    same_pools: bool,
    /// Pool set and every balance unchanged.
    same_balances: bool,
    /// Service charge unchanged.
    same_charge: bool,
    balances: BTreeMap<PoolId, Amount>,
}

impl PoolState {
    fn new(before: &Provider, after: &Provider) -> Self {
        let same_pools = before.stake_pools.keys().eq(after.stake_pools.keys());
        let same_balances = same_pools
            && before
                .stake_pools
                .values()
                .zip(after.stake_pools.values())
                .all(|(b, a)| b.balance == a.balance);
        Self {
            same_pools,
            same_balances,
            same_charge: before.service_charge == after.service_charge,
            balances: before
                .stake_pools
                .iter()
                .map(|(id, pool)| (id.clone(), pool.balance))
                .collect(),
        }
    }
}

/// Block-reward split checks for one provider.
struct RoundSplit<'a> {
    config: &'a ProtocolConfig,
    tolerance: &'a Tolerance,
    provider: &'a Provider,
    pools: PoolState,
    block_type: RewardType,
}

impl RoundSplit<'_> {
    fn check(&self, record: &RoundRecord, ledger: &mut Ledger, totals: &mut SplitTotals) {
        let (config, tolerance, provider, pools, block_type) =
            (self.config, self.tolerance, self.provider, &self.pools, self.block_type);
        let rewarded: Vec<Amount> = record
            .provider_rewards_of(block_type)
            .filter(|e| e.provider_id == provider.id)
            .map(|e| e.amount)
            .collect();
        let mut per_pool: BTreeMap<&str, (usize, Amount)> = BTreeMap::new();
        for event in record
            .delegate_rewards_for(&provider.id)
            .filter(|e| e.reward_type == block_type)
        {
            let entry = per_pool.entry(event.pool_id.as_str()).or_default();
            entry.0 += 1;
            entry.1 += event.amount;
        }
        if rewarded.is_empty() && per_pool.is_empty() {
            return;
        }

        let amount: Amount = rewarded.iter().sum();
        let delegated: Amount = per_pool.values().map(|(_, sum)| sum).sum();
        totals.block_rewards += amount;
        totals.delegated += delegated;
        debug!(round = record.round, provider = %provider.id, amount, delegated, "block reward split");

        ledger.ran(Check::DelegateExclusivity);
        for (pool, (count, _)) in &per_pool {
            if *count > 1 {
                ledger.fail(
                    Violation::new(
                        Check::DelegateExclusivity,
                        format!("pool received {count} block-reward delegate events in one round"),
                    )
                    .at_round(record.round)
                    .for_provider(provider.id.clone())
                    .for_pool(*pool)
                    .counts(1, *count),
                );
            }
        }

        match config.num_delegates_rewarded(provider.category) {
            None => ledger.skip(
                Check::DelegateCount,
                format!("no delegate count configured for {}s", provider.category),
            ),
            Some(_) if !pools.same_pools => {
                ledger.skip(Check::DelegateCount, "pool set changed during the window")
            }
            Some(limit) => {
                ledger.ran(Check::DelegateCount);
                let expected = (limit as usize).min(pools.balances.len());
                if per_pool.len() != expected {
                    ledger.fail(
                        Violation::new(
                            Check::DelegateCount,
                            format!(
                                "{} pools rewarded, expected min(num_delegates_rewarded = {limit}, pools = {})",
                                per_pool.len(),
                                pools.balances.len()
                            ),
                        )
                        .at_round(record.round)
                        .for_provider(provider.id.clone())
                        .counts(expected, per_pool.len()),
                    );
                }
            }
        }

        if !pools.same_charge {
            ledger.skip(Check::ServiceChargeSplit, "service charge changed during the window");
        } else {
            match split_service_charge(amount, provider.service_charge, !pools.balances.is_empty()) {
                Ok(split) => ledger.compare(
                    Check::ServiceChargeSplit,
                    tolerance.compare(split.delegates, delegated),
                    || {
                        Violation::new(
                            Check::ServiceChargeSplit,
                            format!(
                                "delegates received {delegated} of {amount}, service charge {} leaves {} for the provider",
                                provider.service_charge, split.provider_cut
                            ),
                        )
                        .at_round(record.round)
                        .for_provider(provider.id.clone())
                    },
                ),
                Err(e) => ledger.fail(
                    Violation::new(Check::ServiceChargeSplit, e.to_string())
                        .at_round(record.round)
                        .for_provider(provider.id.clone()),
                ),
            }
        }

        if per_pool.len() > 1 {
            if !pools.same_balances {
                ledger.skip(
                    Check::StakeProportionality,
                    "pool balances changed during the window",
                );
                return;
            }
            let stakes: Vec<(PoolId, Amount)> = per_pool
                .keys()
                .map(|pool| (pool.to_string(), pools.balances.get(*pool).copied().unwrap_or(0)))
                .collect();
            match distribute_by_stake(delegated, &stakes) {
                Ok(shares) => {
                    for (pool, share) in shares {
                        let actual = per_pool.get(pool.as_str()).map_or(0, |(_, sum)| *sum);
                        ledger.compare(
                            Check::StakeProportionality,
                            tolerance.compare(share, actual),
                            || {
                                Violation::new(
                                    Check::StakeProportionality,
                                    "pool share is not proportional to its stake",
                                )
                                .at_round(record.round)
                                .for_provider(provider.id.clone())
                                .for_pool(pool.clone())
                            },
                        );
                    }
                }
                Err(e) => ledger.fail(
                    Violation::new(Check::StakeProportionality, e.to_string())
                        .at_round(record.round)
                        .for_provider(provider.id.clone()),
                ),
            }
        }
    }
}

/// Reconcile each pool's reward delta; returns the summed delta.
fn check_pool_rewards(
    tolerance: &Tolerance,
    before: &Provider,
    after: &Provider,
    window: Window,
    history: &RoundHistory,
    ledger: &mut Ledger,
) -> Amount {
    let recorded = history.delegate_rewards_by_pool(&before.id, window.from, window.to);
    let mut total_delta = 0;

    for (pool_id, now) in &after.stake_pools {
        let was = before.stake_pools.get(pool_id).map_or(0, |p| p.reward);
        let delta = now.reward - was;
        total_delta += delta;
        let actual = recorded.get(pool_id).copied().unwrap_or(0);
        ledger.compare(
            Check::DelegateReconciliation,
            tolerance.compare(delta, actual),
            || {
                Violation::new(
                    Check::DelegateReconciliation,
                    format!("pool reward delta over {window} does not match recorded delegate events"),
                )
                .for_provider(before.id.clone())
                .for_pool(pool_id.clone())
            },
        );
    }

    for (pool_id, amount) in &recorded {
        if after.stake_pools.contains_key(pool_id) {
            continue;
        }
        if before.stake_pools.contains_key(pool_id) {
            debug!(provider = %before.id, pool = %pool_id, "pool left during the window, not reconciled");
            continue;
        }
        ledger.fail(
            Violation::new(
                Check::DelegateReconciliation,
                "delegate rewards posted to a pool the provider does not have",
            )
            .for_provider(before.id.clone())
            .for_pool(pool_id.clone())
            .comparison(&Tolerance::EXACT.compare(0, *amount)),
        );
    }

    total_delta
}
