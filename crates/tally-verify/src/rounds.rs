//! Per-round checks over the common window.

use std::collections::BTreeSet;

use tally_history::RoundHistory;
use tally_rewards::{block_reward, BlockReward, Tolerance};
use tally_types::{ActiveProviders, ProtocolConfig, ProviderCategory, RewardType, RoundRecord};

use crate::report::{Check, Ledger, Violation, Window};

const BLOCK_CATEGORIES: [ProviderCategory; 2] = [ProviderCategory::Miner, ProviderCategory::Sharder];

/// Number of providers of `category` the protocol rewards in one round.
///
/// Zero when block rewards are disabled for the category. An unknown
/// active count is taken to fill every slot.
pub(crate) fn recipients(
    config: &ProtocolConfig,
    reward: &BlockReward,
    category: ProviderCategory,
    active: Option<usize>,
) -> usize {
    if !config.block_rewards_enabled(category) || reward.for_category(category).unwrap_or(0) <= 0 {
        return 0;
    }
    let slots = config.num_rewarded(category).unwrap_or(0) as usize;
    active.map_or(slots, |active| slots.min(active))
}

pub(crate) fn check_rounds(
    config: &ProtocolConfig,
    tolerance: &Tolerance,
    active: &ActiveProviders,
    window: Window,
    history: &RoundHistory,
    ledger: &mut Ledger,
) {
    for category in BLOCK_CATEGORIES {
        if active.get(category).is_none() {
            ledger.skip(
                Check::RewardedCount,
                format!("active {category} count unknown"),
            );
        }
    }

    for record in history.rounds(window.from, window.to) {
        let reward = block_reward(record.round, config);
        let winner_flagged = single_winner(config, &reward, active, record, ledger);
        for category in BLOCK_CATEGORIES {
            if category == ProviderCategory::Miner && winner_flagged {
                continue;
            }
            rewarded_count(config, &reward, active, category, record, ledger);
        }
        block_reward_amounts(config, tolerance, &reward, active, record, ledger);
    }
}

/// Returns whether the round was flagged.
///
/// Only judged with one miner slot per round; with more, the rewarded count
/// and amount checks cover the miner block rewards.
fn single_winner(
    config: &ProtocolConfig,
    reward: &BlockReward,
    active: &ActiveProviders,
    record: &RoundRecord,
    ledger: &mut Ledger,
) -> bool {
    if config.num_miners_rewarded > 1 {
        ledger.skip(
            Check::SingleWinner,
            format!("{} miner slots per round", config.num_miners_rewarded),
        );
        return false;
    }
    ledger.ran(Check::SingleWinner);
    let enabled = recipients(
        config,
        reward,
        ProviderCategory::Miner,
        active.get(ProviderCategory::Miner),
    ) > 0;
    let winners: Vec<_> = record
        .provider_rewards_of(RewardType::BlockRewardMiner)
        .collect();

    match winners.as_slice() {
        [] if enabled => {
            ledger.fail(
                Violation::new(
                    Check::SingleWinner,
                    format!(
                        "no miner block reward although block rewards are enabled; lottery winner was {}",
                        record.block.miner_id
                    ),
                )
                .at_round(record.round)
                .for_provider(record.block.miner_id.clone())
                .counts(1, 0),
            );
            true
        }
        [] => false,
        [only] if only.provider_id != record.block.miner_id => {
            ledger.fail(
                Violation::new(
                    Check::SingleWinner,
                    format!(
                        "miner block reward paid to {}, lottery winner was {}",
                        only.provider_id, record.block.miner_id
                    ),
                )
                .at_round(record.round)
                .for_provider(only.provider_id.clone()),
            );
            true
        }
        [_] => false,
        many => {
            let paid: BTreeSet<&str> = many.iter().map(|e| e.provider_id.as_str()).collect();
            ledger.fail(
                Violation::new(
                    Check::SingleWinner,
                    format!(
                        "{} miner block rewards in one round (to {}), lottery winner was {}",
                        many.len(),
                        paid.into_iter().collect::<Vec<_>>().join(", "),
                        record.block.miner_id
                    ),
                )
                .at_round(record.round)
                .counts(1, many.len()),
            );
            true
        }
    }
}

fn rewarded_count(
    config: &ProtocolConfig,
    reward: &BlockReward,
    active: &ActiveProviders,
    category: ProviderCategory,
    record: &RoundRecord,
    ledger: &mut Ledger,
) {
    let Some(active_count) = active.get(category) else {
        return;
    };
    let Some(reward_type) = RewardType::block_reward_for(category) else {
        return;
    };
    ledger.ran(Check::RewardedCount);

    let expected = recipients(config, reward, category, Some(active_count));
    let actual = record
        .provider_rewards_of(reward_type)
        .map(|e| e.provider_id.as_str())
        .collect::<BTreeSet<_>>()
        .len();
    if expected != actual {
        ledger.fail(
            Violation::new(
                Check::RewardedCount,
                format!(
                    "{actual} {category}s received a block reward, expected min(num_rewarded, active = {active_count}) = {expected}"
                ),
            )
            .at_round(record.round)
            .counts(expected, actual),
        );
    }
}

fn block_reward_amounts(
    config: &ProtocolConfig,
    tolerance: &Tolerance,
    reward: &BlockReward,
    active: &ActiveProviders,
    record: &RoundRecord,
    ledger: &mut Ledger,
) {
    for category in BLOCK_CATEGORIES {
        let Some(reward_type) = RewardType::block_reward_for(category) else {
            continue;
        };
        let active_count = active.get(category).unwrap_or(usize::MAX);
        let expected = reward
            .per_provider(category, config, active_count)
            .filter(|_| config.block_rewards_enabled(category))
            .unwrap_or(0);
        for event in record.provider_rewards_of(reward_type) {
            ledger.compare(
                Check::BlockRewardAmount,
                tolerance.compare(expected, event.amount),
                || {
                    Violation::new(
                        Check::BlockRewardAmount,
                        format!("{category} block reward differs from the calculated per-provider reward"),
                    )
                    .at_round(record.round)
                    .for_provider(event.provider_id.clone())
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tally_types::{ProviderRewardEvent, Round};

    use super::*;
    use crate::report::CheckStatus;

    fn config() -> ProtocolConfig {
        ProtocolConfig {
            epoch: 100,
            block_reward: 1000,
            reward_decline_rate: 0.0,
            share_ratio: 0.5,
            num_miners_rewarded: 1,
            num_sharders_rewarded: 2,
            num_miner_delegates_rewarded: 1,
            num_sharder_delegates_rewarded: 1,
            num_blobber_delegates_rewarded: None,
            num_validator_delegates_rewarded: None,
            cost: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }

    fn event(round: Round, provider: &str, reward_type: RewardType, amount: i64) -> ProviderRewardEvent {
        ProviderRewardEvent {
            round,
            provider_id: provider.to_string(),
            reward_type,
            amount,
        }
    }

    fn good_round(round: Round) -> RoundRecord {
        let mut record = RoundRecord::new(round, "m1");
        record.provider_rewards = vec![
            event(round, "m1", RewardType::BlockRewardMiner, 500),
            event(round, "s1", RewardType::BlockRewardSharder, 250),
            event(round, "s2", RewardType::BlockRewardSharder, 250),
        ];
        record
    }

    fn run(records: Vec<RoundRecord>, active: ActiveProviders) -> crate::VerificationReport {
        run_with(&config(), records, active)
    }

    fn run_with(
        config: &ProtocolConfig,
        records: Vec<RoundRecord>,
        active: ActiveProviders,
    ) -> crate::VerificationReport {
        let from = records.first().map(|r| r.round).unwrap_or_default();
        let to = records.last().map(|r| r.round).unwrap_or_default();
        let history = RoundHistory::from_records(from, to, records).expect("history");
        let mut ledger = Ledger::default();
        check_rounds(
            config,
            &Tolerance::default(),
            &active,
            Window { from, to },
            &history,
            &mut ledger,
        );
        ledger.finish(Window { from, to }, 0, Tolerance::default(), Vec::new())
    }

    fn active(miners: usize, sharders: usize) -> ActiveProviders {
        ActiveProviders::default()
            .with(ProviderCategory::Miner, miners)
            .with(ProviderCategory::Sharder, sharders)
    }

    #[test]
    fn test_well_formed_rounds_pass() {
        let report = run((1..=5).map(good_round).collect(), active(3, 4));
        assert!(report.is_passed(), "{:?}", report.violations);
        assert_eq!(report.checks[&Check::SingleWinner], CheckStatus::Passed);
        assert_eq!(report.checks[&Check::RewardedCount], CheckStatus::Passed);
        assert_eq!(report.checks[&Check::BlockRewardAmount], CheckStatus::Passed);
    }

    #[test]
    fn test_reward_to_non_winner() {
        let mut records: Vec<_> = (1..=3).map(good_round).collect();
        records[1].provider_rewards[0].provider_id = "m2".to_string();

        let report = run(records, active(3, 4));
        let violations: Vec<_> = report.violations_of(Check::SingleWinner).collect();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].round, Some(2));
        assert_eq!(violations[0].provider.as_deref(), Some("m2"));
        assert_eq!(report.violations.len(), 1);
    }

    #[test]
    fn test_two_winners_flag_round_once() {
        let mut records: Vec<_> = (1..=3).map(good_round).collect();
        records[2]
            .provider_rewards
            .push(event(3, "m2", RewardType::BlockRewardMiner, 500));

        let report = run(records, active(3, 4));
        assert_eq!(report.violations.len(), 1);
        assert_eq!(report.violations[0].check, Check::SingleWinner);
        assert_eq!(report.violations[0].round, Some(3));
    }

    #[test]
    fn test_sharder_count_capped_by_active() {
        let mut record = RoundRecord::new(1, "m1");
        record.provider_rewards = vec![
            event(1, "m1", RewardType::BlockRewardMiner, 500),
            event(1, "s1", RewardType::BlockRewardSharder, 500),
        ];
        let report = run(vec![record.clone()], active(1, 1));
        assert!(report.is_passed(), "{:?}", report.violations);

        let report = run(vec![record], active(1, 4));
        assert_eq!(report.violations_of(Check::RewardedCount).count(), 1);
        // The lone sharder was paid the single-recipient amount.
        assert_eq!(report.violations_of(Check::BlockRewardAmount).count(), 1);
    }

    #[test]
    fn test_missing_winner_when_enabled() {
        let mut record = good_round(1);
        record.provider_rewards.remove(0);
        let report = run(vec![record], active(3, 4));
        assert_eq!(report.violations_of(Check::SingleWinner).count(), 1);
        assert_eq!(report.violations_of(Check::RewardedCount).count(), 0);
    }

    #[test]
    fn test_unknown_active_count_skips_rewarded_count() {
        let report = run((1..=2).map(good_round).collect(), ActiveProviders::default());
        assert!(report.is_passed(), "{:?}", report.violations);
        assert!(matches!(
            report.checks[&Check::RewardedCount],
            CheckStatus::Skipped { .. }
        ));
    }

    #[test]
    fn test_several_miner_slots_judged_by_count_and_amount() {
        let config = ProtocolConfig {
            num_miners_rewarded: 3,
            ..config()
        };
        let round = |round: Round, miners: &[&str], amount: i64| {
            let mut record = good_round(round);
            record.provider_rewards.remove(0);
            for miner in miners {
                record
                    .provider_rewards
                    .push(event(round, miner, RewardType::BlockRewardMiner, amount));
            }
            record
        };

        let records = (1..=3).map(|r| round(r, &["m1", "m2", "m3"], 166)).collect();
        let report = run_with(&config, records, active(5, 4));
        assert!(report.is_passed(), "{:?}", report.violations);
        assert!(matches!(
            &report.checks[&Check::SingleWinner],
            CheckStatus::Skipped { reason } if reason.contains("3 miner slots")
        ));
        assert_eq!(report.checks[&Check::RewardedCount], CheckStatus::Passed);
        assert_eq!(report.checks[&Check::BlockRewardAmount], CheckStatus::Passed);

        // Two active miners share the category reward between them.
        let report = run_with(&config, vec![round(1, &["m1", "m2"], 250)], active(2, 4));
        assert!(report.is_passed(), "{:?}", report.violations);

        // A missing slot and an overpaid miner are still caught.
        let mut records = vec![round(1, &["m1", "m2", "m3"], 166), round(2, &["m1", "m2"], 166)];
        records[0].provider_rewards[2].amount = 500;
        let report = run_with(&config, records, active(5, 4));
        let count: Vec<_> = report.violations_of(Check::RewardedCount).collect();
        assert_eq!(count.len(), 1);
        assert_eq!(count[0].round, Some(2));
        assert_eq!(count[0].expected, Some(3));
        assert_eq!(count[0].actual, Some(2));
        let amount: Vec<_> = report.violations_of(Check::BlockRewardAmount).collect();
        assert_eq!(amount.len(), 1);
        assert_eq!(amount[0].round, Some(1));
        assert_eq!(report.violations_of(Check::SingleWinner).count(), 0);
    }
}
