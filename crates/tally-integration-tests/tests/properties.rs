//! Integration test: verification properties over simulated ledgers.
//!
//! Each test drives the chain simulator for a number of rounds, cuts
//! snapshots and history out of it and runs the verifier directly:
//! 1. Reconciliation holds on random sub-windows of a busy ledger
//! 2. A second miner block reward in one round is flagged exactly once
//! 3. Delegate pools rewarded per round are capped by the configuration
//! 4. A window across an epoch boundary is inconclusive, never judged
//! 5. Verifying the same inputs twice yields the same report

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tally_integration_tests::{base_config, ChainSim};
use tally_rewards::Tolerance;
use tally_types::{
    Amount, DelegateRewardEvent, ProviderCategory, ProviderRewardEvent, RewardType,
};
use tally_verify::{Check, CheckStatus, InconclusiveReason, Verifier};

/// Two miners and three sharders with varied charges and pool layouts.
fn busy_chain(seed: u64, rounds: u64) -> ChainSim {
    let mut config = base_config();
    config.num_sharders_rewarded = 2;
    config.num_miner_delegates_rewarded = 2;
    let mut sim = ChainSim::new(config, seed).with_fee_events(4);
    sim.add_provider(
        ProviderCategory::Miner,
        "m1",
        0.1,
        &[("m1-a", 100), ("m1-b", 300), ("m1-c", 50)],
    );
    sim.add_provider(ProviderCategory::Miner, "m2", 0.25, &[("m2-a", 500)]);
    sim.add_provider(ProviderCategory::Sharder, "s1", 0.0, &[("s1-a", 10), ("s1-b", 10)]);
    sim.add_provider(ProviderCategory::Sharder, "s2", 1.0, &[]);
    sim.add_provider(ProviderCategory::Sharder, "s3", 0.5, &[("s3-a", 70)]);
    sim.advance(rounds).expect("simulate");
    sim
}

#[test]
fn reconciliation_holds_on_random_sub_windows() {
    let sim = busy_chain(42, 200);
    let verifier = Verifier::new(sim.config().clone(), Tolerance::EXACT);
    let mut rng = StdRng::seed_from_u64(9);

    for _ in 0..25 {
        let r1 = rng.gen_range(0..190);
        let r2 = rng.gen_range(r1 + 1..=200);
        let before = sim.snapshot_at(r1);
        let after = sim.snapshot_at(r2);
        let history = sim.history(r1 + 1, r2).expect("history");

        for id in ["m1", "m2", "s1", "s2", "s3"] {
            let recorded: Amount = history
                .provider_rewards_by_type(id, r1 + 1, r2)
                .values()
                .sum();
            let was = before.provider(id).expect("before").total_reward;
            let now = after.provider(id).expect("after").total_reward;
            assert_eq!(now - was, recorded, "{id} over ({r1}, {r2}]");
        }

        let report = verifier.verify(&before, &after, &history);
        assert!(
            report.is_passed(),
            "window ({r1}, {r2}]: {:?}",
            report.violations
        );
        for summary in &report.providers {
            assert_eq!(summary.reward_delta, summary.recorded);
        }
    }
}

#[test]
fn reconciliation_detects_a_dropped_event() {
    let mut sim = busy_chain(5, 40);
    let record = sim.record_mut(25).expect("round 25");
    let dropped = record
        .provider_rewards
        .iter()
        .position(|e| e.reward_type == RewardType::FeeRewardMiner || e.reward_type == RewardType::FeeRewardSharder)
        .expect("a fee event");
    let event = record.provider_rewards.remove(dropped);

    let report = Verifier::new(sim.config().clone(), Tolerance::EXACT).verify(
        &sim.snapshot_at(20),
        &sim.snapshot_at(30),
        &sim.history(21, 30).expect("history"),
    );
    let violations: Vec<_> = report.violations_of(Check::Reconciliation).collect();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].provider.as_deref(), Some(event.provider_id.as_str()));
    assert_eq!(violations[0].breach, Some(event.amount));
}

#[test]
fn single_winner_flags_competing_block_reward_once() {
    let mut sim = ChainSim::new(base_config(), 3);
    sim.add_provider(ProviderCategory::Miner, "m1", 0.1, &[("m1-a", 100)]);
    sim.add_provider(ProviderCategory::Miner, "m2", 0.1, &[("m2-a", 100)]);
    sim.add_provider(ProviderCategory::Sharder, "s1", 0.1, &[("s1-a", 100)]);
    sim.advance(20).expect("simulate");

    for round in 11..=20 {
        let record = sim.record(round).expect("record");
        let winners: Vec<_> = record
            .provider_rewards_of(RewardType::BlockRewardMiner)
            .collect();
        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].provider_id, record.block.miner_id);
    }

    let record = sim.record_mut(12).expect("round 12");
    let amount = record
        .provider_rewards_of(RewardType::BlockRewardMiner)
        .map(|e| e.amount)
        .sum();
    record.provider_rewards.push(ProviderRewardEvent {
        round: 12,
        provider_id: "intruder".to_string(),
        reward_type: RewardType::BlockRewardMiner,
        amount,
    });

    let report = Verifier::new(sim.config().clone(), Tolerance::default()).verify(
        &sim.snapshot_at(10),
        &sim.snapshot_at(20),
        &sim.history(11, 20).expect("history"),
    );
    assert!(report.is_failed());
    assert_eq!(report.violations.len(), 1, "{:?}", report.violations);
    assert_eq!(report.violations[0].check, Check::SingleWinner);
    assert_eq!(report.violations[0].round, Some(12));
}

fn delegate_chain(k: u32, pools: &[(&str, Amount)]) -> ChainSim {
    let mut config = base_config();
    config.num_miner_delegates_rewarded = k;
    let mut sim = ChainSim::new(config, 11);
    sim.add_provider(ProviderCategory::Miner, "m1", 0.2, pools);
    sim.add_provider(ProviderCategory::Sharder, "s1", 0.2, &[("s1-a", 100)]);
    sim.advance(30).expect("simulate");
    sim
}

fn pools_rewarded(sim: &ChainSim, round: u64) -> usize {
    let record = sim.record(round).expect("record");
    let mut pools: Vec<&str> = record
        .delegate_rewards_for("m1")
        .filter(|e| e.reward_type == RewardType::BlockRewardMiner)
        .map(|e| e.pool_id.as_str())
        .collect();
    pools.sort_unstable();
    pools.dedup();
    pools.len()
}

#[test]
fn delegate_count_capped_below_pool_count() {
    let mut sim = delegate_chain(2, &[("a", 100), ("b", 200), ("c", 300), ("d", 400)]);
    for round in 1..=30 {
        assert_eq!(pools_rewarded(&sim, round), 2, "round {round}");
    }
    let verifier = Verifier::new(sim.config().clone(), Tolerance::EXACT);
    let report = verifier.verify(
        &sim.snapshot_at(0),
        &sim.snapshot_at(30),
        &sim.history(1, 30).expect("history"),
    );
    assert!(report.is_passed(), "{:?}", report.violations);
    assert_eq!(report.checks[&Check::DelegateCount], CheckStatus::Passed);
    assert_eq!(report.checks[&Check::StakeProportionality], CheckStatus::Passed);

    // A third pool sharing one round's block reward breaks the cap.
    let record = sim.record_mut(17).expect("round 17");
    let rewarded: Vec<String> = record
        .delegate_rewards_for("m1")
        .map(|e| e.pool_id.clone())
        .collect();
    let extra = ["a", "b", "c", "d"]
        .into_iter()
        .find(|p| !rewarded.iter().any(|r| r == p))
        .expect("an unrewarded pool");
    record.delegate_rewards.push(DelegateRewardEvent {
        round: 17,
        pool_id: extra.to_string(),
        provider_id: "m1".to_string(),
        reward_type: RewardType::BlockRewardMiner,
        amount: 0,
    });
    let report = verifier.verify(
        &sim.snapshot_at(0),
        &sim.snapshot_at(30),
        &sim.history(1, 30).expect("history"),
    );
    let violations: Vec<_> = report.violations_of(Check::DelegateCount).collect();
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].round, Some(17));
    assert_eq!(violations[0].expected, Some(2));
    assert_eq!(violations[0].actual, Some(3));
}

#[test]
fn delegate_count_rewards_every_pool_when_cap_not_reached() {
    let sim = delegate_chain(5, &[("a", 100), ("b", 100), ("c", 300)]);
    for round in 1..=30 {
        assert_eq!(pools_rewarded(&sim, round), 3, "round {round}");
    }
    let report = Verifier::new(sim.config().clone(), Tolerance::EXACT).verify(
        &sim.snapshot_at(0),
        &sim.snapshot_at(30),
        &sim.history(1, 30).expect("history"),
    );
    assert!(report.is_passed(), "{:?}", report.violations);
    assert_eq!(report.checks[&Check::DelegateCount], CheckStatus::Passed);
}

#[test]
fn epoch_crossing_window_is_inconclusive() {
    let mut config = base_config();
    config.epoch = 100;
    config.reward_decline_rate = 0.1;
    let mut sim = ChainSim::new(config, 21);
    sim.add_provider(ProviderCategory::Miner, "m1", 0.1, &[("m1-a", 100)]);
    sim.add_provider(ProviderCategory::Sharder, "s1", 0.1, &[("s1-a", 100)]);
    sim.advance(205).expect("simulate");
    let verifier = Verifier::new(sim.config().clone(), Tolerance::EXACT);

    let expected = InconclusiveReason::EpochBoundary {
        from: 95,
        to: 205,
        from_epoch: 0,
        to_epoch: 2,
    };
    let report = verifier.verify(
        &sim.snapshot_at(94),
        &sim.snapshot_at(205),
        &sim.history(95, 205).expect("history"),
    );
    assert_eq!(report.inconclusive_reason(), Some(&expected));
    assert!(!report.is_passed() && !report.is_failed());
    assert!(report.violations.is_empty());

    // A broken ledger over the same window is still not judged.
    let record = sim.record_mut(150).expect("round 150");
    record.provider_rewards.clear();
    let report = verifier.verify(
        &sim.snapshot_at(94),
        &sim.snapshot_at(205),
        &sim.history(95, 205).expect("history"),
    );
    assert_eq!(report.inconclusive_reason(), Some(&expected));

    // Inside one epoch the declined reward verifies.
    let report = verifier.verify(
        &sim.snapshot_at(100),
        &sim.snapshot_at(140),
        &sim.history(101, 140).expect("history"),
    );
    assert!(report.is_passed(), "{:?}", report.violations);
    assert_eq!(report.epoch, Some(1));
}

#[test]
fn verify_is_idempotent() {
    let mut sim = busy_chain(77, 60);
    let verifier = Verifier::new(sim.config().clone(), Tolerance::default());
    let (before, after) = (sim.snapshot_at(10), sim.snapshot_at(60));
    let history = sim.history(11, 60).expect("history");
    let first = verifier.verify(&before, &after, &history);
    let second = verifier.verify(&before, &after, &history);
    assert!(first.is_passed());
    assert_eq!(first, second);

    let record = sim.record_mut(30).expect("round 30");
    record.provider_rewards.retain(|e| e.reward_type != RewardType::BlockRewardSharder);
    let history = sim.history(11, 60).expect("history");
    let first = verifier.verify(&before, &after, &history);
    let second = verifier.verify(&before, &after, &history);
    assert!(first.is_failed());
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).expect("json"),
        serde_json::to_string(&second).expect("json")
    );
}
