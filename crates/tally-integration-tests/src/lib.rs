//! Integration tests for the tally reward oracle.
//!
//! The library half is a deterministic chain simulator. It pays block
//! rewards by the protocol rules, records every reward event per round and
//! keeps every provider's state at every round, so a test can cut
//! snapshots and history at any point or serve them through a
//! [`FakeChainClient`] to drive the full pipeline.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p tally-integration-tests
//! ```

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tally_client::fake::FakeChainClient;
use tally_client::NodeInfo;
use tally_history::RoundHistory;
use tally_rewards::{block_reward, distribute_by_stake, split_service_charge, RewardError};
use tally_types::{
    ActiveProviders, Amount, ChainSnapshot, DelegatePool, DelegateRewardEvent, PoolId,
    ProtocolConfig, Provider, ProviderCategory, ProviderId, ProviderRewardEvent, RewardType,
    Round, RoundRecord, Snapshot,
};

const BLOCK_CATEGORIES: [ProviderCategory; 2] = [ProviderCategory::Miner, ProviderCategory::Sharder];

/// A protocol configuration with a flat 1000-unit block reward split
/// evenly, one miner and one sharder rewarded per round, one delegate pool
/// rewarded per block reward and epochs long enough not to matter.
pub fn base_config() -> ProtocolConfig {
    ProtocolConfig {
        epoch: 1_000_000,
        block_reward: 1000,
        reward_decline_rate: 0.0,
        share_ratio: 0.5,
        num_miners_rewarded: 1,
        num_sharders_rewarded: 1,
        num_miner_delegates_rewarded: 1,
        num_sharder_delegates_rewarded: 1,
        num_blobber_delegates_rewarded: None,
        num_validator_delegates_rewarded: None,
        cost: BTreeMap::new(),
        extra: BTreeMap::new(),
    }
}

/// The flat key map the chain would serve for `config`.
pub fn config_fields(config: &ProtocolConfig) -> BTreeMap<String, String> {
    let mut fields: BTreeMap<String, String> = [
        ("epoch", config.epoch.to_string()),
        ("block_reward", config.block_reward.to_string()),
        ("reward_decline_rate", config.reward_decline_rate.to_string()),
        ("share_ratio", config.share_ratio.to_string()),
        ("num_miners_rewarded", config.num_miners_rewarded.to_string()),
        ("num_sharders_rewarded", config.num_sharders_rewarded.to_string()),
        (
            "num_miner_delegates_rewarded",
            config.num_miner_delegates_rewarded.to_string(),
        ),
        (
            "num_sharder_delegates_rewarded",
            config.num_sharder_delegates_rewarded.to_string(),
        ),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    if let Some(n) = config.num_blobber_delegates_rewarded {
        fields.insert("num_blobber_delegates_rewarded".to_string(), n.to_string());
    }
    if let Some(n) = config.num_validator_delegates_rewarded {
        fields.insert("num_validator_delegates_rewarded".to_string(), n.to_string());
    }
    for (name, value) in &config.cost {
        fields.insert(format!("cost.{name}"), value.to_string());
    }
    fields.extend(config.extra.clone());
    fields
}

/// Simulated chain.
#[derive(Debug)]
pub struct ChainSim {
    config: ProtocolConfig,
    rng: StdRng,
    round: Round,
    fee_events_per_round: usize,
    providers: BTreeMap<ProviderId, Provider>,
    states: BTreeMap<Round, BTreeMap<ProviderId, Provider>>,
    records: BTreeMap<Round, RoundRecord>,
    aggregates: BTreeMap<Round, ChainSnapshot>,
}

impl ChainSim {
    /// A chain at round 0 with no providers.
    pub fn new(config: ProtocolConfig, seed: u64) -> Self {
        let genesis = ChainSnapshot {
            round: 0,
            total_mint: 0,
            zcn_supply: 0,
            mined_total: 0,
            total_rewards: 0,
            transactions_count: 0,
        };
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            round: 0,
            fee_events_per_round: 0,
            providers: BTreeMap::new(),
            states: BTreeMap::new(),
            records: BTreeMap::new(),
            aggregates: [(0, genesis)].into_iter().collect(),
        }
    }

    /// Also post `n` random fee rewards per round.
    pub fn with_fee_events(mut self, n: usize) -> Self {
        self.fee_events_per_round = n;
        self
    }

    /// Protocol configuration.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Latest simulated round.
    pub fn round(&self) -> Round {
        self.round
    }

    /// Register a provider with `(pool id, balance)` delegate pools.
    pub fn add_provider(
        &mut self,
        category: ProviderCategory,
        id: &str,
        service_charge: f64,
        pools: &[(&str, Amount)],
    ) {
        let provider = Provider {
            id: id.to_string(),
            category,
            round: self.round,
            total_reward: 0,
            current_reward: 0,
            service_charge,
            stake_pools: pools
                .iter()
                .map(|(pool, balance)| {
                    (
                        pool.to_string(),
                        DelegatePool {
                            id: pool.to_string(),
                            balance: *balance,
                            reward: 0,
                        },
                    )
                })
                .collect(),
        };
        self.providers.insert(provider.id.clone(), provider);
        self.states.insert(self.round, self.providers.clone());
    }

    /// Simulate `rounds` more rounds.
    ///
    /// # Errors
    ///
    /// Returns a [`RewardError`] if a provider's pools cannot be paid.
    pub fn advance(&mut self, rounds: u64) -> Result<(), RewardError> {
        for _ in 0..rounds {
            self.step()?;
        }
        Ok(())
    }

    fn ids_of(&self, category: ProviderCategory) -> Vec<ProviderId> {
        self.providers
            .values()
            .filter(|p| p.category == category)
            .map(|p| p.id.clone())
            .collect()
    }

    fn step(&mut self) -> Result<(), RewardError> {
        self.round += 1;
        let round = self.round;
        let reward = block_reward(round, &self.config);

        let miners = self.ids_of(ProviderCategory::Miner);
        let winner = miners.choose(&mut self.rng).cloned().unwrap_or_default();
        let mut record = RoundRecord::new(round, winner.clone());

        for category in BLOCK_CATEGORIES {
            let ids = self.ids_of(category);
            if !self.config.block_rewards_enabled(category)
                || reward.for_category(category).unwrap_or(0) <= 0
            {
                continue;
            }
            let Some(amount) = reward.per_provider(category, &self.config, ids.len()) else {
                continue;
            };
            let Some(reward_type) = RewardType::block_reward_for(category) else {
                continue;
            };
            let mut paid: Vec<ProviderId> = if category == ProviderCategory::Miner {
                vec![winner.clone()]
            } else {
                let slots = self.config.num_sharders_rewarded as usize;
                ids.choose_multiple(&mut self.rng, slots.min(ids.len()))
                    .cloned()
                    .collect()
            };
            paid.sort();
            for id in paid {
                self.pay_block_reward(&mut record, &id, reward_type, amount)?;
            }
        }

        let earners: Vec<ProviderId> = BLOCK_CATEGORIES
            .iter()
            .flat_map(|&c| self.ids_of(c))
            .collect();
        for _ in 0..self.fee_events_per_round {
            let Some(id) = earners.choose(&mut self.rng).cloned() else {
                break;
            };
            let amount = self.rng.gen_range(1..=50);
            if let Some(provider) = self.providers.get_mut(&id) {
                let reward_type = match provider.category {
                    ProviderCategory::Miner => RewardType::FeeRewardMiner,
                    _ => RewardType::FeeRewardSharder,
                };
                provider.total_reward += amount;
                provider.current_reward += amount;
                record.provider_rewards.push(ProviderRewardEvent {
                    round,
                    provider_id: id,
                    reward_type,
                    amount,
                });
            }
        }

        for provider in self.providers.values_mut() {
            provider.round = round;
        }

        let paid: Amount = record.provider_rewards.iter().map(|e| e.amount).sum::<Amount>()
            + record.delegate_rewards.iter().map(|e| e.amount).sum::<Amount>();
        let previous = self
            .aggregates
            .values()
            .next_back()
            .cloned()
            .unwrap_or_default();
        self.aggregates.insert(
            round,
            ChainSnapshot {
                round,
                total_mint: previous.total_mint + reward.total,
                zcn_supply: previous.zcn_supply + reward.total,
                mined_total: previous.mined_total + reward.total,
                total_rewards: previous.total_rewards + paid,
                transactions_count: previous.transactions_count + 1,
            },
        );

        self.records.insert(round, record);
        self.states.insert(round, self.providers.clone());
        Ok(())
    }

    fn pay_block_reward(
        &mut self,
        record: &mut RoundRecord,
        id: &str,
        reward_type: RewardType,
        amount: Amount,
    ) -> Result<(), RewardError> {
        let Some(provider) = self.providers.get_mut(id) else {
            return Ok(());
        };
        provider.total_reward += amount;
        provider.current_reward += amount;
        record.provider_rewards.push(ProviderRewardEvent {
            round: record.round,
            provider_id: provider.id.clone(),
            reward_type,
            amount,
        });

        let split = split_service_charge(amount, provider.service_charge, !provider.stake_pools.is_empty())?;
        if provider.stake_pools.is_empty() {
            return Ok(());
        }
        let limit = self
            .config
            .num_delegates_rewarded(provider.category)
            .map_or(usize::MAX, |n| n as usize);
        let pool_ids: Vec<PoolId> = provider.stake_pools.keys().cloned().collect();
        let mut chosen: Vec<PoolId> = pool_ids
            .choose_multiple(&mut self.rng, limit.min(pool_ids.len()))
            .cloned()
            .collect();
        chosen.sort();

        let stakes: Vec<(PoolId, Amount)> = chosen
            .iter()
            .map(|pool| {
                let balance = provider.stake_pools.get(pool).map_or(0, |p| p.balance);
                (pool.clone(), balance)
            })
            .collect();
        for (pool_id, share) in distribute_by_stake(split.delegates, &stakes)? {
            if let Some(pool) = provider.stake_pools.get_mut(&pool_id) {
                pool.reward += share;
            }
            record.delegate_rewards.push(DelegateRewardEvent {
                round: record.round,
                pool_id,
                provider_id: provider.id.clone(),
                reward_type,
                amount: share,
            });
        }
        Ok(())
    }

    fn state_at(&self, round: Round) -> Option<&BTreeMap<ProviderId, Provider>> {
        self.states.range(..=round).next_back().map(|(_, state)| state)
    }

    /// Provider state as of `round`.
    pub fn provider_at(&self, id: &str, round: Round) -> Option<&Provider> {
        self.state_at(round).and_then(|state| state.get(id))
    }

    /// Snapshot of every provider as of `round`.
    pub fn snapshot_at(&self, round: Round) -> Snapshot {
        let providers = self.state_at(round).cloned().unwrap_or_default();
        let mut active = ActiveProviders::default();
        for category in BLOCK_CATEGORIES {
            active.set(
                category,
                providers.values().filter(|p| p.category == category).count(),
            );
        }
        Snapshot {
            taken_at: round,
            providers,
            active,
        }
    }

    /// Recorded round, if simulated.
    pub fn record(&self, round: Round) -> Option<&RoundRecord> {
        self.records.get(&round)
    }

    /// Mutable access to a recorded round, for tampering with the ledger.
    pub fn record_mut(&mut self, round: Round) -> Option<&mut RoundRecord> {
        self.records.get_mut(&round)
    }

    /// History over `[from, to]`.
    ///
    /// # Errors
    ///
    /// Fails if a round in the range was not simulated.
    pub fn history(&self, from: Round, to: Round) -> tally_history::Result<RoundHistory> {
        RoundHistory::from_records(from, to, self.records.range(from..=to).map(|(_, r)| r.clone()))
    }

    /// Serve the simulated chain through `fake`.
    ///
    /// Provider state is published only as of `snapshot_rounds`, so each
    /// snapshot the pipeline takes sees the latest of those at or before
    /// the fake's current round. Rounds, aggregates, the protocol config
    /// and the active lists are published in full.
    pub async fn publish(&self, fake: &FakeChainClient, snapshot_rounds: &[Round]) {
        fake.set_protocol_config(0, config_fields(&self.config)).await;
        for category in BLOCK_CATEGORIES {
            fake.set_active(category, 0, self.ids_of(category)).await;
        }
        for &round in snapshot_rounds {
            let Some(state) = self.state_at(round) else {
                continue;
            };
            for provider in state.values() {
                let node = NodeInfo {
                    id: provider.id.clone(),
                    round: provider.round,
                    total_reward: provider.total_reward,
                    current_reward: provider.current_reward,
                    service_charge: provider.service_charge,
                };
                fake.insert_node(provider.key(), round, node).await;
                fake.insert_pools(
                    provider.key(),
                    round,
                    provider.stake_pools.values().cloned().collect(),
                )
                .await;
            }
        }
        for record in self.records.values() {
            fake.insert_round(record.clone()).await;
        }
        for snapshot in self.aggregates.values() {
            fake.push_snapshot(snapshot.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_fields_parse_back() {
        let mut config = base_config();
        config.num_blobber_delegates_rewarded = Some(3);
        config.reward_decline_rate = 0.1;
        let parsed = ProtocolConfig::from_fields(&config_fields(&config)).expect("parse");
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_simulated_totals_match_events() {
        let mut sim = ChainSim::new(base_config(), 7).with_fee_events(3);
        sim.add_provider(ProviderCategory::Miner, "m1", 0.1, &[("p1", 100)]);
        sim.add_provider(ProviderCategory::Sharder, "s1", 0.1, &[("p2", 100)]);
        sim.advance(5).expect("advance");

        let history = sim.history(1, 5).expect("history");
        let m1 = sim.provider_at("m1", 5).expect("m1");
        let recorded: Amount = history.provider_rewards_by_type("m1", 1, 5).values().sum();
        assert_eq!(m1.total_reward, recorded);
        assert_eq!(sim.snapshot_at(5).active.get(ProviderCategory::Miner), Some(1));
    }
}
