//! Indexed, immutable view of a loaded round interval.
//!
//! Records are stored densely, one per round, so `round(r)` is an offset
//! computation. Aggregate queries clamp their bounds to the loaded range.

use std::collections::BTreeMap;

use tally_types::{Amount, PoolId, RewardType, Round, RoundRecord};

use crate::{HistoryError, Result};

/// Every record for the closed interval `[from, to]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundHistory {
    from: Round,
    to: Round,
    records: Vec<RoundRecord>,
}

impl RoundHistory {
    /// Build a history from per-round records.
    ///
    /// Records may arrive in any order; records outside `[from, to]` are
    /// dropped.
    ///
    /// # Errors
    ///
    /// - [`HistoryError::InvalidRange`] if `from > to`
    /// - [`HistoryError::Inconsistent`] if two records claim the same round
    /// - [`HistoryError::RoundNotFinalized`] for the first round without a record
    pub fn from_records(
        from: Round,
        to: Round,
        records: impl IntoIterator<Item = RoundRecord>,
    ) -> Result<Self> {
        if from > to {
            return Err(HistoryError::InvalidRange { from, to });
        }

        let mut by_round = BTreeMap::new();
        for record in records {
            if record.round < from || record.round > to {
                continue;
            }
            let round = record.round;
            if by_round.insert(round, record).is_some() {
                return Err(HistoryError::Inconsistent {
                    round,
                    detail: "duplicate round record".to_string(),
                });
            }
        }

        let mut dense = Vec::with_capacity(by_round.len());
        for round in from..=to {
            let record = by_round
                .remove(&round)
                .ok_or(HistoryError::RoundNotFinalized(round))?;
            dense.push(record);
        }

        Ok(Self {
            from,
            to,
            records: dense,
        })
    }

    /// First loaded round.
    pub fn from(&self) -> Round {
        self.from
    }

    /// Last loaded round.
    pub fn to(&self) -> Round {
        self.to
    }

    /// Whether `[from, to]` lies inside the loaded range.
    pub fn covers(&self, from: Round, to: Round) -> bool {
        from >= self.from && to <= self.to
    }

    /// Record of a single round.
    pub fn round(&self, round: Round) -> Option<&RoundRecord> {
        if round < self.from || round > self.to {
            return None;
        }
        self.records.get((round - self.from) as usize)
    }

    /// Records of `[from, to]`, clamped to the loaded range.
    pub fn rounds(&self, from: Round, to: Round) -> impl Iterator<Item = &RoundRecord> + '_ {
        let start = from.max(self.from);
        let end = to.min(self.to);
        let slice = if start > end {
            &self.records[..0]
        } else {
            &self.records[(start - self.from) as usize..=(end - self.from) as usize]
        };
        slice.iter()
    }

    /// Sum of every provider and delegate reward event in `[from, to]`.
    pub fn total_recorded_rewards(&self, from: Round, to: Round) -> Amount {
        self.rounds(from, to)
            .map(|r| {
                r.provider_rewards.iter().map(|e| e.amount).sum::<Amount>()
                    + r.delegate_rewards.iter().map(|e| e.amount).sum::<Amount>()
            })
            .sum()
    }

    /// Sum of reward events in `[from, to]` whose type is in `types`.
    pub fn total_recorded_rewards_by_type(
        &self,
        from: Round,
        to: Round,
        types: &[RewardType],
        include_providers: bool,
        include_delegates: bool,
    ) -> Amount {
        let mut total = 0;
        for record in self.rounds(from, to) {
            if include_providers {
                total += record
                    .provider_rewards
                    .iter()
                    .filter(|e| types.contains(&e.reward_type))
                    .map(|e| e.amount)
                    .sum::<Amount>();
            }
            if include_delegates {
                total += record
                    .delegate_rewards
                    .iter()
                    .filter(|e| types.contains(&e.reward_type))
                    .map(|e| e.amount)
                    .sum::<Amount>();
            }
        }
        total
    }

    /// Sum of block transaction fees in `[from, to]`.
    pub fn total_transaction_fees(&self, from: Round, to: Round) -> Amount {
        self.rounds(from, to).map(|r| r.block.transaction_fees).sum()
    }

    /// Provider reward sums in `[from, to]`, grouped by reward type.
    pub fn provider_rewards_by_type(
        &self,
        provider_id: &str,
        from: Round,
        to: Round,
    ) -> BTreeMap<RewardType, Amount> {
        let mut sums = BTreeMap::new();
        for event in self
            .rounds(from, to)
            .flat_map(|r| r.provider_rewards.iter())
            .filter(|e| e.provider_id == provider_id)
        {
            *sums.entry(event.reward_type).or_insert(0) += event.amount;
        }
        sums
    }

    /// Delegate reward sums in `[from, to]` for the pools of a provider, by pool.
    pub fn delegate_rewards_by_pool(
        &self,
        provider_id: &str,
        from: Round,
        to: Round,
    ) -> BTreeMap<PoolId, Amount> {
        let mut sums = BTreeMap::new();
        for event in self
            .rounds(from, to)
            .flat_map(|r| r.delegate_rewards_for(provider_id))
        {
            *sums.entry(event.pool_id.clone()).or_insert(0) += event.amount;
        }
        sums
    }
}

#[cfg(test)]
mod tests {
    use tally_types::{DelegateRewardEvent, ProviderRewardEvent};

    use super::*;

    fn record(round: Round) -> RoundRecord {
        let mut record = RoundRecord::new(round, "m1");
        record.block.transaction_fees = 3;
        record.provider_rewards.push(ProviderRewardEvent {
            round,
            provider_id: "m1".to_string(),
            reward_type: RewardType::BlockRewardMiner,
            amount: 100,
        });
        record.provider_rewards.push(ProviderRewardEvent {
            round,
            provider_id: "s1".to_string(),
            reward_type: RewardType::FeeRewardSharder,
            amount: 10,
        });
        record.delegate_rewards.push(DelegateRewardEvent {
            round,
            pool_id: "p1".to_string(),
            provider_id: "m1".to_string(),
            reward_type: RewardType::BlockRewardMiner,
            amount: 80,
        });
        record
    }

    fn history() -> RoundHistory {
        RoundHistory::from_records(10, 14, (10..=14).rev().map(record)).expect("history")
    }

    #[test]
    fn test_lookup_by_round() {
        let h = history();
        assert_eq!(h.round(12).map(|r| r.round), Some(12));
        assert!(h.round(9).is_none());
        assert!(h.round(15).is_none());
        assert!(h.covers(11, 14));
        assert!(!h.covers(9, 14));
    }

    #[test]
    fn test_missing_round_not_finalized() {
        let records = [10, 11, 13].into_iter().map(record);
        assert!(matches!(
            RoundHistory::from_records(10, 13, records),
            Err(HistoryError::RoundNotFinalized(12))
        ));
    }

    #[test]
    fn test_duplicate_round_inconsistent() {
        let records = [10, 10].into_iter().map(record);
        assert!(matches!(
            RoundHistory::from_records(10, 10, records),
            Err(HistoryError::Inconsistent { round: 10, .. })
        ));
    }

    #[test]
    fn test_invalid_range() {
        assert!(matches!(
            RoundHistory::from_records(5, 4, Vec::new()),
            Err(HistoryError::InvalidRange { from: 5, to: 4 })
        ));
    }

    #[test]
    fn test_aggregate_queries() {
        let h = history();
        assert_eq!(h.total_recorded_rewards(10, 14), 5 * 190);
        assert_eq!(h.total_recorded_rewards(12, 12), 190);
        assert_eq!(h.total_recorded_rewards(0, 100), 5 * 190);
        assert_eq!(h.total_transaction_fees(11, 12), 6);

        let block = [RewardType::BlockRewardMiner];
        assert_eq!(h.total_recorded_rewards_by_type(10, 14, &block, true, false), 500);
        assert_eq!(h.total_recorded_rewards_by_type(10, 14, &block, false, true), 400);
        assert_eq!(h.total_recorded_rewards_by_type(10, 14, &block, true, true), 900);
        assert_eq!(h.total_recorded_rewards_by_type(10, 14, &block, false, false), 0);
    }

    #[test]
    fn test_per_provider_queries() {
        let h = history();
        let by_type = h.provider_rewards_by_type("m1", 11, 13);
        assert_eq!(by_type.get(&RewardType::BlockRewardMiner), Some(&300));
        assert_eq!(by_type.len(), 1);

        let by_pool = h.delegate_rewards_by_pool("m1", 10, 14);
        assert_eq!(by_pool.get("p1"), Some(&400));
        assert!(h.delegate_rewards_by_pool("s1", 10, 14).is_empty());
    }

    #[test]
    fn test_empty_clamped_range() {
        let h = history();
        assert_eq!(h.rounds(20, 30).count(), 0);
        assert_eq!(h.rounds(13, 12).count(), 0);
    }
}
