//! Providers, delegate pools and point-in-time snapshots.
//!
//! A provider is a staked participant eligible for rewards. Each provider
//! owns zero or more delegate stake pools; the provider keeps its service
//! charge fraction of every reward and the remainder flows to its pools.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Amount, PoolId, ProviderId, Round, TypesError};

/// Provider category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderCategory {
    /// Block-producing node; one lottery winner per round.
    Miner,
    /// Block-storing node.
    Sharder,
    /// Storage provider.
    Blobber,
    /// Storage challenge validator.
    Validator,
}

impl ProviderCategory {
    /// All categories in a stable order.
    pub const ALL: [ProviderCategory; 4] = [
        ProviderCategory::Miner,
        ProviderCategory::Sharder,
        ProviderCategory::Blobber,
        ProviderCategory::Validator,
    ];

    /// Lowercase name used on the wire and in provider keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderCategory::Miner => "miner",
            ProviderCategory::Sharder => "sharder",
            ProviderCategory::Blobber => "blobber",
            ProviderCategory::Validator => "validator",
        }
    }
}

impl fmt::Display for ProviderCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderCategory {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "miner" => Ok(ProviderCategory::Miner),
            "sharder" => Ok(ProviderCategory::Sharder),
            "blobber" => Ok(ProviderCategory::Blobber),
            "validator" => Ok(ProviderCategory::Validator),
            other => Err(TypesError::UnknownCategory(other.to_string())),
        }
    }
}

/// Category-qualified provider identity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ProviderKey {
    /// Provider category; selects the query endpoint.
    pub category: ProviderCategory,
    /// Stable provider ID.
    pub id: ProviderId,
}

impl ProviderKey {
    /// Create a new provider key.
    pub fn new(category: ProviderCategory, id: impl Into<ProviderId>) -> Self {
        Self {
            category,
            id: id.into(),
        }
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.category, self.id)
    }
}

impl FromStr for ProviderKey {
    type Err = TypesError;

    /// Parse `category:id`, e.g. `miner:3f2a...`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (category, id) = s
            .split_once(':')
            .ok_or_else(|| TypesError::MalformedProviderKey(s.to_string()))?;
        if id.is_empty() {
            return Err(TypesError::MalformedProviderKey(s.to_string()));
        }
        Ok(Self::new(category.parse()?, id))
    }
}

/// A delegate stake pool owned by exactly one provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegatePool {
    /// Pool ID.
    pub id: PoolId,
    /// Staked amount.
    pub balance: Amount,
    /// Accrued reward attributable to this pool.
    pub reward: Amount,
}

/// Point-in-time state of a provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    /// Provider ID.
    pub id: ProviderId,
    /// Provider category.
    pub category: ProviderCategory,
    /// Round at which the reward fields were last updated.
    pub round: Round,
    /// Lifetime accrued reward.
    pub total_reward: Amount,
    /// Current-period accrued reward. Reset semantics belong to the chain.
    pub current_reward: Amount,
    /// Fraction in `[0, 1]` retained before delegate distribution.
    pub service_charge: f64,
    /// Delegate pools keyed by pool ID.
    pub stake_pools: BTreeMap<PoolId, DelegatePool>,
}

impl Provider {
    /// Category-qualified key of this provider.
    pub fn key(&self) -> ProviderKey {
        ProviderKey::new(self.category, self.id.clone())
    }

    /// Whether the service charge lies within `[0, 1]`.
    pub fn service_charge_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.service_charge)
    }

    /// Sum of all pool balances.
    pub fn total_stake(&self) -> Amount {
        self.stake_pools.values().map(|p| p.balance).sum()
    }
}

/// Active provider counts per category.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveProviders {
    counts: BTreeMap<ProviderCategory, usize>,
}

impl ActiveProviders {
    /// Record the active count for a category.
    pub fn set(&mut self, category: ProviderCategory, count: usize) {
        self.counts.insert(category, count);
    }

    /// Builder-style variant of [`ActiveProviders::set`].
    pub fn with(mut self, category: ProviderCategory, count: usize) -> Self {
        self.set(category, count);
        self
    }

    /// Active count for a category, if it was observed.
    pub fn get(&self, category: ProviderCategory) -> Option<usize> {
        self.counts.get(&category).copied()
    }
}

/// A transient view of a set of providers, captured once per run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Latest finalized chain round when the snapshot was taken.
    pub taken_at: Round,
    /// Providers keyed by ID.
    pub providers: BTreeMap<ProviderId, Provider>,
    /// Active provider counts per category.
    pub active: ActiveProviders,
}

impl Snapshot {
    /// Look up a provider by ID.
    pub fn provider(&self, id: &str) -> Option<&Provider> {
        self.providers.get(id)
    }

    /// Smallest provider round in the snapshot.
    pub fn min_round(&self) -> Option<Round> {
        self.providers.values().map(|p| p.round).min()
    }

    /// Largest provider round in the snapshot.
    pub fn max_round(&self) -> Option<Round> {
        self.providers.values().map(|p| p.round).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_round_trip_names() {
        for category in ProviderCategory::ALL {
            let parsed: ProviderCategory = category.as_str().parse().expect("parse");
            assert_eq!(parsed, category);
        }
        assert!("storage".parse::<ProviderCategory>().is_err());
    }

    #[test]
    fn test_provider_key_parse() {
        let key: ProviderKey = "Sharder:abc123".parse().expect("parse");
        assert_eq!(key.category, ProviderCategory::Sharder);
        assert_eq!(key.id, "abc123");
        assert_eq!(key.to_string(), "sharder:abc123");

        assert!("abc123".parse::<ProviderKey>().is_err());
        assert!("miner:".parse::<ProviderKey>().is_err());
    }

    #[test]
    fn test_service_charge_bounds() {
        let mut provider = Provider {
            id: "m1".to_string(),
            category: ProviderCategory::Miner,
            round: 10,
            total_reward: 0,
            current_reward: 0,
            service_charge: 0.2,
            stake_pools: BTreeMap::new(),
        };
        assert!(provider.service_charge_valid());
        provider.service_charge = 1.5;
        assert!(!provider.service_charge_valid());
    }

    #[test]
    fn test_snapshot_round_bounds() {
        let mut snapshot = Snapshot::default();
        assert_eq!(snapshot.min_round(), None);
        for (id, round) in [("a", 12), ("b", 9)] {
            snapshot.providers.insert(
                id.to_string(),
                Provider {
                    id: id.to_string(),
                    category: ProviderCategory::Sharder,
                    round,
                    total_reward: 0,
                    current_reward: 0,
                    service_charge: 0.0,
                    stake_pools: BTreeMap::new(),
                },
            );
        }
        assert_eq!(snapshot.min_round(), Some(9));
        assert_eq!(snapshot.max_round(), Some(12));
    }
}
