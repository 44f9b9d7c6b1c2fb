//! Protocol configuration parsed from the chain's flat key map.
//!
//! The chain exposes its smart-contract configuration as a flat
//! `key -> string` map. Mandatory keys are never defaulted: a missing or
//! unparsable value fails the parse so that no verification runs against
//! guessed parameters.
//!
//! ## Keys
//!
//! | Key | Meaning |
//! |---|---|
//! | `epoch` | Rounds per epoch |
//! | `block_reward` | Minted per round at epoch 0, minor units |
//! | `reward_decline_rate` | Fractional decline of the block reward per epoch |
//! | `share_ratio` | Miner-category fraction of the block reward |
//! | `num_miners_rewarded` | Miners rewarded per round |
//! | `num_sharders_rewarded` | Sharders rewarded per round |
//! | `num_miner_delegates_rewarded` | Pools rewarded per miner reward |
//! | `num_sharder_delegates_rewarded` | Pools rewarded per sharder reward |
//! | `cost.*` | Cost table |

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Amount, ProviderCategory, Result, Round, TypesError};

/// Smart-contract configuration scalars relevant to reward distribution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Rounds per epoch.
    pub epoch: u64,
    /// Total block reward minted per round at epoch 0.
    pub block_reward: Amount,
    /// Per-epoch fractional decline of the block reward, in `[0, 1)`.
    pub reward_decline_rate: f64,
    /// Miner-category fraction of the block reward, in `[0, 1]`.
    pub share_ratio: f64,
    /// Miners rewarded per round.
    pub num_miners_rewarded: u32,
    /// Sharders rewarded per round.
    pub num_sharders_rewarded: u32,
    /// Delegate pools rewarded per miner block reward.
    pub num_miner_delegates_rewarded: u32,
    /// Delegate pools rewarded per sharder block reward.
    pub num_sharder_delegates_rewarded: u32,
    /// Delegate pools rewarded per blobber reward, when configured.
    pub num_blobber_delegates_rewarded: Option<u32>,
    /// Delegate pools rewarded per validator reward, when configured.
    pub num_validator_delegates_rewarded: Option<u32>,
    /// `cost.*` table with the prefix stripped.
    pub cost: BTreeMap<String, i64>,
    /// Every other key, verbatim.
    pub extra: BTreeMap<String, String>,
}

const KNOWN_KEYS: &[&str] = &[
    "epoch",
    "block_reward",
    "reward_decline_rate",
    "share_ratio",
    "num_miners_rewarded",
    "num_sharders_rewarded",
    "num_miner_delegates_rewarded",
    "num_sharder_delegates_rewarded",
    "num_blobber_delegates_rewarded",
    "num_validator_delegates_rewarded",
];

impl ProtocolConfig {
    /// Parse the flat key map returned by the chain.
    ///
    /// # Errors
    ///
    /// - [`TypesError::MissingConfigKey`] if a mandatory key is absent
    /// - [`TypesError::InvalidConfigValue`] if a value does not parse or is out of range
    /// - [`TypesError::ZeroEpoch`] if `epoch` is zero
    pub fn from_fields(fields: &BTreeMap<String, String>) -> Result<Self> {
        let epoch: u64 = required(fields, "epoch")?;
        if epoch == 0 {
            return Err(TypesError::ZeroEpoch);
        }

        let block_reward: Amount = required(fields, "block_reward")?;
        if block_reward < 0 {
            return Err(invalid(fields, "block_reward"));
        }

        let reward_decline_rate: f64 = required(fields, "reward_decline_rate")?;
        if !(0.0..1.0).contains(&reward_decline_rate) {
            return Err(invalid(fields, "reward_decline_rate"));
        }

        let share_ratio: f64 = required(fields, "share_ratio")?;
        if !(0.0..=1.0).contains(&share_ratio) {
            return Err(invalid(fields, "share_ratio"));
        }

        let mut cost = BTreeMap::new();
        let mut extra = BTreeMap::new();
        for (key, value) in fields {
            if let Some(name) = key.strip_prefix("cost.") {
                let parsed = value
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| invalid(fields, key))?;
                cost.insert(name.to_string(), parsed);
            } else if !KNOWN_KEYS.contains(&key.as_str()) {
                extra.insert(key.clone(), value.clone());
            }
        }

        Ok(Self {
            epoch,
            block_reward,
            reward_decline_rate,
            share_ratio,
            num_miners_rewarded: required(fields, "num_miners_rewarded")?,
            num_sharders_rewarded: required(fields, "num_sharders_rewarded")?,
            num_miner_delegates_rewarded: required(fields, "num_miner_delegates_rewarded")?,
            num_sharder_delegates_rewarded: required(fields, "num_sharder_delegates_rewarded")?,
            num_blobber_delegates_rewarded: optional(fields, "num_blobber_delegates_rewarded")?,
            num_validator_delegates_rewarded: optional(fields, "num_validator_delegates_rewarded")?,
            cost,
            extra,
        })
    }

    /// Epoch index of a round under this configuration.
    pub fn epoch_of(&self, round: Round) -> u64 {
        crate::epoch_of(round, self.epoch)
    }

    /// Providers of `category` rewarded per round.
    ///
    /// Only miners and sharders take part in the per-round block reward.
    pub fn num_rewarded(&self, category: ProviderCategory) -> Option<u32> {
        match category {
            ProviderCategory::Miner => Some(self.num_miners_rewarded),
            ProviderCategory::Sharder => Some(self.num_sharders_rewarded),
            ProviderCategory::Blobber | ProviderCategory::Validator => None,
        }
    }

    /// Delegate pools rewarded per block reward paid to `category`.
    pub fn num_delegates_rewarded(&self, category: ProviderCategory) -> Option<u32> {
        match category {
            ProviderCategory::Miner => Some(self.num_miner_delegates_rewarded),
            ProviderCategory::Sharder => Some(self.num_sharder_delegates_rewarded),
            ProviderCategory::Blobber => self.num_blobber_delegates_rewarded,
            ProviderCategory::Validator => self.num_validator_delegates_rewarded,
        }
    }

    /// Whether per-round block rewards are minted for `category` at all.
    pub fn block_rewards_enabled(&self, category: ProviderCategory) -> bool {
        self.block_reward > 0 && self.num_rewarded(category).is_some_and(|n| n > 0)
    }

    /// Boolean flag from the unrecognised keys, if present and parsable.
    pub fn flag(&self, key: &str) -> Option<bool> {
        self.extra.get(key).and_then(|v| v.trim().parse().ok())
    }
}

fn invalid(fields: &BTreeMap<String, String>, key: &str) -> TypesError {
    TypesError::InvalidConfigValue {
        key: key.to_string(),
        value: fields.get(key).cloned().unwrap_or_default(),
    }
}

fn required<T: FromStr>(fields: &BTreeMap<String, String>, key: &str) -> Result<T> {
    optional(fields, key)?.ok_or_else(|| TypesError::MissingConfigKey(key.to_string()))
}

fn optional<T: FromStr>(fields: &BTreeMap<String, String>, key: &str) -> Result<Option<T>> {
    match fields.get(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| invalid(fields, key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> BTreeMap<String, String> {
        [
            ("epoch", "100"),
            ("block_reward", "1000"),
            ("reward_decline_rate", "0.1"),
            ("share_ratio", "0.5"),
            ("num_miners_rewarded", "1"),
            ("num_sharders_rewarded", "1"),
            ("num_miner_delegates_rewarded", "10"),
            ("num_sharder_delegates_rewarded", "5"),
            ("cost.add_blobber", "100"),
            ("owner_id", "f00d"),
            ("block_rewards_paused", "false"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_parse_full_config() {
        let config = ProtocolConfig::from_fields(&fields()).expect("parse");
        assert_eq!(config.epoch, 100);
        assert_eq!(config.block_reward, 1000);
        assert_eq!(config.num_miner_delegates_rewarded, 10);
        assert_eq!(config.num_blobber_delegates_rewarded, None);
        assert_eq!(config.cost.get("add_blobber"), Some(&100));
        assert_eq!(config.extra.get("owner_id").map(String::as_str), Some("f00d"));
        assert!(!config.extra.contains_key("epoch"));
        assert_eq!(config.flag("block_rewards_paused"), Some(false));
    }

    #[test]
    fn test_missing_key_is_error() {
        let mut f = fields();
        f.remove("num_sharders_rewarded");
        assert!(matches!(
            ProtocolConfig::from_fields(&f),
            Err(TypesError::MissingConfigKey(k)) if k == "num_sharders_rewarded"
        ));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut f = fields();
        f.insert("share_ratio".to_string(), "1.5".to_string());
        assert!(ProtocolConfig::from_fields(&f).is_err());

        let mut f = fields();
        f.insert("epoch".to_string(), "0".to_string());
        assert!(matches!(ProtocolConfig::from_fields(&f), Err(TypesError::ZeroEpoch)));

        let mut f = fields();
        f.insert("num_miners_rewarded".to_string(), "many".to_string());
        assert!(ProtocolConfig::from_fields(&f).is_err());
    }

    #[test]
    fn test_rewards_enabled_per_category() {
        let mut config = ProtocolConfig::from_fields(&fields()).expect("parse");
        assert!(config.block_rewards_enabled(ProviderCategory::Miner));
        assert!(!config.block_rewards_enabled(ProviderCategory::Blobber));

        config.num_sharders_rewarded = 0;
        assert!(!config.block_rewards_enabled(ProviderCategory::Sharder));

        config.block_reward = 0;
        assert!(!config.block_rewards_enabled(ProviderCategory::Miner));
    }

    #[test]
    fn test_epoch_of_round() {
        let config = ProtocolConfig::from_fields(&fields()).expect("parse");
        assert_eq!(config.epoch_of(95), 0);
        assert_eq!(config.epoch_of(205), 2);
    }
}
