//! Block Reward Calculator.
//!
//! The amount minted for block production declines geometrically per
//! epoch and is split between the miner and sharder categories by the
//! configured `share_ratio`.
//!
//! ## Formula
//!
//! ```text
//! total(round)   = floor(block_reward * (1 - reward_decline_rate)^(round / epoch))
//! miner(round)   = floor(total * share_ratio)
//! sharder(round) = total - miner
//! per_provider   = category_reward / min(num_rewarded, active)
//! ```
//!
//! The rounding remainder of the category split goes to sharders; the
//! remainder of the per-provider division is not paid out.

use serde::{Deserialize, Serialize};
use tally_types::{Amount, ProtocolConfig, ProviderCategory, Round};

/// Block reward minted at one round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockReward {
    /// The round.
    pub round: Round,
    /// Epoch index of the round.
    pub epoch: u64,
    /// Total minted for block production.
    pub total: Amount,
    /// Miner-category share.
    pub miner: Amount,
    /// Sharder-category share.
    pub sharder: Amount,
}

impl BlockReward {
    /// Category share, for the categories that take part in block rewards.
    pub fn for_category(&self, category: ProviderCategory) -> Option<Amount> {
        match category {
            ProviderCategory::Miner => Some(self.miner),
            ProviderCategory::Sharder => Some(self.sharder),
            ProviderCategory::Blobber | ProviderCategory::Validator => None,
        }
    }

    /// Reward each rewarded provider of `category` receives this round.
    ///
    /// `None` when the category takes no block reward, rewards are
    /// disabled, or nobody is active.
    pub fn per_provider(
        &self,
        category: ProviderCategory,
        config: &ProtocolConfig,
        active: usize,
    ) -> Option<Amount> {
        let category_reward = self.for_category(category)?;
        let num_rewarded = config.num_rewarded(category)?;
        per_provider_reward(category_reward, num_rewarded, active)
    }
}

/// Total minted per round during `epoch`.
pub fn minted_at_epoch(config: &ProtocolConfig, epoch: u64) -> Amount {
    if config.block_reward <= 0 {
        return 0;
    }
    if config.reward_decline_rate == 0.0 {
        return config.block_reward;
    }
    let exponent = epoch.min(i32::MAX as u64) as i32;
    let factor = (1.0 - config.reward_decline_rate).powi(exponent);
    (config.block_reward as f64 * factor).floor() as Amount
}

/// Compute the block reward for `round`.
pub fn block_reward(round: Round, config: &ProtocolConfig) -> BlockReward {
    let epoch = config.epoch_of(round);
    let total = minted_at_epoch(config, epoch);
    let miner = (total as f64 * config.share_ratio).floor() as Amount;
    let miner = miner.clamp(0, total);

    tracing::trace!(round, epoch, total, miner, "block reward");

    BlockReward {
        round,
        epoch,
        total,
        miner,
        sharder: total - miner,
    }
}

/// Per-provider share of a category reward.
///
/// Divides by `min(num_rewarded, active)`. Zero rewarded slots or zero
/// active providers is the valid "rewards disabled" state and yields `None`.
pub fn per_provider_reward(category_reward: Amount, num_rewarded: u32, active: usize) -> Option<Amount> {
    let recipients = (num_rewarded as usize).min(active);
    if recipients == 0 {
        return None;
    }
    Some(category_reward / recipients as Amount)
}
