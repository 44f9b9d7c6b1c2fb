//! Reward events and per-round block metadata.
//!
//! Events are immutable facts produced by the chain. The oracle only reads
//! them. Reward types travel as integer codes on the wire; codes this
//! crate does not know decode to [`RewardType::Unknown`] instead of
//! failing, so that the verifier can report them as protocol violations.

use serde::{Deserialize, Serialize};

use crate::{Amount, PoolId, ProviderCategory, ProviderId, Round};

/// Category-qualified reward type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum RewardType {
    /// Minimum lock demand paid to a blobber.
    MinLockDemandReward,
    /// Block reward paid to a miner.
    BlockRewardMiner,
    /// Block reward paid to a sharder.
    BlockRewardSharder,
    /// Block reward paid to a blobber.
    BlockRewardBlobber,
    /// Transaction fee reward paid to a miner.
    FeeRewardMiner,
    /// Transaction fee reward paid to a sharder.
    FeeRewardSharder,
    /// Reward paid to a validator for a challenge validation.
    ValidationReward,
    /// Read marker redemption paid to a blobber.
    FileDownloadReward,
    /// Passed storage challenge.
    ChallengePassReward,
    /// Failed storage challenge; posted with a negative amount.
    ChallengeSlashPenalty,
    /// Allocation cancellation charge.
    CancellationChargeReward,
    /// Any code this oracle does not recognise.
    Unknown(i32),
}

const MINER_TYPES: &[RewardType] = &[RewardType::BlockRewardMiner, RewardType::FeeRewardMiner];

const SHARDER_TYPES: &[RewardType] = &[
    RewardType::BlockRewardSharder,
    RewardType::FeeRewardSharder,
];

const BLOBBER_TYPES: &[RewardType] = &[
    RewardType::BlockRewardBlobber,
    RewardType::ChallengePassReward,
    RewardType::ChallengeSlashPenalty,
    RewardType::FileDownloadReward,
    RewardType::MinLockDemandReward,
    RewardType::CancellationChargeReward,
];

const VALIDATOR_TYPES: &[RewardType] = &[RewardType::ValidationReward];

impl RewardType {
    /// Wire code.
    pub fn code(&self) -> i32 {
        match self {
            RewardType::MinLockDemandReward => 0,
            RewardType::BlockRewardMiner => 1,
            RewardType::BlockRewardSharder => 2,
            RewardType::BlockRewardBlobber => 3,
            RewardType::FeeRewardMiner => 4,
            RewardType::FeeRewardSharder => 5,
            RewardType::ValidationReward => 6,
            RewardType::FileDownloadReward => 7,
            RewardType::ChallengePassReward => 8,
            RewardType::ChallengeSlashPenalty => 9,
            RewardType::CancellationChargeReward => 10,
            RewardType::Unknown(code) => *code,
        }
    }

    /// Whether this is a block reward of any category.
    pub fn is_block_reward(&self) -> bool {
        matches!(
            self,
            RewardType::BlockRewardMiner
                | RewardType::BlockRewardSharder
                | RewardType::BlockRewardBlobber
        )
    }

    /// Block reward type paid to providers of `category`, if any.
    pub fn block_reward_for(category: ProviderCategory) -> Option<RewardType> {
        match category {
            ProviderCategory::Miner => Some(RewardType::BlockRewardMiner),
            ProviderCategory::Sharder => Some(RewardType::BlockRewardSharder),
            ProviderCategory::Blobber => Some(RewardType::BlockRewardBlobber),
            ProviderCategory::Validator => None,
        }
    }

    /// Reward types a provider of `category` may legitimately receive.
    pub fn recognized_for(category: ProviderCategory) -> &'static [RewardType] {
        match category {
            ProviderCategory::Miner => MINER_TYPES,
            ProviderCategory::Sharder => SHARDER_TYPES,
            ProviderCategory::Blobber => BLOBBER_TYPES,
            ProviderCategory::Validator => VALIDATOR_TYPES,
        }
    }

    /// Whether `self` is recognised for `category`.
    pub fn is_recognized_for(&self, category: ProviderCategory) -> bool {
        Self::recognized_for(category).contains(self)
    }
}

impl From<i32> for RewardType {
    fn from(code: i32) -> Self {
        match code {
            0 => RewardType::MinLockDemandReward,
            1 => RewardType::BlockRewardMiner,
            2 => RewardType::BlockRewardSharder,
            3 => RewardType::BlockRewardBlobber,
            4 => RewardType::FeeRewardMiner,
            5 => RewardType::FeeRewardSharder,
            6 => RewardType::ValidationReward,
            7 => RewardType::FileDownloadReward,
            8 => RewardType::ChallengePassReward,
            9 => RewardType::ChallengeSlashPenalty,
            10 => RewardType::CancellationChargeReward,
            other => RewardType::Unknown(other),
        }
    }
}

impl From<RewardType> for i32 {
    fn from(reward_type: RewardType) -> Self {
        reward_type.code()
    }
}

/// A single reward posting to a provider for a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderRewardEvent {
    /// Round of the posting.
    pub round: Round,
    /// Receiving provider.
    pub provider_id: ProviderId,
    /// Reward type.
    pub reward_type: RewardType,
    /// Posted amount.
    pub amount: Amount,
}

/// A single reward posting to a delegate pool for a round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateRewardEvent {
    /// Round of the posting.
    pub round: Round,
    /// Receiving pool.
    pub pool_id: PoolId,
    /// Provider owning the pool.
    pub provider_id: ProviderId,
    /// Reward type.
    pub reward_type: RewardType,
    /// Posted amount.
    pub amount: Amount,
}

/// Per-round block metadata.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    /// Round of the block.
    pub round: Round,
    /// Winner of the round's block-producer lottery.
    pub miner_id: ProviderId,
    /// Sum of transaction fees included in the block.
    #[serde(default)]
    pub transaction_fees: Amount,
}

/// Everything the chain recorded for one round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// The round.
    pub round: Round,
    /// Provider reward postings.
    pub provider_rewards: Vec<ProviderRewardEvent>,
    /// Delegate reward postings.
    pub delegate_rewards: Vec<DelegateRewardEvent>,
    /// Block metadata.
    pub block: BlockMetadata,
}

impl RoundRecord {
    /// Create an empty record for a round whose block was produced by `miner_id`.
    pub fn new(round: Round, miner_id: impl Into<ProviderId>) -> Self {
        Self {
            round,
            provider_rewards: Vec::new(),
            delegate_rewards: Vec::new(),
            block: BlockMetadata {
                round,
                miner_id: miner_id.into(),
                transaction_fees: 0,
            },
        }
    }

    /// Provider postings of a given reward type.
    pub fn provider_rewards_of(
        &self,
        reward_type: RewardType,
    ) -> impl Iterator<Item = &ProviderRewardEvent> + '_ {
        self.provider_rewards
            .iter()
            .filter(move |e| e.reward_type == reward_type)
    }

    /// Delegate postings to pools of `provider_id`.
    pub fn delegate_rewards_for<'a>(
        &'a self,
        provider_id: &'a str,
    ) -> impl Iterator<Item = &'a DelegateRewardEvent> + 'a {
        self.delegate_rewards
            .iter()
            .filter(move |e| e.provider_id == provider_id)
    }
}
