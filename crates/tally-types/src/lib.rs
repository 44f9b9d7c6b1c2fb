//! # tally-types
//!
//! Shared domain types for the reward-distribution oracle: rounds,
//! providers and their delegate pools, the reward events the chain posts
//! each round, and the protocol configuration that governs them.
//!
//! ## Modules
//!
//! - [`provider`] — Providers, delegate pools and point-in-time snapshots
//! - [`events`] — Reward events and per-round block metadata
//! - [`config`] — Protocol configuration parsed from the flat key map
//! - [`chain`] — Chain-wide aggregate snapshots

pub mod chain;
pub mod config;
pub mod events;
pub mod provider;

pub use chain::ChainSnapshot;
pub use config::ProtocolConfig;
pub use events::{BlockMetadata, DelegateRewardEvent, ProviderRewardEvent, RewardType, RoundRecord};
pub use provider::{ActiveProviders, DelegatePool, Provider, ProviderCategory, ProviderKey, Snapshot};

/// A chain round sequence number.
pub type Round = u64;

/// Token amount in minor units. Signed so that penalties and deltas fit.
pub type Amount = i64;

/// Stable provider identifier.
pub type ProviderId = String;

/// Delegate stake pool identifier.
pub type PoolId = String;

/// Error types for domain parsing.
#[derive(Debug, thiserror::Error)]
pub enum TypesError {
    /// A mandatory protocol configuration key is absent.
    #[error("missing protocol config key `{0}`")]
    MissingConfigKey(String),

    /// A protocol configuration value could not be parsed.
    #[error("invalid value for protocol config key `{key}`: {value:?}")]
    InvalidConfigValue {
        /// The offending key.
        key: String,
        /// The raw value.
        value: String,
    },

    /// The epoch length is zero.
    #[error("protocol epoch length must be positive")]
    ZeroEpoch,

    /// A provider category string is not recognised.
    #[error("unknown provider category: {0}")]
    UnknownCategory(String),

    /// A provider key string is not `category:id`.
    #[error("malformed provider key {0:?}, expected `category:id`")]
    MalformedProviderKey(String),
}

/// Convenience result type for domain parsing.
pub type Result<T> = std::result::Result<T, TypesError>;

/// Epoch index of `round` for an epoch of `epoch_length` rounds.
///
/// `epoch_length` must be non-zero; [`ProtocolConfig`] guarantees this.
pub fn epoch_of(round: Round, epoch_length: u64) -> u64 {
    round / epoch_length.max(1)
}
