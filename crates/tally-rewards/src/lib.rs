//! # tally-rewards
//!
//! Pure reward arithmetic: what the protocol should have paid.
//!
//! Nothing in this crate performs I/O. Given a round and the protocol
//! configuration it computes the block reward minted for each provider
//! category, the per-provider share, and how a provider's reward divides
//! between its service charge and its delegate pools.
//!
//! ## Modules
//!
//! - [`block`] — Block Reward Calculator
//! - [`split`] — Service-charge split and stake-proportional pool split
//! - [`tolerance`] — Absolute/relative comparison tolerance

pub mod block;
pub mod split;
pub mod tolerance;

pub use block::{block_reward, per_provider_reward, BlockReward};
pub use split::{distribute_by_stake, split_service_charge, ServiceChargeSplit};
pub use tolerance::{Comparison, Tolerance};

/// Error types for reward arithmetic.
#[derive(Debug, thiserror::Error)]
pub enum RewardError {
    /// Service charge outside `[0, 1]`.
    #[error("service charge {0} outside [0, 1]")]
    InvalidServiceCharge(f64),

    /// A pool has a negative balance.
    #[error("pool {pool} has negative balance {balance}")]
    NegativeStake {
        /// Pool ID.
        pool: String,
        /// The balance.
        balance: i64,
    },

    /// No pools to distribute to.
    #[error("no delegate pools to distribute to")]
    NoPools,

    /// Arithmetic overflow.
    #[error("arithmetic overflow in reward calculation")]
    Overflow,
}

/// Convenience result type for reward arithmetic.
pub type Result<T> = std::result::Result<T, RewardError>;
