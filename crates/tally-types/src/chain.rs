//! Chain-wide aggregate snapshots.

use serde::{Deserialize, Serialize};

use crate::{Amount, Round};

/// Aggregate totals the chain records periodically.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    /// Round the aggregate was taken at.
    pub round: Round,
    /// Total tokens minted.
    #[serde(default)]
    pub total_mint: Amount,
    /// Circulating supply.
    #[serde(default)]
    pub zcn_supply: Amount,
    /// Tokens minted by block production.
    #[serde(default)]
    pub mined_total: Amount,
    /// Total rewards paid out.
    #[serde(default)]
    pub total_rewards: Amount,
    /// Transactions processed.
    #[serde(default)]
    pub transactions_count: u64,
}
