//! # tally-client
//!
//! Typed access to a chain node's query API.
//!
//! All reads go through the [`ChainClient`] trait, whose methods return the
//! structured types of `tally-types` directly. The HTTP implementation is one
//! pluggable backend; [`fake::FakeChainClient`] answers from in-memory
//! fixtures for tests.
//!
//! ## Modules
//!
//! - [`http`] — `reqwest` backend against the node's event-database endpoints
//! - [`fake`] — In-memory backend with scripted failures
//! - [`retry`] — Bounded retry with exponential backoff and per-call timeout
//! - [`poll`] — Poll-with-deadline returning a typed outcome

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_types::{
    Amount, BlockMetadata, ChainSnapshot, DelegatePool, DelegateRewardEvent, ProviderCategory,
    ProviderId, ProviderKey, ProviderRewardEvent, Round,
};

pub mod fake;
pub mod http;
pub mod poll;
pub mod retry;

pub use poll::{poll_until, PollConfig, PollOutcome, Probe};
pub use retry::{retry_with_backoff, RetryConfig};

/// Error types for chain queries.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connection-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// A single call exceeded its timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Non-success HTTP status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// The requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The chain has not finalized the requested round yet.
    #[error("round {0} is not finalized yet")]
    RoundNotFinalized(Round),

    /// The response body did not decode.
    #[error("malformed response: {0}")]
    Decode(String),

    /// Transient failures persisted through every attempt.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// The final error.
        last: Box<ClientError>,
    },
}

impl ClientError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ClientError::Transport(_) | ClientError::Timeout(_) => true,
            ClientError::Status { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

/// Convenience result type for chain queries.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Node document without its stake pools.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Provider ID.
    pub id: ProviderId,
    /// Round at which the reward fields were last updated.
    pub round: Round,
    /// Lifetime accrued reward.
    pub total_reward: Amount,
    /// Current-period accrued reward.
    pub current_reward: Amount,
    /// Service charge fraction.
    pub service_charge: f64,
}

/// Stake pool state of a provider.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakePoolInfo {
    /// Delegate pools.
    #[serde(alias = "delegate", default)]
    pub pools: Vec<DelegatePool>,
}

/// Reward events and block metadata for a round range.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundHistoryPage {
    /// Provider reward postings.
    #[serde(default)]
    pub provider_rewards: Vec<ProviderRewardEvent>,
    /// Delegate reward postings.
    #[serde(default)]
    pub delegate_rewards: Vec<DelegateRewardEvent>,
    /// Block metadata, one per round.
    #[serde(default)]
    pub blocks: Vec<BlockMetadata>,
}

/// Read-only query interface of a chain node.
///
/// Every method is a single logical request. Retrying and timeouts are the
/// caller's concern (see [`retry`]).
pub trait ChainClient: Send + Sync + 'static {
    /// Current state of a provider.
    fn get_node(&self, key: &ProviderKey) -> impl Future<Output = Result<NodeInfo>> + Send;

    /// Delegate pools of a provider.
    fn get_stake_pool(&self, key: &ProviderKey)
        -> impl Future<Output = Result<StakePoolInfo>> + Send;

    /// Reward events and block metadata for `[from, to]`.
    fn get_round_history(
        &self,
        from: Round,
        to: Round,
    ) -> impl Future<Output = Result<RoundHistoryPage>> + Send;

    /// Smart-contract configuration as a flat key map.
    fn get_protocol_config(
        &self,
    ) -> impl Future<Output = Result<BTreeMap<String, String>>> + Send;

    /// Up to `limit` aggregate snapshots starting at `round`.
    fn get_snapshots(
        &self,
        round: Round,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<ChainSnapshot>>> + Send;

    /// Latest finalized round.
    fn get_current_round(&self) -> impl Future<Output = Result<Round>> + Send;

    /// IDs of the active providers of a category.
    fn list_providers(
        &self,
        category: ProviderCategory,
    ) -> impl Future<Output = Result<Vec<ProviderId>>> + Send;
}
