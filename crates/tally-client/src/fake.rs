//! In-memory [`ChainClient`] for tests.
//!
//! Fixtures are keyed by the round from which they are visible, so one
//! fake can serve both the "before" and "after" view of a provider: every
//! query answers with the latest fixture at or before the fake's current
//! round. The current round can advance on every `get_current_round` call
//! to imitate a live chain. Transient failures and response latency can be
//! injected per method.

use std::collections::BTreeMap;
use std::time::Duration;

use tally_types::{
    ChainSnapshot, DelegatePool, ProviderCategory, ProviderId, ProviderKey, Round, RoundRecord,
};
use tokio::sync::Mutex;

use crate::{ChainClient, ClientError, NodeInfo, Result, RoundHistoryPage, StakePoolInfo};

/// Method selector for failure injection and call counting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FakeMethod {
    /// [`ChainClient::get_node`]
    Node,
    /// [`ChainClient::get_stake_pool`]
    StakePool,
    /// [`ChainClient::get_round_history`]
    RoundHistory,
    /// [`ChainClient::get_protocol_config`]
    ProtocolConfig,
    /// [`ChainClient::get_snapshots`]
    Snapshots,
    /// [`ChainClient::get_current_round`]
    CurrentRound,
    /// [`ChainClient::list_providers`]
    ListProviders,
}

#[derive(Debug, Default)]
struct FakeState {
    current_round: Round,
    advance_per_query: Round,
    nodes: BTreeMap<ProviderKey, BTreeMap<Round, NodeInfo>>,
    pools: BTreeMap<ProviderKey, BTreeMap<Round, StakePoolInfo>>,
    rounds: BTreeMap<Round, RoundRecord>,
    configs: BTreeMap<Round, BTreeMap<String, String>>,
    active: BTreeMap<ProviderCategory, BTreeMap<Round, Vec<ProviderId>>>,
    snapshots: Vec<ChainSnapshot>,
    pending_failures: BTreeMap<FakeMethod, u32>,
    latency: BTreeMap<FakeMethod, Duration>,
    calls: BTreeMap<FakeMethod, u32>,
}

impl FakeState {
    fn begin(&mut self, method: FakeMethod) -> Result<()> {
        *self.calls.entry(method).or_default() += 1;
        if let Some(remaining) = self.pending_failures.get_mut(&method) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ClientError::Transport(format!(
                    "injected failure for {method:?}"
                )));
            }
        }
        Ok(())
    }
}

fn at_or_before<T>(history: &BTreeMap<Round, T>, round: Round) -> Option<&T> {
    history.range(..=round).next_back().map(|(_, value)| value)
}

/// Fixture-backed chain client.
#[derive(Debug, Default)]
pub struct FakeChainClient {
    state: Mutex<FakeState>,
}

impl FakeChainClient {
    /// Create an empty fake at round 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the latest finalized round.
    pub async fn set_current_round(&self, round: Round) {
        self.state.lock().await.current_round = round;
    }

    /// Latest finalized round, without advancing it.
    pub async fn current_round(&self) -> Round {
        self.state.lock().await.current_round
    }

    /// Advance the current round by `step` on every `get_current_round` call.
    pub async fn advance_per_query(&self, step: Round) {
        self.state.lock().await.advance_per_query = step;
    }

    /// Make a node state visible from round `visible_from` onwards.
    pub async fn insert_node(&self, key: ProviderKey, visible_from: Round, node: NodeInfo) {
        self.state
            .lock()
            .await
            .nodes
            .entry(key)
            .or_default()
            .insert(visible_from, node);
    }

    /// Make a stake pool state visible from round `visible_from` onwards.
    pub async fn insert_pools(&self, key: ProviderKey, visible_from: Round, pools: Vec<DelegatePool>) {
        self.state
            .lock()
            .await
            .pools
            .entry(key)
            .or_default()
            .insert(visible_from, StakePoolInfo { pools });
    }

    /// Record a round's events and block metadata, replacing any previous record.
    pub async fn insert_round(&self, record: RoundRecord) {
        self.state.lock().await.rounds.insert(record.round, record);
    }

    /// Make a protocol config visible from round `visible_from` onwards.
    pub async fn set_protocol_config(&self, visible_from: Round, fields: BTreeMap<String, String>) {
        self.state.lock().await.configs.insert(visible_from, fields);
    }

    /// Make an active provider list visible from round `visible_from` onwards.
    pub async fn set_active(&self, category: ProviderCategory, visible_from: Round, ids: Vec<ProviderId>) {
        self.state
            .lock()
            .await
            .active
            .entry(category)
            .or_default()
            .insert(visible_from, ids);
    }

    /// Append an aggregate chain snapshot.
    pub async fn push_snapshot(&self, snapshot: ChainSnapshot) {
        let mut state = self.state.lock().await;
        state.snapshots.push(snapshot);
        state.snapshots.sort_by_key(|s| s.round);
    }

    /// Fail the next `times` calls of `method` with a transient error.
    pub async fn fail_next(&self, method: FakeMethod, times: u32) {
        self.state.lock().await.pending_failures.insert(method, times);
    }

    /// Delay every later call of `method` by `latency` before it answers.
    pub async fn set_latency(&self, method: FakeMethod, latency: Duration) {
        self.state.lock().await.latency.insert(method, latency);
    }

    async fn respond_after_latency(&self, method: FakeMethod) {
        let latency = self.state.lock().await.latency.get(&method).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Number of calls made to `method`, failed ones included.
    pub async fn calls(&self, method: FakeMethod) -> u32 {
        self.state
            .lock()
            .await
            .calls
            .get(&method)
            .copied()
            .unwrap_or_default()
    }
}

impl ChainClient for FakeChainClient {
    async fn get_node(&self, key: &ProviderKey) -> Result<NodeInfo> {
        self.respond_after_latency(FakeMethod::Node).await;
        let mut state = self.state.lock().await;
        state.begin(FakeMethod::Node)?;
        let round = state.current_round;
        state
            .nodes
            .get(key)
            .and_then(|history| at_or_before(history, round))
            .cloned()
            .ok_or_else(|| ClientError::NotFound(key.to_string()))
    }

    async fn get_stake_pool(&self, key: &ProviderKey) -> Result<StakePoolInfo> {
        self.respond_after_latency(FakeMethod::StakePool).await;
        let mut state = self.state.lock().await;
        state.begin(FakeMethod::StakePool)?;
        let round = state.current_round;
        if !state.nodes.contains_key(key) {
            return Err(ClientError::NotFound(key.to_string()));
        }
        Ok(state
            .pools
            .get(key)
            .and_then(|history| at_or_before(history, round))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_round_history(&self, from: Round, to: Round) -> Result<RoundHistoryPage> {
        self.respond_after_latency(FakeMethod::RoundHistory).await;
        let mut state = self.state.lock().await;
        state.begin(FakeMethod::RoundHistory)?;
        if to > state.current_round {
            return Err(ClientError::RoundNotFinalized(from.max(state.current_round + 1)));
        }

        let mut page = RoundHistoryPage::default();
        for record in state.rounds.range(from..=to).map(|(_, r)| r) {
            page.provider_rewards.extend(record.provider_rewards.iter().cloned());
            page.delegate_rewards.extend(record.delegate_rewards.iter().cloned());
            page.blocks.push(record.block.clone());
        }
        Ok(page)
    }

    async fn get_protocol_config(&self) -> Result<BTreeMap<String, String>> {
        self.respond_after_latency(FakeMethod::ProtocolConfig).await;
        let mut state = self.state.lock().await;
        state.begin(FakeMethod::ProtocolConfig)?;
        let round = state.current_round;
        at_or_before(&state.configs, round)
            .cloned()
            .ok_or_else(|| ClientError::NotFound("protocol config".to_string()))
    }

    async fn get_snapshots(&self, round: Round, limit: usize) -> Result<Vec<ChainSnapshot>> {
        self.respond_after_latency(FakeMethod::Snapshots).await;
        let mut state = self.state.lock().await;
        state.begin(FakeMethod::Snapshots)?;
        Ok(state
            .snapshots
            .iter()
            .filter(|s| s.round >= round)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_current_round(&self) -> Result<Round> {
        self.respond_after_latency(FakeMethod::CurrentRound).await;
        let mut state = self.state.lock().await;
        state.begin(FakeMethod::CurrentRound)?;
        state.current_round += state.advance_per_query;
        Ok(state.current_round)
    }

    async fn list_providers(&self, category: ProviderCategory) -> Result<Vec<ProviderId>> {
        self.respond_after_latency(FakeMethod::ListProviders).await;
        let mut state = self.state.lock().await;
        state.begin(FakeMethod::ListProviders)?;
        let round = state.current_round;
        Ok(state
            .active
            .get(&category)
            .and_then(|history| at_or_before(history, round))
            .cloned()
            .unwrap_or_default())
    }
}
