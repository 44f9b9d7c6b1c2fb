//! Provider Snapshot Source.
//!
//! There is no batch endpoint, so a snapshot issues one node query and one
//! stake pool query per provider, at most `max_concurrent_fetches` at a
//! time. Providers are read independently and may reflect slightly
//! different chain rounds; each [`Provider`] keeps the round its node
//! reported.
//!
//! Partial snapshots are never returned: the first provider that cannot be
//! read aborts the rest.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tally_client::{retry_with_backoff, ChainClient, ClientError, RetryConfig};
use tally_types::{ActiveProviders, Provider, ProviderCategory, ProviderKey, Snapshot};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{Result, SourceError};

/// Snapshot settings.
#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotConfig {
    /// Providers fetched at once.
    pub max_concurrent_fetches: usize,
    /// Retry policy per query.
    pub retry: RetryConfig,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 4,
            retry: RetryConfig::default(),
        }
    }
}

/// Reads provider state from a [`ChainClient`].
#[derive(Debug)]
pub struct ProviderSnapshotSource<C> {
    client: Arc<C>,
    config: SnapshotConfig,
}

impl<C: ChainClient> ProviderSnapshotSource<C> {
    /// Create a snapshot source.
    pub fn new(client: Arc<C>, config: SnapshotConfig) -> Self {
        Self { client, config }
    }

    /// Capture the current state of `keys`.
    ///
    /// Also records the latest finalized round and the active provider
    /// counts of the miner and sharder categories plus every category in
    /// `keys`. Duplicate keys are fetched once.
    ///
    /// # Errors
    ///
    /// - [`SourceError::NotFound`] if the chain does not know a provider
    /// - [`SourceError::InvalidProvider`] if a node document is unusable
    /// - [`SourceError::Fetch`] if a query fails permanently
    pub async fn snapshot(&self, keys: &[ProviderKey]) -> Result<Snapshot> {
        let unique: BTreeSet<ProviderKey> = keys.iter().cloned().collect();
        let taken_at = retry_with_backoff(&self.config.retry, "current round", || {
            self.client.get_current_round()
        })
        .await?;
        info!(taken_at, providers = unique.len(), "taking provider snapshot");

        let mut categories: BTreeSet<ProviderCategory> =
            [ProviderCategory::Miner, ProviderCategory::Sharder].into_iter().collect();
        categories.extend(unique.iter().map(|k| k.category));
        let active = self.active_counts(&categories).await?;

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_fetches.max(1)));
        let mut tasks = JoinSet::new();
        for key in unique {
            let client = self.client.clone();
            let retry = self.config.retry.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| SourceError::Task(e.to_string()))?;
                fetch_provider(client.as_ref(), &retry, &key).await
            });
        }

        let mut providers = BTreeMap::new();
        while let Some(joined) = tasks.join_next().await {
            match joined.map_err(|e| SourceError::Task(e.to_string()))? {
                Ok(provider) => {
                    providers.insert(provider.id.clone(), provider);
                }
                Err(error) => {
                    warn!(error = %error, "provider fetch failed, aborting snapshot");
                    tasks.abort_all();
                    return Err(error);
                }
            }
        }

        Ok(Snapshot {
            taken_at,
            providers,
            active,
        })
    }

    /// Count the active providers of each category.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Fetch`] if a provider list query fails.
    pub async fn active_counts(
        &self,
        categories: &BTreeSet<ProviderCategory>,
    ) -> Result<ActiveProviders> {
        let mut active = ActiveProviders::default();
        for &category in categories {
            let ids = retry_with_backoff(&self.config.retry, "provider list", || {
                self.client.list_providers(category)
            })
            .await?;
            debug!(category = %category, count = ids.len(), "active providers");
            active.set(category, ids.len());
        }
        Ok(active)
    }
}

async fn fetch_provider<C: ChainClient>(
    client: &C,
    retry: &RetryConfig,
    key: &ProviderKey,
) -> Result<Provider> {
    let not_found = |e: ClientError| match e {
        ClientError::NotFound(_) => SourceError::NotFound(key.to_string()),
        other => SourceError::Fetch(other),
    };

    let node = retry_with_backoff(retry, "node", || client.get_node(key))
        .await
        .map_err(not_found)?;
    let pools = retry_with_backoff(retry, "stake pool", || client.get_stake_pool(key))
        .await
        .map_err(not_found)?;

    if node.id != key.id {
        return Err(SourceError::InvalidProvider {
            key: key.to_string(),
            detail: format!("node reported id {}", node.id),
        });
    }

    let provider = Provider {
        id: node.id,
        category: key.category,
        round: node.round,
        total_reward: node.total_reward,
        current_reward: node.current_reward,
        service_charge: node.service_charge,
        stake_pools: pools.pools.into_iter().map(|p| (p.id.clone(), p)).collect(),
    };
    if !provider.service_charge_valid() {
        return Err(SourceError::InvalidProvider {
            key: key.to_string(),
            detail: format!("service charge {} outside [0, 1]", provider.service_charge),
        });
    }

    debug!(
        provider = %key,
        round = provider.round,
        total_reward = provider.total_reward,
        pools = provider.stake_pools.len(),
        "provider fetched"
    );
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tally_client::fake::{FakeChainClient, FakeMethod};
    use tally_client::NodeInfo;
    use tally_types::{DelegatePool, Round};

    use super::*;

    fn config() -> SnapshotConfig {
        SnapshotConfig {
            max_concurrent_fetches: 2,
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                multiplier: 2.0,
                call_timeout: Duration::from_secs(1),
            },
        }
    }

    fn node(id: &str, round: Round, total_reward: i64, service_charge: f64) -> NodeInfo {
        NodeInfo {
            id: id.to_string(),
            round,
            total_reward,
            current_reward: 0,
            service_charge,
        }
    }

    async fn fake() -> Arc<FakeChainClient> {
        let fake = Arc::new(FakeChainClient::new());
        let m1 = ProviderKey::new(ProviderCategory::Miner, "m1");
        let s1 = ProviderKey::new(ProviderCategory::Sharder, "s1");
        fake.insert_node(m1.clone(), 0, node("m1", 40, 1000, 0.2)).await;
        fake.insert_node(s1.clone(), 0, node("s1", 41, 2000, 0.1)).await;
        fake.insert_pools(
            m1,
            0,
            vec![DelegatePool {
                id: "p1".to_string(),
                balance: 100,
                reward: 5,
            }],
        )
        .await;
        fake.set_active(ProviderCategory::Miner, 0, vec!["m1".to_string(), "m2".to_string()])
            .await;
        fake.set_active(ProviderCategory::Sharder, 0, vec!["s1".to_string()]).await;
        fake.set_current_round(42).await;
        fake
    }

    #[tokio::test]
    async fn test_snapshot_reads_every_provider() {
        let source = ProviderSnapshotSource::new(fake().await, config());
        let keys = [
            ProviderKey::new(ProviderCategory::Miner, "m1"),
            ProviderKey::new(ProviderCategory::Sharder, "s1"),
            ProviderKey::new(ProviderCategory::Miner, "m1"),
        ];

        let snapshot = source.snapshot(&keys).await.expect("snapshot");
        assert_eq!(snapshot.taken_at, 42);
        assert_eq!(snapshot.providers.len(), 2);
        assert_eq!(snapshot.active.get(ProviderCategory::Miner), Some(2));
        assert_eq!(snapshot.active.get(ProviderCategory::Sharder), Some(1));

        let m1 = snapshot.provider("m1").expect("m1");
        assert_eq!(m1.round, 40);
        assert_eq!(m1.total_reward, 1000);
        assert_eq!(m1.stake_pools.get("p1").map(|p| p.balance), Some(100));

        let s1 = snapshot.provider("s1").expect("s1");
        assert_eq!(s1.category, ProviderCategory::Sharder);
        assert!(s1.stake_pools.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_provider_aborts_snapshot() {
        let source = ProviderSnapshotSource::new(fake().await, config());
        let keys = [
            ProviderKey::new(ProviderCategory::Miner, "m1"),
            ProviderKey::new(ProviderCategory::Miner, "ghost"),
        ];
        match source.snapshot(&keys).await {
            Err(SourceError::NotFound(key)) => assert_eq!(key, "miner:ghost"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_invalid_service_charge_rejected() {
        let fake = fake().await;
        let key = ProviderKey::new(ProviderCategory::Miner, "m9");
        fake.insert_node(key.clone(), 0, node("m9", 40, 0, 1.5)).await;
        let source = ProviderSnapshotSource::new(fake, config());
        assert!(matches!(
            source.snapshot(&[key]).await,
            Err(SourceError::InvalidProvider { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_retried() {
        let fake = fake().await;
        fake.fail_next(FakeMethod::Node, 1).await;
        fake.fail_next(FakeMethod::ListProviders, 2).await;
        let source = ProviderSnapshotSource::new(fake.clone(), config());

        let snapshot = source
            .snapshot(&[ProviderKey::new(ProviderCategory::Miner, "m1")])
            .await
            .expect("snapshot after retries");
        assert_eq!(snapshot.providers.len(), 1);
        assert_eq!(fake.calls(FakeMethod::Node).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fail_snapshot() {
        let fake = fake().await;
        fake.fail_next(FakeMethod::StakePool, 10).await;
        let source = ProviderSnapshotSource::new(fake, config());
        assert!(matches!(
            source
                .snapshot(&[ProviderKey::new(ProviderCategory::Miner, "m1")])
                .await,
            Err(SourceError::Fetch(ClientError::RetriesExhausted { .. }))
        ));
    }
}
