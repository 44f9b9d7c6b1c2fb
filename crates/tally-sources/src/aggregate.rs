//! Chain-wide aggregate totals.
//!
//! The chain keeps one aggregate snapshot per round. A bracket pairs the
//! snapshot just before a window with the one at its last round, so the
//! difference of their totals is what the chain minted and paid inside
//! the window.

use std::sync::Arc;

use tally_client::{retry_with_backoff, ChainClient, RetryConfig};
use tally_types::{Amount, ChainSnapshot, Round};
use tracing::debug;

use crate::Result;

/// Aggregate snapshots at `from - 1` and `to`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateBracket {
    /// Snapshot at the round before the window.
    pub start: ChainSnapshot,
    /// Snapshot at the window's last round.
    pub end: ChainSnapshot,
}

impl AggregateBracket {
    /// Rewards the chain recorded inside the window.
    pub fn rewards_paid(&self) -> Amount {
        self.end.total_rewards - self.start.total_rewards
    }

    /// Tokens minted inside the window.
    pub fn minted(&self) -> Amount {
        self.end.total_mint - self.start.total_mint
    }
}

/// Reads aggregate snapshots.
#[derive(Debug)]
pub struct AggregateSource<C> {
    client: Arc<C>,
    retry: RetryConfig,
}

impl<C: ChainClient> AggregateSource<C> {
    /// Create an aggregate source.
    pub fn new(client: Arc<C>, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// Snapshot recorded exactly at `round`, if the chain kept one.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Fetch`](crate::SourceError::Fetch) if the query fails permanently.
    pub async fn at(&self, round: Round) -> Result<Option<ChainSnapshot>> {
        let snapshots = retry_with_backoff(&self.retry, "aggregate snapshot", || {
            self.client.get_snapshots(round, 1)
        })
        .await?;
        Ok(snapshots.into_iter().find(|s| s.round == round))
    }

    /// Bracket the window `[from, to]`.
    ///
    /// `None` if either bounding snapshot is missing or `from` is round zero.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Fetch`](crate::SourceError::Fetch) if a query fails permanently.
    pub async fn bracket(&self, from: Round, to: Round) -> Result<Option<AggregateBracket>> {
        let Some(before) = from.checked_sub(1) else {
            return Ok(None);
        };
        let start = self.at(before).await?;
        let end = self.at(to).await?;
        debug!(from, to, found_start = start.is_some(), found_end = end.is_some(), "aggregate bracket");
        Ok(start.zip(end).map(|(start, end)| AggregateBracket { start, end }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tally_client::fake::FakeChainClient;

    use super::*;

    fn snapshot(round: Round, total_rewards: Amount) -> ChainSnapshot {
        ChainSnapshot {
            round,
            total_mint: total_rewards * 2,
            zcn_supply: 0,
            mined_total: 0,
            total_rewards,
            transactions_count: 0,
        }
    }

    fn retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 1,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            multiplier: 1.0,
            call_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_bracket_differences() {
        let fake = Arc::new(FakeChainClient::new());
        fake.push_snapshot(snapshot(9, 1_000)).await;
        fake.push_snapshot(snapshot(19, 11_000)).await;
        fake.push_snapshot(snapshot(20, 12_000)).await;

        let source = AggregateSource::new(fake, retry());
        let bracket = source.bracket(10, 20).await.expect("bracket").expect("present");
        assert_eq!(bracket.rewards_paid(), 11_000);
        assert_eq!(bracket.minted(), 22_000);
    }

    #[tokio::test]
    async fn test_missing_snapshot_yields_none() {
        let fake = Arc::new(FakeChainClient::new());
        fake.push_snapshot(snapshot(20, 12_000)).await;

        let source = AggregateSource::new(fake, retry());
        assert_eq!(source.bracket(10, 20).await.expect("bracket"), None);
        assert_eq!(source.bracket(0, 20).await.expect("bracket"), None);
    }
}
