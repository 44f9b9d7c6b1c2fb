//! Protocol Parameter Source.

use std::sync::Arc;

use tally_client::{retry_with_backoff, ChainClient, RetryConfig};
use tally_types::ProtocolConfig;
use tracing::info;

use crate::Result;

/// Reads and parses the smart-contract configuration.
#[derive(Debug)]
pub struct ProtocolParamSource<C> {
    client: Arc<C>,
    retry: RetryConfig,
}

impl<C: ChainClient> ProtocolParamSource<C> {
    /// Create a parameter source.
    pub fn new(client: Arc<C>, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    /// Fetch the current protocol configuration.
    ///
    /// # Errors
    ///
    /// - [`SourceError::Fetch`](crate::SourceError::Fetch) if the query fails permanently
    /// - [`SourceError::Config`](crate::SourceError::Config) if a key is missing or malformed
    pub async fn fetch(&self) -> Result<ProtocolConfig> {
        let fields = retry_with_backoff(&self.retry, "protocol config", || {
            self.client.get_protocol_config()
        })
        .await?;
        let config = ProtocolConfig::from_fields(&fields)?;
        info!(
            epoch = config.epoch,
            block_reward = config.block_reward,
            share_ratio = config.share_ratio,
            num_miners_rewarded = config.num_miners_rewarded,
            num_sharders_rewarded = config.num_sharders_rewarded,
            "protocol config loaded"
        );
        Ok(config)
    }
}
