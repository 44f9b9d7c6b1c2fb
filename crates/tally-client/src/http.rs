//! HTTP backend against a node's event-database query endpoints.
//!
//! Miner and sharder state lives under the miner smart contract; blobbers,
//! validators and the reward event tables under the storage smart contract.
//! List endpoints are paged with `offset`/`limit`; a page shorter than
//! `limit` ends the listing.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tally_types::{
    Amount, BlockMetadata, ChainSnapshot, DelegateRewardEvent, ProviderCategory, ProviderId,
    ProviderKey, ProviderRewardEvent, Round,
};
use tracing::debug;

use crate::{ChainClient, ClientError, NodeInfo, Result, RoundHistoryPage, StakePoolInfo};

/// Miner smart contract address.
pub const MINER_SC: &str = "6dba10422e368813802877a85039d3985d96760ed844092319743fb3a76712d9";

/// Storage smart contract address.
pub const STORAGE_SC: &str = "6dba10422e368813802877a85039d3985d96760ed844092319743fb3a76712d7";

/// Default page size for paged listings.
pub const DEFAULT_PAGE_LIMIT: usize = 50;

/// `reqwest`-backed [`ChainClient`].
#[derive(Clone, Debug)]
pub struct HttpChainClient {
    client: reqwest::Client,
    base_url: String,
    page_limit: usize,
}

impl HttpChainClient {
    /// Create a client for the node at `base_url` (e.g. `https://sharder-1.example:7171`).
    ///
    /// `call_timeout` bounds each HTTP request.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Transport`] if the HTTP client cannot be built
    pub fn new(base_url: &str, call_timeout: Duration, page_limit: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(call_timeout)
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            page_limit: page_limit.max(1),
        })
    }

    /// Base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, ?query, "GET");

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| map_reqwest_error(&url, e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ClientError::NotFound(url));
        }
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                url,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Decode(format!("{url}: {e}")))
    }

    fn page_query<'q>(&self, query: &[(&'q str, String)], offset: usize) -> Vec<(&'q str, String)> {
        let mut page_query = query.to_vec();
        page_query.push(("offset", offset.to_string()));
        page_query.push(("limit", self.page_limit.to_string()));
        page_query
    }

    async fn get_page<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
        offset: usize,
    ) -> Result<Vec<T>> {
        self.get_json(path, &self.page_query(query, offset)).await
    }

    async fn list_page(
        &self,
        path: &str,
        category: ProviderCategory,
        offset: usize,
    ) -> Result<Vec<ProviderId>> {
        let query = self.page_query(&[("active", "true".to_string())], offset);
        let page: NodeListDto = self.get_json(path, &query).await?;
        page.nodes
            .iter()
            .map(|entry| {
                listed_id(entry)
                    .ok_or_else(|| ClientError::Decode(format!("{category} list entry without id")))
            })
            .collect()
    }

    async fn get_paged<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        collect_pages(self.page_limit, move |offset| self.get_page(path, query, offset)).await
    }
}

/// Fetch pages at increasing offsets until one comes back shorter than
/// `limit`. A full last page costs one extra, empty request.
async fn collect_pages<T, F, Fut>(limit: usize, mut fetch_page: F) -> Result<Vec<T>>
where
    F: FnMut(usize) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut items = Vec::new();
    let mut offset = 0usize;
    loop {
        let page = fetch_page(offset).await?;
        let len = page.len();
        items.extend(page);
        if len < limit {
            return Ok(items);
        }
        offset += len;
    }
}

fn map_reqwest_error(url: &str, error: reqwest::Error) -> ClientError {
    if error.is_decode() {
        ClientError::Decode(format!("{url}: {error}"))
    } else {
        ClientError::Transport(format!("{url}: {error}"))
    }
}

fn sc_path(sc: &str, endpoint: &str) -> String {
    format!("/v1/screst/{sc}/{endpoint}")
}

/// Provider type code used by the stake pool endpoints.
fn provider_type_code(category: ProviderCategory) -> u8 {
    match category {
        ProviderCategory::Miner => 1,
        ProviderCategory::Sharder => 2,
        ProviderCategory::Blobber => 3,
        ProviderCategory::Validator => 4,
    }
}

fn contract_for(category: ProviderCategory) -> &'static str {
    match category {
        ProviderCategory::Miner | ProviderCategory::Sharder => MINER_SC,
        ProviderCategory::Blobber | ProviderCategory::Validator => STORAGE_SC,
    }
}

#[derive(Debug, Deserialize)]
struct StakePoolSettingsDto {
    service_charge: f64,
}

/// Fields the checks depend on are required; a document missing one is a
/// decode error, never a zero.
#[derive(Debug, Deserialize)]
struct NodeDto {
    #[serde(alias = "validator_id")]
    id: ProviderId,
    #[serde(alias = "round_service_charge_last_updated")]
    round: Round,
    total_reward: Amount,
    /// Informational only.
    #[serde(default)]
    current_reward: Amount,
    #[serde(default)]
    service_charge: Option<f64>,
    #[serde(default)]
    stake_pool_settings: Option<StakePoolSettingsDto>,
}

/// Miner and sharder documents are wrapped in `simple_miner`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NodeEnvelope {
    Wrapped { simple_miner: NodeDto },
    Plain(NodeDto),
}

impl TryFrom<NodeEnvelope> for NodeInfo {
    type Error = ClientError;

    fn try_from(envelope: NodeEnvelope) -> Result<Self> {
        let dto = match envelope {
            NodeEnvelope::Wrapped { simple_miner } => simple_miner,
            NodeEnvelope::Plain(dto) => dto,
        };
        let service_charge = dto
            .service_charge
            .or(dto.stake_pool_settings.map(|s| s.service_charge))
            .ok_or_else(|| ClientError::Decode(format!("node {} has no service charge", dto.id)))?;
        Ok(NodeInfo {
            id: dto.id,
            round: dto.round,
            total_reward: dto.total_reward,
            current_reward: dto.current_reward,
            service_charge,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ConfigDto {
    fields: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct NodeListDto {
    #[serde(alias = "Nodes", default)]
    nodes: Vec<serde_json::Value>,
}

/// Extract an ID from a list entry of any provider listing shape.
fn listed_id(entry: &serde_json::Value) -> Option<ProviderId> {
    entry
        .get("simple_miner")
        .and_then(|m| m.get("id"))
        .or_else(|| entry.get("id"))
        .or_else(|| entry.get("validator_id"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl ChainClient for HttpChainClient {
    async fn get_node(&self, key: &ProviderKey) -> Result<NodeInfo> {
        let (path, query) = match key.category {
            ProviderCategory::Miner | ProviderCategory::Sharder => {
                (sc_path(MINER_SC, "nodeStat"), vec![("id", key.id.clone())])
            }
            ProviderCategory::Blobber => (
                sc_path(STORAGE_SC, "getBlobber"),
                vec![("blobber_id", key.id.clone())],
            ),
            ProviderCategory::Validator => (
                sc_path(STORAGE_SC, "get_validator"),
                vec![("validator_id", key.id.clone())],
            ),
        };
        let envelope: NodeEnvelope = self.get_json(&path, &query).await?;
        NodeInfo::try_from(envelope)
    }

    async fn get_stake_pool(&self, key: &ProviderKey) -> Result<StakePoolInfo> {
        let path = sc_path(contract_for(key.category), "getStakePoolStat");
        let query = [
            ("provider_type", provider_type_code(key.category).to_string()),
            ("provider_id", key.id.clone()),
        ];
        self.get_json(&path, &query).await
    }

    async fn get_round_history(&self, from: Round, to: Round) -> Result<RoundHistoryPage> {
        let range = [("start", from.to_string()), ("end", to.to_string())];

        let provider_rewards: Vec<ProviderRewardEvent> = self
            .get_paged(&sc_path(STORAGE_SC, "provider-rewards"), &range)
            .await?;
        let delegate_rewards: Vec<DelegateRewardEvent> = self
            .get_paged(&sc_path(STORAGE_SC, "delegate-rewards"), &range)
            .await?;
        let blocks: Vec<BlockMetadata> = self
            .get_paged(&sc_path(STORAGE_SC, "blocks"), &range)
            .await?;

        Ok(RoundHistoryPage {
            provider_rewards,
            delegate_rewards,
            blocks,
        })
    }

    async fn get_protocol_config(&self) -> Result<BTreeMap<String, String>> {
        let dto: ConfigDto = self.get_json(&sc_path(MINER_SC, "configs"), &[]).await?;
        Ok(dto
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), scalar_to_string(v)))
            .collect())
    }

    async fn get_snapshots(&self, round: Round, limit: usize) -> Result<Vec<ChainSnapshot>> {
        let query = [("round", round.to_string()), ("limit", limit.to_string())];
        self.get_json(&sc_path(STORAGE_SC, "replicate-snapshots"), &query)
            .await
    }

    async fn get_current_round(&self) -> Result<Round> {
        self.get_json("/v1/current-round", &[]).await
    }

    async fn list_providers(&self, category: ProviderCategory) -> Result<Vec<ProviderId>> {
        let path = match category {
            ProviderCategory::Miner => sc_path(MINER_SC, "getMinerList"),
            ProviderCategory::Sharder => sc_path(MINER_SC, "getSharderList"),
            ProviderCategory::Blobber => sc_path(STORAGE_SC, "getblobbers"),
            ProviderCategory::Validator => sc_path(STORAGE_SC, "validators"),
        };

        let path = path.as_str();
        collect_pages(self.page_limit, move |offset| self.list_page(path, category, offset)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_miner_document() {
        let json = r#"{"simple_miner":{"id":"m1","round_service_charge_last_updated":120,
            "total_reward":5000,"current_reward":300,
            "stake_pool_settings":{"service_charge":0.2}}}"#;
        let envelope: NodeEnvelope = serde_json::from_str(json).expect("decode");
        let node = NodeInfo::try_from(envelope).expect("node");
        assert_eq!(node.id, "m1");
        assert_eq!(node.round, 120);
        assert_eq!(node.total_reward, 5000);
        assert!((node.service_charge - 0.2).abs() < f64::EPSILON);
    }

    #[test]
    fn test_plain_validator_document() {
        let json = r#"{"validator_id":"v1","round":9,"total_reward":12,"service_charge":0.1}"#;
        let envelope: NodeEnvelope = serde_json::from_str(json).expect("decode");
        let node = NodeInfo::try_from(envelope).expect("node");
        assert_eq!(node.id, "v1");
        assert_eq!(node.current_reward, 0);
        assert!((node.service_charge - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_node_document_missing_fields_rejected() {
        let json = r#"{"simple_miner":{"id":"m1","round_service_charge_last_updated":120}}"#;
        assert!(serde_json::from_str::<NodeEnvelope>(json).is_err());

        let json = r#"{"id":"b1","total_reward":7,"service_charge":0.1}"#;
        assert!(serde_json::from_str::<NodeEnvelope>(json).is_err());

        let json = r#"{"simple_miner":{"id":"m1","round_service_charge_last_updated":120,
            "total_reward":5000}}"#;
        let envelope: NodeEnvelope = serde_json::from_str(json).expect("decode");
        match NodeInfo::try_from(envelope) {
            Err(ClientError::Decode(message)) => assert!(message.contains("m1"), "{message}"),
            other => panic!("expected a decode error, got {other:?}"),
        }
    }

    /// Serve `total` numbered items in pages, recording the requested offsets.
    async fn paged(total: usize, limit: usize) -> (Vec<usize>, Vec<usize>) {
        let items: Vec<usize> = (0..total).collect();
        let mut offsets = Vec::new();
        let collected = collect_pages(limit, |offset| {
            offsets.push(offset);
            let page: Vec<usize> = items.iter().skip(offset).take(limit).copied().collect();
            async move { Ok(page) }
        })
        .await
        .expect("pages");
        (collected, offsets)
    }

    #[tokio::test]
    async fn test_pages_exact_multiple_of_limit() {
        let (items, offsets) = paged(6, 3).await;
        assert_eq!(items, (0..6).collect::<Vec<_>>());
        assert_eq!(offsets, vec![0, 3, 6]);
    }

    #[tokio::test]
    async fn test_pages_short_final_page() {
        let (items, offsets) = paged(7, 3).await;
        assert_eq!(items, (0..7).collect::<Vec<_>>());
        assert_eq!(offsets, vec![0, 3, 6]);
    }

    #[tokio::test]
    async fn test_pages_empty_first_page() {
        let (items, offsets) = paged(0, 3).await;
        assert!(items.is_empty());
        assert_eq!(offsets, vec![0]);
    }

    #[tokio::test]
    async fn test_pages_error_stops_listing() {
        let mut calls = 0;
        let result: Result<Vec<u8>> = collect_pages(2, |offset| {
            calls += 1;
            async move {
                if offset == 0 {
                    Ok(vec![1, 2])
                } else {
                    Err(ClientError::Transport("reset".to_string()))
                }
            }
        })
        .await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_listed_id_shapes() {
        let miner = serde_json::json!({"simple_miner": {"id": "m1"}});
        let blobber = serde_json::json!({"id": "b1"});
        let validator = serde_json::json!({"validator_id": "v1"});
        assert_eq!(listed_id(&miner).as_deref(), Some("m1"));
        assert_eq!(listed_id(&blobber).as_deref(), Some("b1"));
        assert_eq!(listed_id(&validator).as_deref(), Some("v1"));
        assert_eq!(listed_id(&serde_json::json!({"n2n_host": "x"})), None);
    }

    #[test]
    fn test_config_scalars_flattened() {
        let dto: ConfigDto = serde_json::from_str(
            r#"{"fields":{"epoch":"125000","share_ratio":0.5,"paused":false}}"#,
        )
        .expect("decode");
        let fields: BTreeMap<String, String> = dto
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), scalar_to_string(v)))
            .collect();
        assert_eq!(fields["epoch"], "125000");
        assert_eq!(fields["share_ratio"], "0.5");
        assert_eq!(fields["paused"], "false");
    }

    #[test]
    fn test_base_url_normalised() {
        let client = HttpChainClient::new("http://localhost:7171/", Duration::from_secs(1), 0)
            .expect("client");
        assert_eq!(client.base_url(), "http://localhost:7171");
        assert_eq!(client.page_limit, 1);
    }
}
