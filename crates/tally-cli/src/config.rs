//! Configuration file management.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_client::RetryConfig;
use tally_history::StoreConfig;
use tally_rewards::Tolerance;
use tally_sources::SnapshotConfig;
use tally_types::{ProviderCategory, ProviderId, ProviderKey};
use tally_verify::RunConfig;

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "tally.toml";

/// Complete configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TallyConfig {
    /// Chain node settings.
    #[serde(default)]
    pub node: NodeConfig,
    /// Fetch, retry and paging settings.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Run pipeline settings.
    #[serde(default)]
    pub run: RunSection,
    /// Comparison tolerance.
    #[serde(default)]
    pub tolerance: Tolerance,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Providers to verify.
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,
}

/// Chain node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Base URL of a sharder's query API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
}

/// Fetch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Attempts per request, the first one included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    /// Upper bound on the retry delay, in milliseconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
    /// Growth factor of the retry delay.
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Requests in flight at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_fetches: usize,
    /// Rounds per history page.
    #[serde(default = "default_page_rounds")]
    pub page_rounds: u64,
    /// Items per paged listing request.
    #[serde(default = "default_page_limit")]
    pub page_limit: usize,
    /// Bound on fetching one history page, in seconds. A page spans several
    /// paged listings, so this exceeds the per-request timeout.
    #[serde(default = "default_page_timeout")]
    pub page_timeout_secs: u64,
}

/// Run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// Rounds to wait between the two snapshots.
    #[serde(default = "default_wait_rounds")]
    pub wait_rounds: u64,
    /// Chain-progress poll interval in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Bound on the whole run in seconds.
    #[serde(default = "default_deadline")]
    pub deadline_secs: u64,
    /// Cross-check chain aggregate totals.
    #[serde(default)]
    pub aggregate_check: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace" | "debug" | "info" | "warn" | "error".
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// One provider to verify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEntry {
    /// Provider category.
    pub category: ProviderCategory,
    /// Provider ID.
    pub id: ProviderId,
}

// Default value functions

fn default_base_url() -> String {
    "http://127.0.0.1:7171".to_string()
}

fn default_call_timeout() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff() -> u64 {
    250
}

fn default_max_backoff() -> u64 {
    5_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_concurrent() -> usize {
    4
}

fn default_page_rounds() -> u64 {
    100
}

fn default_page_limit() -> usize {
    tally_client::http::DEFAULT_PAGE_LIMIT
}

fn default_page_timeout() -> u64 {
    120
}

fn default_wait_rounds() -> u64 {
    10
}

fn default_poll_interval() -> u64 {
    1_000
}

fn default_deadline() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            call_timeout_secs: default_call_timeout(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            backoff_multiplier: default_backoff_multiplier(),
            max_concurrent_fetches: default_max_concurrent(),
            page_rounds: default_page_rounds(),
            page_limit: default_page_limit(),
            page_timeout_secs: default_page_timeout(),
        }
    }
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            wait_rounds: default_wait_rounds(),
            poll_interval_ms: default_poll_interval(),
            deadline_secs: default_deadline(),
            aggregate_check: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl TallyConfig {
    /// Load configuration.
    ///
    /// An explicit path must exist. Without one, `./tally.toml` is read if
    /// present and defaults are used otherwise.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("reading {}: {e}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Per-request timeout.
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.node.call_timeout_secs)
    }

    /// Retry policy for single requests.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.fetch.max_attempts,
            initial_delay: Duration::from_millis(self.fetch.initial_backoff_ms),
            max_delay: Duration::from_millis(self.fetch.max_backoff_ms),
            multiplier: self.fetch.backoff_multiplier,
            call_timeout: self.call_timeout(),
        }
    }

    /// Pipeline settings.
    pub fn run_config(&self) -> RunConfig {
        let retry = self.retry();
        RunConfig {
            wait_rounds: self.run.wait_rounds,
            poll_interval: Duration::from_millis(self.run.poll_interval_ms),
            deadline: Duration::from_secs(self.run.deadline_secs),
            aggregate_check: self.run.aggregate_check,
            tolerance: self.tolerance,
            retry: retry.clone(),
            snapshot: SnapshotConfig {
                max_concurrent_fetches: self.fetch.max_concurrent_fetches,
                retry: retry.clone(),
            },
            store: StoreConfig {
                page_rounds: self.fetch.page_rounds,
                max_concurrent_fetches: self.fetch.max_concurrent_fetches,
                page_timeout: Duration::from_secs(self.fetch.page_timeout_secs),
                retry,
            },
        }
    }

    /// Configured providers as keys.
    pub fn provider_keys(&self) -> Vec<ProviderKey> {
        self.providers
            .iter()
            .map(|p| ProviderKey::new(p.category, p.id.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TallyConfig::default();
        assert_eq!(config.node.base_url, "http://127.0.0.1:7171");
        assert_eq!(config.fetch.max_attempts, 4);
        assert_eq!(config.run.wait_rounds, 10);
        assert!(!config.run.aggregate_check);
        assert_eq!(config.tolerance, Tolerance::default());
        assert_eq!(config.logging.level, "info");
        assert!(config.providers.is_empty());
    }

    #[test]
    fn test_config_serialization() {
        let config = TallyConfig::default();
        let toml_str = toml::to_string(&config).expect("serialize");
        let _parsed: TallyConfig = toml::from_str(&toml_str).expect("parse");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = TallyConfig::parse(
            r#"
            [node]
            base_url = "https://sharder.example:7171"

            [tolerance]
            absolute = 2

            [[providers]]
            category = "miner"
            id = "m1"

            [[providers]]
            category = "sharder"
            id = "s1"
            "#,
        )
        .expect("parse");

        assert_eq!(config.node.base_url, "https://sharder.example:7171");
        assert_eq!(config.node.call_timeout_secs, 10);
        assert_eq!(config.tolerance.absolute, 2);
        assert_eq!(config.tolerance.relative, Tolerance::default().relative);
        assert_eq!(
            config.provider_keys(),
            vec![
                ProviderKey::new(ProviderCategory::Miner, "m1"),
                ProviderKey::new(ProviderCategory::Sharder, "s1"),
            ]
        );
    }

    #[test]
    fn test_run_config_mapping() {
        let mut config = TallyConfig::default();
        config.fetch.page_rounds = 25;
        config.run.deadline_secs = 30;
        let run = config.run_config();
        assert_eq!(run.store.page_rounds, 25);
        assert_eq!(run.deadline, Duration::from_secs(30));
        assert_eq!(run.retry.call_timeout, Duration::from_secs(10));
        assert_eq!(run.store.retry.call_timeout, Duration::from_secs(10));
        assert_eq!(run.store.page_timeout, Duration::from_secs(120));
        assert_eq!(run.snapshot.max_concurrent_fetches, 4);
    }

    #[test]
    fn test_unknown_category_rejected() {
        let result = TallyConfig::parse(
            r#"
            [[providers]]
            category = "archiver"
            id = "a1"
            "#,
        );
        assert!(result.is_err());
    }
}
