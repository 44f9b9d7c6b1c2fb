//! Paged, concurrent, caching loader for round history.
//!
//! A load splits the rounds it has not seen before into pages of
//! `page_rounds` rounds and fetches the pages concurrently, at most
//! `max_concurrent_fetches` at a time. Workers share no state; each returns
//! its page and the merge into the cache happens on the caller's task after
//! every page arrived. The first failing page aborts the remaining ones.
//!
//! One page is several paged listings, so it may take many HTTP requests.
//! Each attempt at a page runs under `page_timeout` rather than the
//! per-request `call_timeout`, which the client applies to single requests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tally_client::{retry_with_backoff, ChainClient, ClientError, RetryConfig, RoundHistoryPage};
use tally_types::{Round, RoundRecord};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::{HistoryError, Result, RoundHistory};

/// Loader settings.
#[derive(Clone, Debug, PartialEq)]
pub struct StoreConfig {
    /// Rounds requested per page.
    pub page_rounds: u64,
    /// Pages in flight at once.
    pub max_concurrent_fetches: usize,
    /// Bound on one attempt at a page, every request of it included.
    pub page_timeout: Duration,
    /// Retry policy per page. Its `call_timeout` is replaced by `page_timeout`.
    pub retry: RetryConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_rounds: 100,
            max_concurrent_fetches: 4,
            page_timeout: Duration::from_secs(120),
            retry: RetryConfig::default(),
        }
    }
}

/// Round Event Store over a [`ChainClient`].
#[derive(Debug)]
pub struct RoundEventStore<C> {
    client: Arc<C>,
    config: StoreConfig,
    cache: Mutex<BTreeMap<Round, RoundRecord>>,
}

impl<C: ChainClient> RoundEventStore<C> {
    /// Create a store with an empty cache.
    pub fn new(client: Arc<C>, config: StoreConfig) -> Self {
        Self {
            client,
            config,
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    /// Number of rounds held in the cache.
    pub async fn cached_rounds(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Load every record of `[from, to]`.
    ///
    /// Rounds already loaded by an earlier call are served from the cache.
    ///
    /// # Errors
    ///
    /// - [`HistoryError::InvalidRange`] if `from > to`
    /// - [`HistoryError::RoundNotFinalized`] if any round has no block yet
    /// - [`HistoryError::Fetch`] if a page fails permanently or exhausts its retries
    pub async fn load(&self, from: Round, to: Round) -> Result<RoundHistory> {
        if from > to {
            return Err(HistoryError::InvalidRange { from, to });
        }

        let missing = {
            let cache = self.cache.lock().await;
            missing_ranges(&cache, from, to)
        };
        let pages = split_pages(&missing, self.config.page_rounds.max(1));
        info!(from, to, pages = pages.len(), "loading round history");

        let fetched = self.fetch_pages(pages).await?;

        let mut cache = self.cache.lock().await;
        for (start, end, page) in fetched {
            for record in index_page(start, end, page)? {
                cache.insert(record.round, record);
            }
        }
        let records = cache.range(from..=to).map(|(_, r)| r.clone()).collect::<Vec<_>>();
        drop(cache);

        RoundHistory::from_records(from, to, records)
    }

    async fn fetch_pages(
        &self,
        pages: Vec<(Round, Round)>,
    ) -> Result<Vec<(Round, Round, RoundHistoryPage)>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_fetches.max(1)));
        let page_retry = RetryConfig {
            call_timeout: self.config.page_timeout,
            ..self.config.retry.clone()
        };
        let mut tasks = JoinSet::new();

        for (start, end) in pages {
            let client = self.client.clone();
            let retry = page_retry.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| HistoryError::Task(e.to_string()))?;
                debug!(start, end, "fetching history page");
                let page = retry_with_backoff(&retry, "round history", || {
                    client.get_round_history(start, end)
                })
                .await
                .map_err(|e| match e {
                    ClientError::RoundNotFinalized(round) => HistoryError::RoundNotFinalized(round),
                    other => HistoryError::Fetch(other),
                })?;
                Ok::<_, HistoryError>((start, end, page))
            });
        }

        let mut fetched = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let result = joined.map_err(|e| HistoryError::Task(e.to_string()))?;
            match result {
                Ok(page) => fetched.push(page),
                Err(error) => {
                    warn!(error = %error, "history page failed, aborting load");
                    tasks.abort_all();
                    return Err(error);
                }
            }
        }
        Ok(fetched)
    }
}

/// Maximal runs of rounds in `[from, to]` absent from the cache.
fn missing_ranges(
    cache: &BTreeMap<Round, RoundRecord>,
    from: Round,
    to: Round,
) -> Vec<(Round, Round)> {
    let mut ranges = Vec::new();
    let mut run_start: Option<Round> = None;
    for round in from..=to {
        match (cache.contains_key(&round), run_start) {
            (false, None) => run_start = Some(round),
            (true, Some(start)) => {
                ranges.push((start, round - 1));
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        ranges.push((start, to));
    }
    ranges
}

/// Split ranges into pages of at most `page_rounds` rounds.
fn split_pages(ranges: &[(Round, Round)], page_rounds: u64) -> Vec<(Round, Round)> {
    let mut pages = Vec::new();
    for &(from, to) in ranges {
        let mut start = from;
        while start <= to {
            let end = start.saturating_add(page_rounds - 1).min(to);
            pages.push((start, end));
            if end == Round::MAX {
                break;
            }
            start = end + 1;
        }
    }
    pages
}

/// Group a page's events under their rounds.
///
/// Every round in `[start, end]` must have block metadata; events for
/// rounds outside the page are ignored.
fn index_page(start: Round, end: Round, page: RoundHistoryPage) -> Result<Vec<RoundRecord>> {
    let mut records: BTreeMap<Round, RoundRecord> = BTreeMap::new();

    for block in page.blocks {
        if block.round < start || block.round > end {
            continue;
        }
        let round = block.round;
        let record = RoundRecord {
            round,
            provider_rewards: Vec::new(),
            delegate_rewards: Vec::new(),
            block,
        };
        if records.insert(round, record).is_some() {
            return Err(HistoryError::Inconsistent {
                round,
                detail: "more than one block".to_string(),
            });
        }
    }

    for round in start..=end {
        if !records.contains_key(&round) {
            return Err(HistoryError::RoundNotFinalized(round));
        }
    }

    for event in page.provider_rewards {
        match records.get_mut(&event.round) {
            Some(record) => record.provider_rewards.push(event),
            None => debug!(round = event.round, "ignoring provider reward outside page"),
        }
    }
    for event in page.delegate_rewards {
        match records.get_mut(&event.round) {
            Some(record) => record.delegate_rewards.push(event),
            None => debug!(round = event.round, "ignoring delegate reward outside page"),
        }
    }

    Ok(records.into_values().collect())
}
