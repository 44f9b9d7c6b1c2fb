//! Two-phase verification pipeline.
//!
//! ```text
//! config ─▶ before snapshot ─▶ wait N rounds ─▶ after snapshot ─▶ config
//!        ─▶ wait for window end to finalize ─▶ load history ─▶ verify
//!        ─▶ aggregate cross-check (optional)
//! ```
//!
//! Every step runs against one overall deadline. Running out of time, or
//! any fetch failing for good, yields an inconclusive report that names
//! the step; it never yields a pass or a fail. The aggregate cross-check
//! is the exception: it runs after the verdict, so when it cannot fetch
//! it is marked skipped and the verdict stands.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tally_client::{
    poll_until, retry_with_backoff, ChainClient, ClientError, PollConfig, PollOutcome, Probe,
    RetryConfig,
};
use tally_history::{RoundEventStore, RoundHistory, StoreConfig};
use tally_rewards::Tolerance;
use tally_sources::{
    AggregateSource, ProtocolParamSource, ProviderSnapshotSource, SnapshotConfig,
};
use tally_types::{ProviderKey, Round};
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

use crate::report::{Check, InconclusiveReason, Phase, VerificationReport, Violation, Window};
use crate::verifier::Verifier;

/// Pipeline settings.
#[derive(Clone, Debug, PartialEq)]
pub struct RunConfig {
    /// Rounds the chain must advance between the two snapshots.
    pub wait_rounds: u64,
    /// Pause between chain-progress probes.
    pub poll_interval: Duration,
    /// Bound on the whole run.
    pub deadline: Duration,
    /// Cross-check chain aggregates against the recorded events.
    pub aggregate_check: bool,
    /// Comparison tolerance.
    pub tolerance: Tolerance,
    /// Retry policy for single queries.
    pub retry: RetryConfig,
    /// Snapshot source settings.
    pub snapshot: SnapshotConfig,
    /// History store settings.
    pub store: StoreConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            wait_rounds: 10,
            poll_interval: Duration::from_secs(1),
            deadline: Duration::from_secs(600),
            aggregate_check: false,
            tolerance: Tolerance::default(),
            retry: RetryConfig::default(),
            snapshot: SnapshotConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

struct Pipeline<'a, C> {
    client: Arc<C>,
    providers: &'a [ProviderKey],
    config: &'a RunConfig,
    started: Instant,
    deadline: Instant,
}

/// Run a full verification of `providers` against a live chain.
///
/// Always produces a report.
pub async fn run_verification<C: ChainClient>(
    client: Arc<C>,
    providers: &[ProviderKey],
    config: &RunConfig,
) -> VerificationReport {
    let started = Instant::now();
    let pipeline = Pipeline {
        client,
        providers,
        config,
        started,
        deadline: started + config.deadline,
    };
    match pipeline.run().await {
        Ok(report) => report,
        Err(reason) => {
            warn!(reason = %reason, "run inconclusive");
            VerificationReport::inconclusive(reason, config.tolerance)
        }
    }
}

impl<C: ChainClient> Pipeline<'_, C> {
    async fn run(&self) -> Result<VerificationReport, InconclusiveReason> {
        let params = ProtocolParamSource::new(self.client.clone(), self.config.retry.clone());
        let snapshots =
            ProviderSnapshotSource::new(self.client.clone(), self.config.snapshot.clone());

        let protocol = self.step(Phase::Config, params.fetch()).await?;
        let verifier = Verifier::new(protocol, self.config.tolerance);

        let before = self
            .step(Phase::BeforeSnapshot, snapshots.snapshot(self.providers))
            .await?;
        let target = before.taken_at.saturating_add(self.config.wait_rounds);
        info!(taken_at = before.taken_at, target, "before snapshot taken, waiting for rounds");
        self.wait_for_round(Phase::WaitRounds, target).await?;

        let after = self
            .step(Phase::AfterSnapshot, snapshots.snapshot(self.providers))
            .await?;
        let protocol_after = self.step(Phase::Config, params.fetch()).await?;
        if &protocol_after != verifier.config() {
            return Err(InconclusiveReason::ConfigChanged);
        }

        let plan = verifier.plan(&before, &after)?;
        info!(window = %plan.common, load = %plan.load, "after snapshot taken");

        self.wait_for_round(Phase::WaitFinalized, plan.load.to).await?;
        let store = RoundEventStore::new(self.client.clone(), self.config.store.clone());
        let history = self
            .step(Phase::History, store.load(plan.load.from, plan.load.to))
            .await?;

        let mut report = verifier.verify(&before, &after, &history);
        if self.config.aggregate_check {
            self.aggregate_check(&mut report, plan.common, &history).await;
        }
        Ok(report)
    }

    /// Run one step against the overall deadline.
    async fn step<T, E: std::fmt::Display>(
        &self,
        phase: Phase,
        fut: impl Future<Output = Result<T, E>>,
    ) -> Result<T, InconclusiveReason> {
        match timeout_at(self.deadline, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(InconclusiveReason::FetchFailed {
                phase,
                error: error.to_string(),
            }),
            Err(_) => Err(self.timed_out(phase)),
        }
    }

    fn timed_out(&self, phase: Phase) -> InconclusiveReason {
        InconclusiveReason::TimedOut {
            phase,
            elapsed: self.started.elapsed(),
        }
    }

    /// Poll until the chain's latest finalized round reaches `target`.
    async fn wait_for_round(&self, phase: Phase, target: Round) -> Result<Round, InconclusiveReason> {
        let poll = PollConfig {
            interval: self.config.poll_interval,
            deadline: self.deadline.saturating_duration_since(Instant::now()),
        };
        let client = self.client.as_ref();
        let retry = &self.config.retry;
        let outcome = self
            .step(phase, poll_until(&poll, || probe_round(client, retry, target)))
            .await?;
        match outcome {
            PollOutcome::Ready(round) => Ok(round),
            PollOutcome::TimedOut { last, .. } => {
                info!(?last, target, "gave up waiting for the chain");
                Err(self.timed_out(phase))
            }
        }
    }

    async fn aggregate_check(
        &self,
        report: &mut VerificationReport,
        window: Window,
        history: &RoundHistory,
    ) {
        if report.inconclusive_reason().is_some() {
            return;
        }
        let aggregates = AggregateSource::new(self.client.clone(), self.config.retry.clone());
        let bracket = match self
            .step(Phase::Aggregate, aggregates.bracket(window.from, window.to))
            .await
        {
            Ok(Some(bracket)) => bracket,
            Ok(None) => {
                report.skip_check(Check::AggregateSupply, "no aggregate snapshots bracket the window");
                return;
            }
            Err(reason) => {
                warn!(reason = %reason, "aggregate cross-check skipped");
                report.skip_check(
                    Check::AggregateSupply,
                    format!("aggregate fetch failed: {reason}"),
                );
                return;
            }
        };

        let recorded = history.total_recorded_rewards(window.from, window.to);
        let comparison = self.config.tolerance.compare(bracket.rewards_paid(), recorded);
        let violations = if comparison.within() {
            Vec::new()
        } else {
            vec![Violation::new(
                Check::AggregateSupply,
                format!("chain total_rewards growth over {window} does not match recorded reward events"),
            )
            .comparison(&comparison)]
        };
        report.record_check(Check::AggregateSupply, violations);
    }
}

async fn probe_round<C: ChainClient>(
    client: &C,
    retry: &RetryConfig,
    target: Round,
) -> Result<Probe<Round>, ClientError> {
    let round = retry_with_backoff(retry, "current round", || client.get_current_round()).await?;
    if round >= target {
        Ok(Probe::Ready(round))
    } else {
        Ok(Probe::NotReady(format!("round {round} of {target}")))
    }
}
