//! Verification report.
//!
//! A report always states the tolerance it was judged with. An
//! inconclusive report carries the reason the measurement itself was
//! invalid and asserts nothing about the ledger.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tally_rewards::{Comparison, Tolerance};
use tally_types::{Amount, PoolId, ProviderCategory, ProviderId, RewardType, Round};

/// A closed round interval. Empty when `from > to`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    /// First round.
    pub from: Round,
    /// Last round.
    pub to: Round,
}

impl Window {
    /// Whether the window holds no round.
    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }

    /// Whether `round` lies inside the window.
    pub fn contains(&self, round: Round) -> bool {
        round >= self.from && round <= self.to
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

/// The individual checks a verification runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    /// Every reward event type is recognized for its provider's category.
    RewardTypes,
    /// Provider reward deltas match the recorded events.
    Reconciliation,
    /// At most one miner block reward per round, paid to the lottery winner.
    SingleWinner,
    /// Distinct providers rewarded per round match the configured count.
    RewardedCount,
    /// Block reward postings match the calculated per-provider reward.
    BlockRewardAmount,
    /// No pool receives two block-reward delegate events in a round.
    DelegateExclusivity,
    /// Distinct pools rewarded per round match the configured count.
    DelegateCount,
    /// Pool reward deltas match the recorded delegate events.
    DelegateReconciliation,
    /// Delegate totals match the service-charge split.
    ServiceChargeSplit,
    /// Pool shares are proportional to stake.
    StakeProportionality,
    /// Chain aggregate reward growth matches the recorded events.
    AggregateSupply,
}

impl Check {
    /// Every check, in evaluation order.
    pub const ALL: [Check; 11] = [
        Check::RewardTypes,
        Check::Reconciliation,
        Check::SingleWinner,
        Check::RewardedCount,
        Check::BlockRewardAmount,
        Check::DelegateExclusivity,
        Check::DelegateCount,
        Check::DelegateReconciliation,
        Check::ServiceChargeSplit,
        Check::StakeProportionality,
        Check::AggregateSupply,
    ];

    /// Stable name used in logs and output.
    pub fn as_str(&self) -> &'static str {
        match self {
            Check::RewardTypes => "reward_types",
            Check::Reconciliation => "reconciliation",
            Check::SingleWinner => "single_winner",
            Check::RewardedCount => "rewarded_count",
            Check::BlockRewardAmount => "block_reward_amount",
            Check::DelegateExclusivity => "delegate_exclusivity",
            Check::DelegateCount => "delegate_count",
            Check::DelegateReconciliation => "delegate_reconciliation",
            Check::ServiceChargeSplit => "service_charge_split",
            Check::StakeProportionality => "stake_proportionality",
            Check::AggregateSupply => "aggregate_supply",
        }
    }
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one check across the whole run.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckStatus {
    /// Evaluated without violations.
    Passed,
    /// Evaluated with violations.
    Failed {
        /// Number of violations.
        violations: usize,
    },
    /// Not evaluated.
    Skipped {
        /// Why.
        reason: String,
    },
}

/// One invariant violation with enough context to localize it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// The check that failed.
    pub check: Check,
    /// Round, when the violation is tied to one.
    pub round: Option<Round>,
    /// Provider, when the violation is tied to one.
    pub provider: Option<ProviderId>,
    /// Delegate pool, when the violation is tied to one.
    pub pool: Option<PoolId>,
    /// Expected value.
    pub expected: Option<Amount>,
    /// Observed value.
    pub actual: Option<Amount>,
    /// Deviation the tolerance allowed.
    pub allowed: Option<Amount>,
    /// How far past the allowance the deviation went.
    pub breach: Option<Amount>,
    /// Human-readable description.
    pub message: String,
}

impl Violation {
    /// A violation with only a message.
    pub fn new(check: Check, message: impl Into<String>) -> Self {
        Self {
            check,
            round: None,
            provider: None,
            pool: None,
            expected: None,
            actual: None,
            allowed: None,
            breach: None,
            message: message.into(),
        }
    }

    /// Attach a round.
    pub fn at_round(mut self, round: Round) -> Self {
        self.round = Some(round);
        self
    }

    /// Attach a provider.
    pub fn for_provider(mut self, provider: impl Into<ProviderId>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Attach a pool.
    pub fn for_pool(mut self, pool: impl Into<PoolId>) -> Self {
        self.pool = Some(pool.into());
        self
    }

    /// Attach expected and observed counts, with no tolerance.
    pub fn counts(mut self, expected: usize, actual: usize) -> Self {
        self.expected = Some(expected as Amount);
        self.actual = Some(actual as Amount);
        self.allowed = Some(0);
        self.breach = Some(expected.abs_diff(actual) as Amount);
        self
    }

    /// Attach a tolerance comparison.
    pub fn comparison(mut self, comparison: &Comparison) -> Self {
        self.expected = Some(comparison.expected);
        self.actual = Some(comparison.actual);
        self.allowed = Some(comparison.allowed);
        self.breach = Some(comparison.breach());
        self
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.check)?;
        if let Some(round) = self.round {
            write!(f, " round={round}")?;
        }
        if let Some(provider) = &self.provider {
            write!(f, " provider={provider}")?;
        }
        if let Some(pool) = &self.pool {
            write!(f, " pool={pool}")?;
        }
        if let (Some(expected), Some(actual)) = (self.expected, self.actual) {
            write!(f, " expected={expected} actual={actual}")?;
        }
        if let Some(breach) = self.breach {
            write!(f, " breach={breach}")?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Pipeline step, for timeouts and fetch failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Reading the protocol configuration.
    Config,
    /// Taking the "before" snapshot.
    BeforeSnapshot,
    /// Waiting for the chain to advance.
    WaitRounds,
    /// Taking the "after" snapshot.
    AfterSnapshot,
    /// Waiting for the window end to finalize.
    WaitFinalized,
    /// Loading round history.
    History,
    /// Reading chain aggregates.
    Aggregate,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Config => "config",
            Phase::BeforeSnapshot => "before snapshot",
            Phase::WaitRounds => "waiting for rounds",
            Phase::AfterSnapshot => "after snapshot",
            Phase::WaitFinalized => "waiting for finality",
            Phase::History => "history load",
            Phase::Aggregate => "aggregate snapshots",
        };
        f.write_str(name)
    }
}

/// Why a run could not judge the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum InconclusiveReason {
    /// No provider to measure.
    NoProviders,
    /// The "after" snapshot is not later than the "before" one.
    AfterNotLater {
        /// Round of the "before" snapshot.
        before: Round,
        /// Round of the "after" snapshot.
        after: Round,
    },
    /// A provider appears in only one snapshot.
    MissingProvider {
        /// Provider ID.
        provider: ProviderId,
    },
    /// A provider's reported round decreased.
    ProviderWentBackwards {
        /// Provider ID.
        provider: ProviderId,
        /// Round in the "before" snapshot.
        before: Round,
        /// Round in the "after" snapshot.
        after: Round,
    },
    /// The common window of all providers is empty.
    EmptyWindow {
        /// Window start.
        from: Round,
        /// Window end.
        to: Round,
    },
    /// The window crosses an epoch boundary.
    EpochBoundary {
        /// Window start.
        from: Round,
        /// Window end.
        to: Round,
        /// Epoch of `from`.
        from_epoch: u64,
        /// Epoch of `to`.
        to_epoch: u64,
    },
    /// The active provider count changed during the window.
    ActiveSetChanged {
        /// Category.
        category: ProviderCategory,
        /// Count before.
        before: Option<usize>,
        /// Count after.
        after: Option<usize>,
    },
    /// The protocol configuration changed during the window.
    ConfigChanged,
    /// Loaded history does not cover a provider's window.
    HistoryIncomplete {
        /// Provider whose window is not covered.
        provider: ProviderId,
        /// Provider window.
        window: Window,
        /// Loaded range.
        loaded: Window,
    },
    /// The overall deadline passed.
    TimedOut {
        /// Step that was running.
        phase: Phase,
        /// Time spent.
        elapsed: Duration,
    },
    /// A fetch failed permanently.
    FetchFailed {
        /// Step that was running.
        phase: Phase,
        /// The error.
        error: String,
    },
}

impl fmt::Display for InconclusiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoProviders => write!(f, "no providers to measure"),
            Self::AfterNotLater { before, after } => {
                write!(f, "after snapshot at round {after} is not later than before snapshot at round {before}")
            }
            Self::MissingProvider { provider } => {
                write!(f, "provider {provider} missing from one snapshot")
            }
            Self::ProviderWentBackwards {
                provider,
                before,
                after,
            } => write!(f, "provider {provider} round went from {before} back to {after}"),
            Self::EmptyWindow { from, to } => write!(f, "common window [{from}, {to}] is empty"),
            Self::EpochBoundary {
                from,
                to,
                from_epoch,
                to_epoch,
            } => write!(
                f,
                "window [{from}, {to}] crosses epochs {from_epoch} -> {to_epoch}"
            ),
            Self::ActiveSetChanged {
                category,
                before,
                after,
            } => write!(
                f,
                "active {category} count changed from {before:?} to {after:?}"
            ),
            Self::ConfigChanged => write!(f, "protocol config changed during the window"),
            Self::HistoryIncomplete {
                provider,
                window,
                loaded,
            } => write!(
                f,
                "history {loaded} does not cover window {window} of provider {provider}"
            ),
            Self::TimedOut { phase, elapsed } => {
                write!(f, "timed out during {phase} after {elapsed:?}")
            }
            Self::FetchFailed { phase, error } => write!(f, "fetch failed during {phase}: {error}"),
        }
    }
}

/// Overall verdict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Every evaluated check passed.
    Passed,
    /// At least one violation.
    Failed,
    /// The measurement was invalid.
    Inconclusive {
        /// Why.
        reason: InconclusiveReason,
    },
}

/// Per-provider accounting over its own window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSummary {
    /// Provider ID.
    pub id: ProviderId,
    /// Category.
    pub category: ProviderCategory,
    /// The provider's window `(before.round, after.round]`.
    pub window: Window,
    /// `after.total_reward - before.total_reward`.
    pub reward_delta: Amount,
    /// Sum of the provider's reward events in its window.
    pub recorded: Amount,
    /// `recorded`, by reward type.
    pub recorded_by_type: BTreeMap<RewardType, Amount>,
    /// Block rewards posted to the provider.
    pub block_rewards: Amount,
    /// Block rewards passed on to delegate pools.
    pub delegated: Amount,
    /// Block rewards the provider kept.
    pub provider_cut: Amount,
    /// Sum of pool reward deltas.
    pub pool_reward_delta: Amount,
}

/// Outcome of a verification run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Verdict.
    pub outcome: Outcome,
    /// Common measurement window, when one was derived.
    pub window: Option<Window>,
    /// Epoch of the window.
    pub epoch: Option<u64>,
    /// Tolerance used for every amount comparison.
    pub tolerance: Tolerance,
    /// Status per check.
    pub checks: BTreeMap<Check, CheckStatus>,
    /// Every violation, in check order.
    pub violations: Vec<Violation>,
    /// Per-provider accounting.
    pub providers: Vec<ProviderSummary>,
}

impl VerificationReport {
    /// A report that judged nothing.
    pub fn inconclusive(reason: InconclusiveReason, tolerance: Tolerance) -> Self {
        let checks = Check::ALL
            .iter()
            .map(|&check| {
                (
                    check,
                    CheckStatus::Skipped {
                        reason: "run inconclusive".to_string(),
                    },
                )
            })
            .collect();
        Self {
            outcome: Outcome::Inconclusive { reason },
            window: None,
            epoch: None,
            tolerance,
            checks,
            violations: Vec::new(),
            providers: Vec::new(),
        }
    }

    /// Whether every evaluated check passed.
    pub fn is_passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }

    /// Whether any check failed.
    pub fn is_failed(&self) -> bool {
        self.outcome == Outcome::Failed
    }

    /// The inconclusive reason, if any.
    pub fn inconclusive_reason(&self) -> Option<&InconclusiveReason> {
        match &self.outcome {
            Outcome::Inconclusive { reason } => Some(reason),
            _ => None,
        }
    }

    /// Violations of one check.
    pub fn violations_of(&self, check: Check) -> impl Iterator<Item = &Violation> + '_ {
        self.violations.iter().filter(move |v| v.check == check)
    }

    /// Summary of one provider.
    pub fn provider(&self, id: &str) -> Option<&ProviderSummary> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// Record the result of a check evaluated after the main verification.
    ///
    /// Has no effect on an inconclusive report.
    pub fn record_check(&mut self, check: Check, violations: Vec<Violation>) {
        if self.inconclusive_reason().is_some() {
            return;
        }
        let status = if violations.is_empty() {
            CheckStatus::Passed
        } else {
            CheckStatus::Failed {
                violations: violations.len(),
            }
        };
        self.checks.insert(check, status);
        self.violations.extend(violations);
        if !self.violations.is_empty() {
            self.outcome = Outcome::Failed;
        }
    }

    /// Mark a check as skipped.
    ///
    /// Has no effect on an inconclusive report.
    pub fn skip_check(&mut self, check: Check, reason: impl Into<String>) {
        if self.inconclusive_reason().is_some() {
            return;
        }
        self.checks.insert(
            check,
            CheckStatus::Skipped {
                reason: reason.into(),
            },
        );
    }
}

/// Accumulates check results while a verification runs.
#[derive(Debug, Default)]
pub(crate) struct Ledger {
    ran: BTreeSet<Check>,
    skipped: BTreeMap<Check, String>,
    violations: Vec<Violation>,
}

impl Ledger {
    /// Note that `check` was evaluated at least once.
    pub(crate) fn ran(&mut self, check: Check) {
        self.ran.insert(check);
    }

    /// Note why `check` was not evaluated; the first reason wins.
    pub(crate) fn skip(&mut self, check: Check, reason: impl Into<String>) {
        self.skipped.entry(check).or_insert_with(|| reason.into());
    }

    /// Record a violation.
    pub(crate) fn fail(&mut self, violation: Violation) {
        tracing::warn!(
            check = %violation.check,
            round = ?violation.round,
            provider = ?violation.provider,
            pool = ?violation.pool,
            expected = ?violation.expected,
            actual = ?violation.actual,
            "{}",
            violation.message
        );
        self.ran.insert(violation.check);
        self.violations.push(violation);
    }

    /// Record a tolerance comparison, failing it when out of bounds.
    pub(crate) fn compare(&mut self, check: Check, comparison: Comparison, violation: impl FnOnce() -> Violation) {
        self.ran(check);
        if !comparison.within() {
            self.fail(violation().comparison(&comparison));
        }
    }

    pub(crate) fn finish(
        mut self,
        window: Window,
        epoch: u64,
        tolerance: Tolerance,
        providers: Vec<ProviderSummary>,
    ) -> VerificationReport {
        self.violations.sort_by_key(|v| (v.check, v.round));

        let mut checks = BTreeMap::new();
        for check in Check::ALL {
            let failed = self.violations.iter().filter(|v| v.check == check).count();
            let status = if failed > 0 {
                CheckStatus::Failed { violations: failed }
            } else if self.ran.contains(&check) {
                CheckStatus::Passed
            } else {
                CheckStatus::Skipped {
                    reason: self
                        .skipped
                        .remove(&check)
                        .unwrap_or_else(|| "not applicable".to_string()),
                }
            };
            checks.insert(check, status);
        }

        let outcome = if self.violations.is_empty() {
            Outcome::Passed
        } else {
            Outcome::Failed
        };

        VerificationReport {
            outcome,
            window: Some(window),
            epoch: Some(epoch),
            tolerance,
            checks,
            violations: self.violations,
            providers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_statuses() {
        let mut ledger = Ledger::default();
        ledger.ran(Check::Reconciliation);
        ledger.skip(Check::DelegateCount, "no configured count");
        ledger.fail(Violation::new(Check::SingleWinner, "two winners").at_round(7));

        let report = ledger.finish(Window { from: 1, to: 9 }, 0, Tolerance::default(), Vec::new());
        assert!(report.is_failed());
        assert_eq!(report.checks[&Check::Reconciliation], CheckStatus::Passed);
        assert_eq!(
            report.checks[&Check::SingleWinner],
            CheckStatus::Failed { violations: 1 }
        );
        assert_eq!(
            report.checks[&Check::DelegateCount],
            CheckStatus::Skipped {
                reason: "no configured count".to_string()
            }
        );
        assert_eq!(report.violations_of(Check::SingleWinner).count(), 1);
    }

    #[test]
    fn test_record_check_after_verification() {
        let mut report = Ledger::default().finish(
            Window { from: 1, to: 9 },
            0,
            Tolerance::default(),
            Vec::new(),
        );
        assert!(report.is_passed());

        report.record_check(Check::AggregateSupply, Vec::new());
        assert!(report.is_passed());
        assert_eq!(report.checks[&Check::AggregateSupply], CheckStatus::Passed);

        report.record_check(
            Check::AggregateSupply,
            vec![Violation::new(Check::AggregateSupply, "mismatch")],
        );
        assert!(report.is_failed());
    }

    #[test]
    fn test_inconclusive_report_ignores_later_checks() {
        let mut report =
            VerificationReport::inconclusive(InconclusiveReason::ConfigChanged, Tolerance::default());
        report.record_check(
            Check::AggregateSupply,
            vec![Violation::new(Check::AggregateSupply, "mismatch")],
        );
        assert!(report.violations.is_empty());
        assert_eq!(
            report.inconclusive_reason(),
            Some(&InconclusiveReason::ConfigChanged)
        );
    }

    #[test]
    fn test_violation_display_carries_context() {
        let comparison = Tolerance::EXACT.compare(500, 450);
        let violation = Violation::new(Check::BlockRewardAmount, "block reward mismatch")
            .at_round(12)
            .for_provider("m1")
            .comparison(&comparison);
        let text = violation.to_string();
        assert!(text.contains("round=12"));
        assert!(text.contains("provider=m1"));
        assert!(text.contains("expected=500 actual=450"));
        assert!(text.contains("breach=50"));
    }

    #[test]
    fn test_report_serializes_to_json() {
        let report = VerificationReport::inconclusive(
            InconclusiveReason::EpochBoundary {
                from: 95,
                to: 205,
                from_epoch: 0,
                to_epoch: 2,
            },
            Tolerance::default(),
        );
        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["outcome"]["outcome"], "inconclusive");
        assert_eq!(json["outcome"]["reason"]["reason"], "epoch_boundary");
        assert_eq!(json["tolerance"]["absolute"], 10);
    }
}
