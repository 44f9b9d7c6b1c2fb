//! Distribution Verifier.
//!
//! Verification runs in two stages. [`Verifier::plan`] derives the round
//! windows from the two snapshots and rejects measurements that cannot be
//! judged. [`Verifier::verify`] then evaluates every check against the
//! loaded history and collects all violations into one report.
//!
//! Each provider is reconciled over its own window `(before.round,
//! after.round]`. Per-round checks and the epoch guard use the common
//! window: the intersection of all provider windows.

use std::collections::BTreeMap;

use tally_history::RoundHistory;
use tally_rewards::Tolerance;
use tally_types::{ProtocolConfig, ProviderCategory, ProviderId, Snapshot};
use tracing::{info, warn};

use crate::accounts::check_provider;
use crate::report::{Check, InconclusiveReason, Ledger, VerificationReport, Window};
use crate::rounds::check_rounds;

/// Windows derived from a pair of snapshots.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Plan {
    /// Intersection of all provider windows.
    pub common: Window,
    /// Epoch of the common window.
    pub epoch: u64,
    /// Union of all provider windows; the history range to load.
    pub load: Window,
    /// Each provider's own window.
    pub providers: BTreeMap<ProviderId, Window>,
}

/// Checks a loaded history against snapshots and the protocol rules.
///
/// Holds no mutable state: the same inputs always yield the same report.
#[derive(Clone, Debug)]
pub struct Verifier {
    config: ProtocolConfig,
    tolerance: Tolerance,
}

impl Verifier {
    /// Create a verifier for one protocol configuration.
    pub fn new(config: ProtocolConfig, tolerance: Tolerance) -> Self {
        Self { config, tolerance }
    }

    /// Protocol configuration in use.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Tolerance in use.
    pub fn tolerance(&self) -> Tolerance {
        self.tolerance
    }

    /// Derive the measurement windows.
    ///
    /// # Errors
    ///
    /// Returns the [`InconclusiveReason`] when the snapshots do not bound a
    /// valid measurement: no providers, snapshots out of order, differing
    /// provider sets, a provider round going backwards, an empty common
    /// window, an epoch boundary inside it, or a changed active set.
    pub fn plan(&self, before: &Snapshot, after: &Snapshot) -> Result<Plan, InconclusiveReason> {
        if before.providers.is_empty() && after.providers.is_empty() {
            return Err(InconclusiveReason::NoProviders);
        }
        if after.taken_at <= before.taken_at {
            return Err(InconclusiveReason::AfterNotLater {
                before: before.taken_at,
                after: after.taken_at,
            });
        }
        for id in before.providers.keys().chain(after.providers.keys()) {
            if before.provider(id).is_none() || after.provider(id).is_none() {
                return Err(InconclusiveReason::MissingProvider {
                    provider: id.clone(),
                });
            }
        }
        for category in [ProviderCategory::Miner, ProviderCategory::Sharder] {
            let (was, now) = (before.active.get(category), after.active.get(category));
            if was != now {
                return Err(InconclusiveReason::ActiveSetChanged {
                    category,
                    before: was,
                    after: now,
                });
            }
        }

        let mut providers = BTreeMap::new();
        for (id, b) in &before.providers {
            let Some(a) = after.provider(id) else {
                continue;
            };
            if a.round < b.round {
                return Err(InconclusiveReason::ProviderWentBackwards {
                    provider: id.clone(),
                    before: b.round,
                    after: a.round,
                });
            }
            providers.insert(
                id.clone(),
                Window {
                    from: b.round.saturating_add(1),
                    to: a.round,
                },
            );
        }

        let common = Window {
            from: providers.values().map(|w| w.from).max().unwrap_or_default(),
            to: providers.values().map(|w| w.to).min().unwrap_or_default(),
        };
        if common.is_empty() {
            return Err(InconclusiveReason::EmptyWindow {
                from: common.from,
                to: common.to,
            });
        }
        let load = Window {
            from: providers.values().map(|w| w.from).min().unwrap_or_default(),
            to: providers.values().map(|w| w.to).max().unwrap_or_default(),
        };

        let from_epoch = self.config.epoch_of(common.from);
        let to_epoch = self.config.epoch_of(common.to);
        if from_epoch != to_epoch {
            return Err(InconclusiveReason::EpochBoundary {
                from: common.from,
                to: common.to,
                from_epoch,
                to_epoch,
            });
        }

        Ok(Plan {
            common,
            epoch: from_epoch,
            load,
            providers,
        })
    }

    /// Verify the ledger between two snapshots.
    ///
    /// Never fails: a measurement that cannot be judged yields an
    /// inconclusive report, and every violation found is collected.
    pub fn verify(
        &self,
        before: &Snapshot,
        after: &Snapshot,
        history: &RoundHistory,
    ) -> VerificationReport {
        let plan = match self.plan(before, after) {
            Ok(plan) => plan,
            Err(reason) => {
                warn!(reason = %reason, "verification inconclusive");
                return VerificationReport::inconclusive(reason, self.tolerance);
            }
        };

        let loaded = Window {
            from: history.from(),
            to: history.to(),
        };
        for (id, window) in &plan.providers {
            if !window.is_empty() && !history.covers(window.from, window.to) {
                let reason = InconclusiveReason::HistoryIncomplete {
                    provider: id.clone(),
                    window: *window,
                    loaded,
                };
                warn!(reason = %reason, "verification inconclusive");
                return VerificationReport::inconclusive(reason, self.tolerance);
            }
        }

        info!(
            window = %plan.common,
            epoch = plan.epoch,
            providers = plan.providers.len(),
            "verifying distribution"
        );

        let mut ledger = Ledger::default();
        check_rounds(
            &self.config,
            &self.tolerance,
            &before.active,
            plan.common,
            history,
            &mut ledger,
        );

        let mut summaries = Vec::with_capacity(plan.providers.len());
        for (id, window) in &plan.providers {
            let (Some(b), Some(a)) = (before.provider(id), after.provider(id)) else {
                continue;
            };
            summaries.push(check_provider(
                &self.config,
                &self.tolerance,
                b,
                a,
                *window,
                history,
                &mut ledger,
            ));
        }

        ledger.skip(Check::StakeProportionality, "no round rewarded more than one pool");
        ledger.skip(Check::AggregateSupply, "not requested");

        let report = ledger.finish(plan.common, plan.epoch, self.tolerance, summaries);
        info!(
            outcome = ?report.outcome,
            violations = report.violations.len(),
            "verification finished"
        );
        report
    }
}
