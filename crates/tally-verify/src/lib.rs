//! # tally-verify
//!
//! Distribution Verifier: replays a window of the reward ledger and checks
//! it against the protocol's distribution rules.
//!
//! Checks evaluated by [`Verifier::verify`]:
//!
//! - every reward event type is recognized for its provider's category
//! - each provider's reward delta equals its recorded postings
//! - at most one miner block reward per round, paid to the lottery winner
//! - per round, `min(num_rewarded, active)` distinct providers per category
//! - block reward postings equal the calculated per-provider reward
//! - per rewarded round, at most one delegate event per pool,
//!   `min(num_delegates_rewarded, pools)` distinct pools, a delegate total
//!   matching the service-charge split, and pool shares proportional to stake
//! - each pool's reward delta equals its recorded delegate postings
//!
//! [`run_verification`] drives the whole two-phase fetch pipeline against
//! a [`ChainClient`](tally_client::ChainClient) and adds the optional
//! aggregate supply cross-check.
//!
//! ## Modules
//!
//! - [`report`] — Verdicts, per-check statuses, violations
//! - [`verifier`] — Window planning and the check driver
//! - [`run`] — Snapshot → wait → snapshot → history pipeline under one deadline

mod accounts;
pub mod report;
mod rounds;
pub mod run;
pub mod verifier;

pub use report::{
    Check, CheckStatus, InconclusiveReason, Outcome, Phase, ProviderSummary, VerificationReport,
    Violation, Window,
};
pub use run::{run_verification, RunConfig};
pub use verifier::{Plan, Verifier};
