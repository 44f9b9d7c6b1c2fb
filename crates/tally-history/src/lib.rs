//! # tally-history
//!
//! Round Event Store: loads every reward-relevant fact the chain recorded
//! for a closed round interval and indexes it for constant-time lookup.
//!
//! A load is all-or-nothing. A round the chain has not finalized fails the
//! load instead of being read as "no rewards"; transient network errors are
//! retried and, once retries run out, fail the load as well.
//!
//! ## Modules
//!
//! - [`history`] — The immutable [`RoundHistory`] index and its aggregate queries
//! - [`store`] — The paged, concurrent, caching [`RoundEventStore`]

pub mod history;
pub mod store;

pub use history::RoundHistory;
pub use store::{RoundEventStore, StoreConfig};

use tally_client::ClientError;
use tally_types::Round;

/// Error types for history loading.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// `from` is greater than `to`.
    #[error("invalid round range [{from}, {to}]")]
    InvalidRange {
        /// Range start.
        from: Round,
        /// Range end.
        to: Round,
    },

    /// The chain has no block for this round yet.
    #[error("round {0} not finalized")]
    RoundNotFinalized(Round),

    /// The chain returned contradictory data.
    #[error("inconsistent history at round {round}: {detail}")]
    Inconsistent {
        /// Offending round.
        round: Round,
        /// What was wrong.
        detail: String,
    },

    /// A fetch failed permanently.
    #[error("history fetch failed: {0}")]
    Fetch(#[from] ClientError),

    /// A fetch task could not be joined.
    #[error("history fetch task failed: {0}")]
    Task(String),
}

/// Convenience result type for history loading.
pub type Result<T> = std::result::Result<T, HistoryError>;
