//! # tally-sources
//!
//! Point-in-time views of chain state.
//!
//! ## Modules
//!
//! - [`snapshot`] — Provider Snapshot Source: per-provider node and stake pool state
//! - [`params`] — Protocol Parameter Source: parsed smart-contract configuration
//! - [`aggregate`] — Chain-wide minted and rewarded totals bracketing a window

pub mod aggregate;
pub mod params;
pub mod snapshot;

pub use aggregate::{AggregateBracket, AggregateSource};
pub use params::ProtocolParamSource;
pub use snapshot::{ProviderSnapshotSource, SnapshotConfig};

use tally_client::ClientError;
use tally_types::TypesError;

/// Error types for snapshot and parameter sources.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The chain does not know this provider.
    #[error("provider not found: {0}")]
    NotFound(String),

    /// The chain returned a provider document that cannot be used.
    #[error("invalid provider {key}: {detail}")]
    InvalidProvider {
        /// Provider key.
        key: String,
        /// What was wrong.
        detail: String,
    },

    /// The protocol configuration did not parse.
    #[error("protocol config error: {0}")]
    Config(#[from] TypesError),

    /// A fetch failed permanently.
    #[error("fetch failed: {0}")]
    Fetch(#[from] ClientError),

    /// A fetch task could not be joined.
    #[error("fetch task failed: {0}")]
    Task(String),
}

/// Convenience result type for sources.
pub type Result<T> = std::result::Result<T, SourceError>;
