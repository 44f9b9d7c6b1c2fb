//! Poll-with-deadline.
//!
//! Replaces fixed sleeps in driver code: a probe is run every `interval`
//! until it reports [`Probe::Ready`] or `deadline` elapses. The caller gets a
//! typed [`PollOutcome`] and decides what a timeout means. A probe error
//! aborts the poll immediately.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

/// Result of a single probe.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Probe<T> {
    /// The awaited condition holds.
    Ready(T),
    /// Not yet; carries a progress description for logs and timeouts.
    NotReady(String),
}

/// Result of a whole poll.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The probe reported ready.
    Ready(T),
    /// The deadline passed first.
    TimedOut {
        /// Progress reported by the last probe, if any ran.
        last: Option<String>,
        /// Time spent polling.
        elapsed: Duration,
    },
}

/// Polling cadence and bound.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Pause between probes.
    pub interval: Duration,
    /// Give up after this long.
    pub deadline: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            deadline: Duration::from_secs(300),
        }
    }
}

/// Probe until ready or until the deadline passes.
///
/// The probe always runs at least once.
///
/// # Errors
///
/// Returns the first error the probe returns.
pub async fn poll_until<F, Fut, T, E>(
    config: &PollConfig,
    mut probe: F,
) -> std::result::Result<PollOutcome<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<Probe<T>, E>>,
{
    let started = Instant::now();
    let mut last = None;

    loop {
        match probe().await? {
            Probe::Ready(value) => return Ok(PollOutcome::Ready(value)),
            Probe::NotReady(progress) => {
                debug!(progress = %progress, "poll: not ready");
                last = Some(progress);
            }
        }

        let elapsed = started.elapsed();
        if elapsed >= config.deadline {
            return Ok(PollOutcome::TimedOut { last, elapsed });
        }
        let remaining = config.deadline - elapsed;
        tokio::time::sleep(config.interval.min(remaining)).await;
    }
}
