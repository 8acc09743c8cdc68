//! Poll-until-deadline combinator
//!
//! The substrate is eventually consistent: a delete returns long before the
//! object is actually gone. [`poll_until`] repeatedly evaluates a check until
//! it reports success or the deadline passes, sleeping between attempts.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// Interval and ceiling for a poll loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Time between attempts
    pub interval: Duration,
    /// Give up once this much time has elapsed
    pub timeout: Duration,
}

impl PollConfig {
    /// Create a poll configuration
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// The deadline passed before the condition held
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollTimeout {
    /// Time spent polling
    pub waited: Duration,
    /// Number of checks performed
    pub attempts: u32,
    /// Last error returned by the check, if the final attempts failed
    pub last_error: Option<String>,
}

impl fmt::Display for PollTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "condition not met after {:?} ({} attempts)",
            self.waited, self.attempts
        )?;
        if let Some(e) = &self.last_error {
            write!(f, ", last error: {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for PollTimeout {}

/// Poll until `check` returns `Ok(true)` or the timeout is reached.
///
/// The first check runs immediately. `Ok(false)` and `Err` both mean "not
/// yet"; errors are remembered so the timeout can report them, since an
/// unreachable API server is a common reason a condition never holds.
/// Each check is itself bounded by the time left, so a stalled call cannot
/// hold the loop past the ceiling.
pub async fn poll_until<F, Fut, E>(config: PollConfig, mut check: F) -> Result<(), PollTimeout>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: fmt::Display,
{
    let start = Instant::now();
    let mut attempts = 0u32;
    let mut last_error = None;

    loop {
        attempts += 1;
        let budget = config.timeout.saturating_sub(start.elapsed());
        match tokio::time::timeout(budget, check()).await {
            Ok(Ok(true)) => return Ok(()),
            Ok(Ok(false)) => {
                trace!(attempts, "Polling condition not yet met");
                last_error = None;
            }
            Ok(Err(e)) => {
                trace!(attempts, error = %e, "Polling check returned error");
                last_error = Some(e.to_string());
            }
            Err(_) => {
                trace!(attempts, "Polling check did not complete in time");
                last_error = Some(format!("check did not complete within {budget:?}"));
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= config.timeout {
            return Err(PollTimeout {
                waited: elapsed,
                attempts,
                last_error,
            });
        }

        let remaining = config.timeout - elapsed;
        tokio::time::sleep(config.interval.min(remaining)).await;
    }
}
