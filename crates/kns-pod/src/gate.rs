//! Agent start-gate
//!
//! Each agent resolves the coordination Service in its own namespace, parses
//! the published start time, checks it lies in `(now, now + factor * D]`, and
//! sleeps until the wall clock reaches it. Every failure is fatal: an agent
//! never guesses a start time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info};

use kns_common::coordination::{read_start_time, StartTimeError};
use kns_common::identity::PodIdentity;
use kns_common::{ResourceKind, ResourceRef, ScanConfig, Substrate, SubstrateError};

/// Start-gate failure
#[derive(Debug, Error)]
pub enum GateError {
    /// Identity variables missing from the pod environment
    #[error("{0}")]
    Identity(#[source] kns_common::Error),

    /// No Kubernetes client could be built from the pod environment
    #[error("failed to create Kubernetes client: {0}")]
    Client(#[source] SubstrateError),

    /// The coordination object could not be read
    #[error("coordination object {resource} unavailable: {source}")]
    CoordinationUnavailable {
        /// Coordination object looked up
        resource: ResourceRef,
        /// Underlying substrate failure
        source: SubstrateError,
    },

    /// The coordination object carries no usable start time
    #[error("coordination object {resource}: {source}")]
    StartTime {
        /// Coordination object read
        resource: ResourceRef,
        /// Parse failure
        source: StartTimeError,
    },

    /// The start time is not in the future
    #[error("start time {start_time} is not after now ({now}); clocks or ordering are broken")]
    StartTimeInPast {
        /// Published start time
        start_time: i64,
        /// Agent clock at read time
        now: i64,
    },

    /// The start time is further ahead than the skew bound allows
    #[error("start time {start_time} is more than {max_ahead:?} after now ({now})")]
    StartTimeTooFar {
        /// Published start time
        start_time: i64,
        /// Agent clock at read time
        now: i64,
        /// Largest accepted distance into the future
        max_ahead: Duration,
    },
}

impl GateError {
    /// Process exit code: 2 for misconfiguration, 3 for coordination failures
    pub fn exit_code(&self) -> i32 {
        match self {
            GateError::Identity(_) | GateError::Client(_) => 2,
            _ => 3,
        }
    }

    /// True when the start time was readable but outside the skew window
    pub fn is_skew_violation(&self) -> bool {
        matches!(
            self,
            GateError::StartTimeInPast { .. } | GateError::StartTimeTooFar { .. }
        )
    }
}

/// Wall clock used to validate and wait for the start time
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Check `start_time` against the agent's clock and return how long to wait.
pub fn validate_start_time(
    start_time: i64,
    now: DateTime<Utc>,
    max_ahead: Duration,
) -> Result<Duration, GateError> {
    let wait = (start_instant(start_time) - now)
        .to_std()
        .ok()
        .filter(|d| !d.is_zero())
        .ok_or(GateError::StartTimeInPast {
            start_time,
            now: now.timestamp(),
        })?;

    if wait > max_ahead {
        return Err(GateError::StartTimeTooFar {
            start_time,
            now: now.timestamp(),
            max_ahead,
        });
    }
    Ok(wait)
}

fn start_instant(start_time: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(start_time, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Discovers, validates and waits for the synchronized start
pub struct StartGate {
    substrate: Arc<dyn Substrate>,
    clock: Arc<dyn Clock>,
    config: ScanConfig,
}

impl StartGate {
    /// Create a gate reading through `substrate` and timing with `clock`
    pub fn new(substrate: Arc<dyn Substrate>, clock: Arc<dyn Clock>, config: ScanConfig) -> Self {
        Self {
            substrate,
            clock,
            config,
        }
    }

    /// Read the published start time from the agent's namespace
    pub async fn discover(&self, identity: &PodIdentity) -> Result<i64, GateError> {
        let resource = ResourceRef::namespaced(
            ResourceKind::Service,
            &identity.namespace,
            &self.config.names.coordination_object,
        );

        let object = self.substrate.get(&resource).await.map_err(|source| {
            GateError::CoordinationUnavailable {
                resource: resource.clone(),
                source,
            }
        })?;
        let service = object
            .as_service()
            .ok_or_else(|| GateError::CoordinationUnavailable {
                resource: resource.clone(),
                source: SubstrateError::Unavailable("object is not a Service".to_string()),
            })?;

        read_start_time(service, &self.config.names.start_time_label)
            .map_err(|source| GateError::StartTime { resource, source })
    }

    /// Discover and validate the start time, returning it with the wait left
    pub async fn check(&self, identity: &PodIdentity) -> Result<(i64, Duration), GateError> {
        let start_time = self.discover(identity).await?;
        let now = self.clock.now();
        let wait = validate_start_time(start_time, now, self.config.max_start_ahead())?;
        info!(
            start_time,
            read_time = now.timestamp(),
            wait_secs = wait.as_secs_f64(),
            "Start time accepted"
        );
        Ok((start_time, wait))
    }

    /// Sleep until the clock reaches `start_time`.
    ///
    /// Re-reads the clock after each sleep so a timer that fires early never
    /// lets the scan begin before the start instant.
    pub async fn wait_until(&self, start_time: i64) {
        let start = start_instant(start_time);
        loop {
            let remaining = match (start - self.clock.now()).to_std() {
                Ok(d) if !d.is_zero() => d,
                _ => return,
            };
            debug!(remaining_secs = remaining.as_secs_f64(), "Waiting for start time");
            tokio::time::sleep(remaining).await;
        }
    }
}
