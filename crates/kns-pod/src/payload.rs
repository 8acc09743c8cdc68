//! Scan payload boundary
//!
//! The start-gate guarantees the payload runs no earlier than the published
//! start time. What the payload probes is up to the implementation; the
//! default only records that the synchronized start happened.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use kns_common::identity::PodIdentity;

/// What a payload knows about the run it belongs to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanContext {
    /// Identity of this agent
    pub identity: PodIdentity,
    /// Published start time the gate released at (Unix seconds)
    pub start_time: i64,
}

/// Payload failure
#[derive(Debug, Error)]
#[error("scan payload failed: {message}")]
pub struct PayloadError {
    /// What went wrong
    pub message: String,
}

impl PayloadError {
    /// Create a payload error with the given message
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }
}

/// Work run by each agent once the start-gate opens
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScanPayload: Send + Sync {
    /// Run the scan
    async fn run(&self, ctx: &ScanContext) -> Result<(), PayloadError>;
}

/// Payload that only logs the synchronized start
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopPayload;

#[async_trait]
impl ScanPayload for NoopPayload {
    async fn run(&self, ctx: &ScanContext) -> Result<(), PayloadError> {
        info!(
            agent = %ctx.identity.name,
            address = ctx.identity.address.as_deref().unwrap_or_default(),
            start_time = ctx.start_time,
            "Synchronized start reached"
        );
        Ok(())
    }
}
