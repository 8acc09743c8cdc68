//! Agent run loop: `Discovering -> Waiting -> Scanning -> Done`

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

use kns_common::identity::PodIdentity;

use crate::gate::{GateError, StartGate};
use crate::health::AgentPhase;
use crate::payload::{PayloadError, ScanContext, ScanPayload};

/// Agent failure
#[derive(Debug, Error)]
pub enum AgentError {
    /// The start-gate refused to open
    #[error(transparent)]
    Gate(#[from] GateError),

    /// The payload ran and failed
    #[error(transparent)]
    Payload(#[from] PayloadError),
}

impl AgentError {
    /// Process exit code
    pub fn exit_code(&self) -> i32 {
        match self {
            AgentError::Gate(e) => e.exit_code(),
            AgentError::Payload(_) => 1,
        }
    }
}

/// One agent: a start-gate, a payload, and the phase it reports
pub struct Agent {
    gate: StartGate,
    payload: Arc<dyn ScanPayload>,
    phase: watch::Sender<AgentPhase>,
}

impl Agent {
    /// Create an agent publishing its phase on `phase`
    pub fn new(
        gate: StartGate,
        payload: Arc<dyn ScanPayload>,
        phase: watch::Sender<AgentPhase>,
    ) -> Self {
        Self {
            gate,
            payload,
            phase,
        }
    }

    fn enter(&self, phase: AgentPhase) {
        self.phase.send_replace(phase);
        info!(phase = %phase, "Agent phase changed");
    }

    /// Pass the start-gate and run the payload once
    pub async fn run(&self, identity: &PodIdentity) -> Result<ScanContext, AgentError> {
        self.enter(AgentPhase::Discovering);
        let (start_time, _) = self.gate.check(identity).await?;

        self.enter(AgentPhase::Waiting);
        self.gate.wait_until(start_time).await;

        self.enter(AgentPhase::Scanning);
        let ctx = ScanContext {
            identity: identity.clone(),
            start_time,
        };
        let result = self.payload.run(&ctx).await;
        self.enter(AgentPhase::Done);

        result?;
        Ok(ctx)
    }
}
