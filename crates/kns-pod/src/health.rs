//! Agent health endpoint
//!
//! `/healthz` answers from process start so the DaemonSet's readiness and
//! liveness probes pass while the agent is still waiting at the gate.

use std::fmt;
use std::future::Future;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

/// Where the agent is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentPhase {
    /// Reading identity and the coordination object
    Discovering,
    /// Start time accepted, sleeping until it arrives
    Waiting,
    /// Payload running
    Scanning,
    /// Payload finished
    Done,
}

impl AgentPhase {
    /// Lowercase name used on the wire
    pub fn as_str(self) -> &'static str {
        match self {
            AgentPhase::Discovering => "discovering",
            AgentPhase::Waiting => "waiting",
            AgentPhase::Scanning => "scanning",
            AgentPhase::Done => "done",
        }
    }
}

impl fmt::Display for AgentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a `/healthz` response
#[derive(Clone, Debug, Serialize)]
pub struct HealthStatus {
    /// Always `ok` while the process is serving
    pub status: &'static str,
    /// Current phase
    pub phase: AgentPhase,
}

async fn healthz(State(phase): State<watch::Receiver<AgentPhase>>) -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        phase: *phase.borrow(),
    })
}

/// Build the health router reporting the phase published on `phase`
pub fn health_routes(phase: watch::Receiver<AgentPhase>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .with_state(phase)
}

/// Serve `/healthz` on `listener` until `shutdown` resolves
pub async fn serve_health<F>(
    listener: TcpListener,
    phase: watch::Receiver<AgentPhase>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "Health server started");
    }
    axum::serve(listener, health_routes(phase))
        .with_graceful_shutdown(shutdown)
        .await
}
