//! kns-pod - per-node agent for the kube-network-scan synchronized scan

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

use kns_common::identity::{OsEnv, PodIdentity};
use kns_common::shutdown::shutdown_signal;
use kns_common::telemetry::init_tracing;
use kns_common::{KubeSubstrate, ScanConfig};
use kns_pod::{serve_health, Agent, AgentPhase, GateError, NoopPayload, StartGate, SystemClock};

/// Wait for the coordinator's synchronized start, then scan
#[derive(Parser, Debug)]
#[command(name = "kns-pod", version, about, long_about = None)]
struct Cli {
    /// Lead time the coordinator published the start time with
    #[arg(long, env = "KNS_LEAD_TIME_SECS", default_value_t = 60)]
    lead_time_secs: u64,

    /// Reject start times further ahead than this multiple of the lead time
    #[arg(long, env = "KNS_SKEW_FACTOR", default_value_t = 2)]
    skew_factor: u32,

    /// Port to serve /healthz on
    #[arg(long, env = "KNS_AGENT_PORT", default_value_t = ScanConfig::DEFAULT_AGENT_PORT)]
    port: u16,
}

impl Cli {
    fn into_config(self) -> ScanConfig {
        let mut config = ScanConfig::new();
        config.agent_port = self.port;
        config.timing.lead_time = Duration::from_secs(self.lead_time_secs);
        config.timing.skew_factor = self.skew_factor;
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    // Both installed before the pod does anything observable
    let health_shutdown = shutdown_signal();
    let shutdown = shutdown_signal();
    let config = Cli::parse().into_config();

    let (phase_tx, phase_rx) = watch::channel(AgentPhase::Discovering);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.agent_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind health port {}", config.agent_port))?;
    let server = tokio::spawn(serve_health(listener, phase_rx, health_shutdown));

    let identity = match PodIdentity::agent(&OsEnv, &config.env) {
        Ok(identity) => identity,
        Err(e) => {
            let err = GateError::Identity(e);
            fail(err.exit_code(), &err)
        }
    };
    let substrate = match KubeSubstrate::infer().await {
        Ok(substrate) => substrate,
        Err(e) => {
            let err = GateError::Client(e);
            fail(err.exit_code(), &err)
        }
    };

    let agent = Agent::new(
        StartGate::new(Arc::new(substrate), Arc::new(SystemClock), config),
        Arc::new(NoopPayload),
        phase_tx,
    );

    tokio::select! {
        result = agent.run(&identity) => match result {
            Ok(ctx) => info!(start_time = ctx.start_time, "Scan finished, serving health until terminated"),
            Err(e) => fail(e.exit_code(), &e),
        },
        () = shutdown => {
            info!("Terminated before the scan finished");
            return Ok(());
        }
    }

    // The health server's own shutdown signal ends it
    server
        .await
        .context("health server task failed")?
        .context("health server error")?;
    Ok(())
}

fn fail(code: i32, e: &dyn std::error::Error) -> ! {
    error!(error = %e, exit_code = code, "kns-pod failed");
    std::process::exit(code)
}
