//! kns-job - coordinator for the kube-network-scan ephemeral scan job

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};

use kns_common::identity::{OsEnv, PodIdentity};
use kns_common::shutdown::shutdown_signal;
use kns_common::telemetry::init_tracing;
use kns_common::{Error, KubeSubstrate, Provisioner, ScanConfig};
use kns_job::{run_job, JobOutcome};

/// Provision a cluster-wide network scan, start every agent at once, and
/// tear it all down again
#[derive(Parser, Debug)]
#[command(name = "kns-job", version, about, long_about = None)]
struct Cli {
    /// Seconds between publishing the start time and the start itself
    #[arg(long, env = "KNS_LEAD_TIME_SECS", default_value_t = 60)]
    lead_time_secs: u64,

    /// Agents reject start times further ahead than this multiple of the lead time
    #[arg(long, env = "KNS_SKEW_FACTOR", default_value_t = 2)]
    skew_factor: u32,

    /// Seconds to keep the job alive after deploying agents
    #[arg(long, env = "KNS_RUN_DURATION_SECS", default_value_t = 60)]
    run_duration_secs: u64,

    /// Ceiling for confirming namespace deletion
    #[arg(long, env = "KNS_TEARDOWN_TIMEOUT_SECS", default_value_t = 60)]
    teardown_timeout_secs: u64,

    /// Interval between namespace deletion checks
    #[arg(long, env = "KNS_TEARDOWN_POLL_SECS", default_value_t = 1)]
    teardown_poll_secs: u64,

    /// Port agents serve /healthz on
    #[arg(long, env = "KNS_AGENT_PORT", default_value_t = ScanConfig::DEFAULT_AGENT_PORT)]
    agent_port: u16,

    /// Prefix of the ephemeral namespace
    #[arg(long, env = "KNS_NAMESPACE_PREFIX", default_value = "network-scan")]
    namespace_prefix: String,
}

impl Cli {
    fn into_config(self) -> Result<ScanConfig, Error> {
        if self.lead_time_secs == 0 {
            return Err(Error::config("lead time must be at least one second"));
        }
        if self.skew_factor < 1 {
            return Err(Error::config("skew factor must be at least 1"));
        }
        if self.teardown_poll_secs == 0 {
            return Err(Error::config("teardown poll interval must be at least one second"));
        }

        let lead_time = Duration::from_secs(self.lead_time_secs);
        // Start times are i64 seconds and agents bound them by lead * skew
        if i64::try_from(self.lead_time_secs).is_err()
            || lead_time.checked_mul(self.skew_factor).is_none()
        {
            return Err(Error::config(format!(
                "lead time {}s with skew factor {} is out of range",
                self.lead_time_secs, self.skew_factor
            )));
        }
        if i64::try_from(self.run_duration_secs).is_err() {
            return Err(Error::config(format!(
                "run duration {}s is out of range",
                self.run_duration_secs
            )));
        }

        let mut config = ScanConfig::new();
        config.names.namespace_prefix = self.namespace_prefix;
        config.agent_port = self.agent_port;
        config.timing.lead_time = lead_time;
        config.timing.skew_factor = self.skew_factor;
        config.timing.run_duration = Duration::from_secs(self.run_duration_secs);
        config.timing.teardown_timeout = Duration::from_secs(self.teardown_timeout_secs);
        config.timing.teardown_poll_interval = Duration::from_secs(self.teardown_poll_secs);
        Ok(config)
    }
}

async fn run<S>(cli: Cli, shutdown: S) -> Result<JobOutcome, Error>
where
    S: std::future::Future<Output = ()>,
{
    let config = cli.into_config()?;
    let identity = PodIdentity::coordinator(&OsEnv, &config.env)?;

    let substrate = KubeSubstrate::infer()
        .await
        .map_err(|e| Error::config(format!("failed to create Kubernetes client: {e}")))?;
    let provisioner = Provisioner::new(Arc::new(substrate));

    run_job(&provisioner, &config, &identity, shutdown).await
}

#[tokio::main]
async fn main() {
    init_tracing();
    // Installed before anything exists in the cluster
    let shutdown = shutdown_signal();
    let cli = Cli::parse();

    match run(cli, shutdown).await {
        Ok(outcome) => info!(outcome = ?outcome, "kns-job exiting"),
        Err(e) => {
            error!(
                error = %e,
                class = ?e.class(),
                resource = ?e.resource().map(ToString::to_string),
                "kns-job failed"
            );
            std::process::exit(e.exit_code());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_scan_config() {
        let cli = Cli::parse_from(["kns-job"]);
        assert_eq!(cli.into_config().unwrap(), ScanConfig::new());
    }

    #[test]
    fn flags_override_timing() {
        let cli = Cli::parse_from(["kns-job", "--lead-time-secs", "90", "--run-duration-secs", "300"]);
        let config = cli.into_config().unwrap();
        assert_eq!(config.timing.lead_time, Duration::from_secs(90));
        assert_eq!(config.timing.run_duration, Duration::from_secs(300));
        assert_eq!(config.max_start_ahead(), Duration::from_secs(180));
    }

    #[test]
    fn zero_lead_time_is_config_error() {
        let cli = Cli::parse_from(["kns-job", "--lead-time-secs", "0"]);
        let err = cli.into_config().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn out_of_range_lead_time_is_config_error() {
        let huge = u64::MAX.to_string();
        let cli = Cli::parse_from(["kns-job", "--lead-time-secs", huge.as_str()]);
        let err = cli.into_config().unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn lead_time_times_skew_overflow_is_config_error() {
        let lead = (u64::MAX / 2).to_string();
        let cli = Cli::parse_from(["kns-job", "--lead-time-secs", lead.as_str(), "--skew-factor", "3"]);
        assert_eq!(cli.into_config().unwrap_err().exit_code(), 2);
    }

    #[test]
    fn out_of_range_run_duration_is_config_error() {
        let huge = u64::MAX.to_string();
        let cli = Cli::parse_from(["kns-job", "--run-duration-secs", huge.as_str()]);
        assert_eq!(cli.into_config().unwrap_err().exit_code(), 2);
    }
}
