//! Scan configuration
//!
//! A single [`ScanConfig`] is constructed once by each binary (from CLI
//! arguments and environment) and passed by reference to every component.
//! Nothing else in the workspace hardcodes label keys, object names or
//! timing constants.

use std::time::Duration;

/// Environment variable names populated by the downward API
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityEnv {
    /// Variable carrying `metadata.name`
    pub pod_name: String,
    /// Variable carrying `metadata.namespace`
    pub pod_namespace: String,
    /// Variable carrying `status.podIP`
    pub pod_address: String,
}

impl Default for IdentityEnv {
    fn default() -> Self {
        Self {
            pod_name: "KNS_POD_NAME".to_string(),
            pod_namespace: "KNS_POD_NAMESPACE".to_string(),
            pod_address: "KNS_POD_ADDRESS".to_string(),
        }
    }
}

/// Names and labels of the objects the coordinator creates
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectNames {
    /// Prefix of the ephemeral namespace (`<prefix>-<suffix>`)
    pub namespace_prefix: String,
    /// Name of the Service used as the shared coordination object
    pub coordination_object: String,
    /// Label on the coordination object carrying the start time
    pub start_time_label: String,
    /// Label selecting agent pods (value is always empty)
    pub workload_label: String,
    /// Name of the agent DaemonSet
    pub workload: String,
    /// Name shared by the agent Role, ServiceAccount and RoleBinding
    pub agent_principal: String,
    /// Container name of the coordinator in its own pod
    pub job_container: String,
    /// Token substituted for `job_container` in the image reference
    pub agent_container: String,
}

impl Default for ObjectNames {
    fn default() -> Self {
        Self {
            namespace_prefix: "network-scan".to_string(),
            coordination_object: "network-scan".to_string(),
            start_time_label: "kube-network-scan/start-time".to_string(),
            workload_label: "kube-network-scan".to_string(),
            workload: "network-scan".to_string(),
            agent_principal: "kns-pod".to_string(),
            job_container: "kns-job".to_string(),
            agent_container: "kns-pod".to_string(),
        }
    }
}

/// Timing of the synchronized start and the teardown
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timing {
    /// Lead time D between publishing the start time and the start itself
    pub lead_time: Duration,
    /// Agents reject start times further than `skew_factor * lead_time` ahead
    pub skew_factor: u32,
    /// How long the scan runs, counted from the synchronized start, before teardown
    pub run_duration: Duration,
    /// Interval between namespace deletion checks
    pub teardown_poll_interval: Duration,
    /// Ceiling after which namespace deletion is reported as unconfirmed
    pub teardown_timeout: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            lead_time: Duration::from_secs(60),
            skew_factor: 2,
            run_duration: Duration::from_secs(60),
            teardown_poll_interval: Duration::from_secs(1),
            teardown_timeout: Duration::from_secs(60),
        }
    }
}

/// Complete configuration for a scan job
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanConfig {
    /// Downward API variable names
    pub env: IdentityEnv,
    /// Object names and labels
    pub names: ObjectNames,
    /// Start and teardown timing
    pub timing: Timing,
    /// Port the agent serves `/healthz` on
    pub agent_port: u16,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            env: IdentityEnv::default(),
            names: ObjectNames::default(),
            timing: Timing::default(),
            agent_port: Self::DEFAULT_AGENT_PORT,
        }
    }
}

impl ScanConfig {
    /// Default agent HTTP port
    pub const DEFAULT_AGENT_PORT: u16 = 80;

    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Furthest ahead of "now" an agent accepts a start time
    pub fn max_start_ahead(&self) -> Duration {
        self.timing
            .lead_time
            .checked_mul(self.timing.skew_factor)
            .unwrap_or(Duration::MAX)
    }

    /// Ephemeral namespace name for a coordinator pod name.
    ///
    /// Uses the trailing `-` token of the generated pod name, so retries of
    /// the same coordinator pod always target the same namespace.
    pub fn child_namespace(&self, pod_name: &str) -> String {
        let suffix = pod_name.rsplit('-').next().unwrap_or(pod_name);
        format!("{}-{}", self.names.namespace_prefix, suffix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_namespace_uses_generated_suffix() {
        let config = ScanConfig::new();
        assert_eq!(
            config.child_namespace("kns-job-x7k2p"),
            "network-scan-x7k2p"
        );
    }

    #[test]
    fn child_namespace_without_dash_uses_whole_name() {
        let config = ScanConfig::new();
        assert_eq!(config.child_namespace("scanner"), "network-scan-scanner");
    }

    #[test]
    fn max_start_ahead_is_multiple_of_lead_time() {
        let config = ScanConfig::new();
        assert_eq!(config.max_start_ahead(), Duration::from_secs(120));
    }

    #[test]
    fn max_start_ahead_saturates_instead_of_overflowing() {
        let mut config = ScanConfig::new();
        config.timing.lead_time = Duration::from_secs(u64::MAX);
        config.timing.skew_factor = 2;
        assert_eq!(config.max_start_ahead(), Duration::MAX);
    }

    #[test]
    fn new_uses_agent_port_80() {
        assert_eq!(ScanConfig::new().agent_port, 80);
        assert_eq!(ScanConfig::new().timing.teardown_timeout, Duration::from_secs(60));
    }
}
