//! Coordinator main loop
//!
//! Strictly ordered: discover own image, create the namespace, provision
//! RBAC, publish and verify the start time, deploy agents, wait out the run,
//! tear down. Every step after the namespace exists runs inside
//! [`with_namespace`], so teardown happens on success, on failure and on
//! external termination alike.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use kns_common::identity::PodIdentity;
use kns_common::{Error, Provisioner, ResourceKind, ResourceRef, ScanConfig};

use crate::coordination::{publish_start_time, verify_start_time};
use crate::namespace::with_namespace;
use crate::rbac::provision_agent_rbac;
use crate::workload::{agent_image, container_image, deploy_agents};

/// How a job that tore down cleanly ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    /// The run duration elapsed
    Completed,
    /// Termination was requested before the run duration elapsed
    Interrupted,
}

/// Derive the agent image from the coordinator's own pod
pub async fn discover_agent_image(
    provisioner: &Provisioner,
    config: &ScanConfig,
    identity: &PodIdentity,
) -> Result<String, Error> {
    let own_pod = ResourceRef::namespaced(ResourceKind::Pod, &identity.namespace, &identity.name);
    let object = provisioner.get(&own_pod).await?;
    let pod = object
        .as_pod()
        .ok_or_else(|| Error::config(format!("{own_pod} is not a Pod")))?;

    let names = &config.names;
    let image = container_image(pod, &names.job_container)?;
    Ok(agent_image(&image, &names.job_container, &names.agent_container))
}

/// Provisioning sequence inside the namespace, followed by the run.
async fn scan(
    provisioner: &Provisioner,
    config: &ScanConfig,
    namespace: &str,
    image: &str,
) -> Result<(), Error> {
    provision_agent_rbac(provisioner, config, namespace).await?;

    let start_time = publish_start_time(provisioner, config, namespace, Utc::now()).await?;
    verify_start_time(provisioner, config, namespace, start_time, Utc::now()).await?;

    deploy_agents(provisioner, config, namespace, image).await?;

    let remaining = run_remaining(start_time, Utc::now(), config.timing.run_duration);
    info!(
        namespace = %namespace,
        start_time,
        run_duration_secs = config.timing.run_duration.as_secs(),
        remaining_secs = remaining.as_secs(),
        "Scan running"
    );
    tokio::time::sleep(remaining).await;
    Ok(())
}

/// Time left until `run_duration` after the synchronized start.
///
/// The run is counted from `start_time`, not from deployment, so agents
/// get the full duration once they begin scanning.
pub fn run_remaining(start_time: i64, now: DateTime<Utc>, run_duration: Duration) -> Duration {
    let run_secs = i64::try_from(run_duration.as_secs()).unwrap_or(i64::MAX);
    let end = DateTime::from_timestamp(start_time.saturating_add(run_secs), 0)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    (end - now).to_std().unwrap_or(Duration::ZERO)
}

/// Run one scan job to completion.
///
/// `shutdown` resolving cancels whatever step is in flight; teardown still
/// runs and the job reports [`JobOutcome::Interrupted`].
pub async fn run_job<S>(
    provisioner: &Provisioner,
    config: &ScanConfig,
    identity: &PodIdentity,
    shutdown: S,
) -> Result<JobOutcome, Error>
where
    S: Future<Output = ()>,
{
    let image = discover_agent_image(provisioner, config, identity).await?;
    let namespace = config.child_namespace(&identity.name);
    info!(
        coordinator = %identity.name,
        namespace = %namespace,
        image = %image,
        "Starting scan job"
    );

    let outcome = with_namespace(provisioner, &namespace, config, |ns| async move {
        // A termination that arrived during namespace creation wins
        tokio::select! {
            biased;
            () = shutdown => {
                warn!(namespace = %ns, "Termination requested, tearing down");
                Ok(JobOutcome::Interrupted)
            }
            result = scan(provisioner, config, &ns, &image) => result.map(|()| JobOutcome::Completed),
        }
    })
    .await?;

    info!(namespace = %namespace, outcome = ?outcome, "Scan job finished");
    Ok(outcome)
}
