//! Synchronized-start coordination
//!
//! The coordinator picks `start = now + D` and writes it, once, as a label on
//! a Service in the ephemeral namespace before any agent exists. The Service
//! is never modified afterwards, so agents can read it without locking. Before
//! deploying agents the coordinator reads it back to prove the write is
//! visible.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::info;

use kns_common::coordination::read_start_time;
use kns_common::{Error, Provisioner, ResourceKind, ResourceObject, ResourceRef, ScanConfig};

/// Start time `lead_time` after `now`, truncated to whole seconds.
///
/// Truncating keeps `start - now <= lead_time` for every later reader.
pub fn choose_start_time(now: DateTime<Utc>, lead_time: Duration) -> i64 {
    let lead = i64::try_from(lead_time.as_secs()).unwrap_or(i64::MAX);
    now.timestamp().saturating_add(lead)
}

/// Reference to the coordination Service in a namespace
pub fn coordination_ref(config: &ScanConfig, namespace: &str) -> ResourceRef {
    ResourceRef::namespaced(
        ResourceKind::Service,
        namespace,
        &config.names.coordination_object,
    )
}

/// Build the coordination Service carrying the start time label
pub fn build_coordination_service(config: &ScanConfig, namespace: &str, start_time: i64) -> Service {
    let names = &config.names;
    Service {
        metadata: ObjectMeta {
            name: Some(names.coordination_object.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                names.start_time_label.clone(),
                start_time.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(BTreeMap::from([(names.workload_label.clone(), String::new())])),
            type_: Some("NodePort".to_string()),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                protocol: Some("TCP".to_string()),
                port: i32::from(config.agent_port),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Publish the start time. Must run before the agent workload is created.
pub async fn publish_start_time(
    provisioner: &Provisioner,
    config: &ScanConfig,
    namespace: &str,
    now: DateTime<Utc>,
) -> Result<i64, Error> {
    let start_time = choose_start_time(now, config.timing.lead_time);
    let service = build_coordination_service(config, namespace, start_time);
    provisioner.create(&ResourceObject::Service(service)).await?;

    info!(
        namespace = %namespace,
        start_time,
        lead_time_secs = config.timing.lead_time.as_secs(),
        "Published scan start time"
    );
    Ok(start_time)
}

/// Read the coordination object back and check it carries `expected`, still
/// strictly in the future.
pub async fn verify_start_time(
    provisioner: &Provisioner,
    config: &ScanConfig,
    namespace: &str,
    expected: i64,
    now: DateTime<Utc>,
) -> Result<(), Error> {
    let target = coordination_ref(config, namespace);
    let object = provisioner.get(&target).await?;
    let service = object
        .as_service()
        .ok_or_else(|| Error::precondition(target.clone(), "object is not a Service"))?;

    let observed = read_start_time(service, &config.names.start_time_label)
        .map_err(|e| Error::precondition(target.clone(), e.to_string()))?;

    if observed != expected {
        return Err(Error::precondition(
            target,
            format!("published start time {expected} but read back {observed}"),
        ));
    }
    if observed <= now.timestamp() {
        return Err(Error::precondition(
            target,
            format!(
                "start time {observed} already passed (now {}); lead time too short",
                now.timestamp()
            ),
        ));
    }
    Ok(())
}
