//! Fleet workload deployer: one agent pod per node
//!
//! The agent DaemonSet reuses the coordinator's own image with the
//! `kns-job` token swapped for `kns-pod`, tolerates NoExecute and
//! unschedulable taints so degraded nodes are scanned too, and learns its
//! identity only from downward API field references.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, HTTPGetAction, ObjectFieldSelector, Pod,
    PodSpec, PodTemplateSpec, Probe, Toleration,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tracing::info;

use kns_common::{Error, Provisioner, ResourceObject, ScanConfig};

/// Path served by every agent for readiness and liveness
pub const HEALTH_PATH: &str = "/healthz";

/// Taint the node controller puts on cordoned nodes
const UNSCHEDULABLE_TAINT: &str = "node.kubernetes.io/unschedulable";

/// Replace the last occurrence of `from` in an image reference with `to`.
///
/// `registry.example.com/scan/kns-job:1.4` becomes
/// `registry.example.com/scan/kns-pod:1.4`. A reference without the token is
/// returned unchanged.
pub fn agent_image(image: &str, from: &str, to: &str) -> String {
    match image.rfind(from) {
        Some(idx) => format!("{}{}{}", &image[..idx], to, &image[idx + from.len()..]),
        None => image.to_string(),
    }
}

/// Image of the container named `container` in the coordinator's own pod
pub fn container_image(pod: &Pod, container: &str) -> Result<String, Error> {
    let pod_name = pod.metadata.name.as_deref().unwrap_or_default();
    let pod_ns = pod.metadata.namespace.as_deref().unwrap_or_default();
    pod.spec
        .as_ref()
        .and_then(|spec| spec.containers.iter().find(|c| c.name == container))
        .and_then(|c| c.image.clone())
        .ok_or_else(|| {
            Error::config(format!(
                "no container named {container} with an image found in pod {pod_ns}/{pod_name}"
            ))
        })
}

fn field_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                field_path: field_path.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn http_probe(port: u16, initial_delay_seconds: i32, period_seconds: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(HEALTH_PATH.to_string()),
            port: IntOrString::Int(i32::from(port)),
            ..Default::default()
        }),
        initial_delay_seconds: Some(initial_delay_seconds),
        period_seconds: Some(period_seconds),
        ..Default::default()
    }
}

/// Agent arguments mirroring the coordinator's timing, so both sides
/// validate against the same lead time.
fn agent_args(config: &ScanConfig) -> Vec<String> {
    vec![
        format!("--lead-time-secs={}", config.timing.lead_time.as_secs()),
        format!("--skew-factor={}", config.timing.skew_factor),
        format!("--port={}", config.agent_port),
    ]
}

/// Build the agent DaemonSet
pub fn build_daemonset(config: &ScanConfig, namespace: &str, image: &str) -> DaemonSet {
    let names = &config.names;
    let labels = BTreeMap::from([(names.workload_label.clone(), String::new())]);

    let container = Container {
        name: names.workload.clone(),
        image: Some(image.to_string()),
        image_pull_policy: Some("Always".to_string()),
        args: Some(agent_args(config)),
        env: Some(vec![
            field_env(&config.env.pod_name, "metadata.name"),
            field_env(&config.env.pod_namespace, "metadata.namespace"),
            field_env(&config.env.pod_address, "status.podIP"),
        ]),
        ports: Some(vec![ContainerPort {
            name: Some("http".to_string()),
            container_port: i32::from(config.agent_port),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        readiness_probe: Some(http_probe(config.agent_port, 1, 2)),
        liveness_probe: Some(http_probe(config.agent_port, 3, 10)),
        ..Default::default()
    };

    DaemonSet {
        metadata: ObjectMeta {
            name: Some(names.workload.clone()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    service_account_name: Some(names.agent_principal.clone()),
                    tolerations: Some(vec![
                        Toleration {
                            operator: Some("Exists".to_string()),
                            effect: Some("NoExecute".to_string()),
                            ..Default::default()
                        },
                        Toleration {
                            key: Some(UNSCHEDULABLE_TAINT.to_string()),
                            operator: Some("Exists".to_string()),
                            effect: Some("NoSchedule".to_string()),
                            ..Default::default()
                        },
                    ]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Create the agent DaemonSet
pub async fn deploy_agents(
    provisioner: &Provisioner,
    config: &ScanConfig,
    namespace: &str,
    image: &str,
) -> Result<(), Error> {
    let daemonset = build_daemonset(config, namespace, image);
    provisioner
        .create(&ResourceObject::DaemonSet(Box::new(daemonset)))
        .await?;
    info!(
        namespace = %namespace,
        workload = %config.names.workload,
        image = %image,
        "Deployed agent workload"
    );
    Ok(())
}
