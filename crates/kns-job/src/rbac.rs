//! Agent RBAC: Role, ServiceAccount and RoleBinding
//!
//! Agents get exactly one permission: `get` on the coordination Service in
//! the ephemeral namespace.

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::info;

use kns_common::{Error, Provisioner, ResourceObject, ScanConfig};

fn metadata(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

/// Role allowing `get` on the coordination Service only
pub fn build_role(config: &ScanConfig, namespace: &str) -> Role {
    Role {
        metadata: metadata(&config.names.agent_principal, namespace),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["services".to_string()]),
            resource_names: Some(vec![config.names.coordination_object.clone()]),
            verbs: vec!["get".to_string()],
            ..Default::default()
        }]),
    }
}

/// ServiceAccount the agent pods run as
pub fn build_service_account(config: &ScanConfig, namespace: &str) -> ServiceAccount {
    ServiceAccount {
        metadata: metadata(&config.names.agent_principal, namespace),
        ..Default::default()
    }
}

/// RoleBinding granting the agent Role to the agent ServiceAccount
pub fn build_role_binding(config: &ScanConfig, namespace: &str) -> RoleBinding {
    let principal = &config.names.agent_principal;
    RoleBinding {
        metadata: metadata(principal, namespace),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "Role".to_string(),
            name: principal.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: principal.clone(),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        }]),
    }
}

/// Create the agent Role, ServiceAccount and RoleBinding in order
pub async fn provision_agent_rbac(
    provisioner: &Provisioner,
    config: &ScanConfig,
    namespace: &str,
) -> Result<(), Error> {
    provisioner
        .create(&ResourceObject::Role(build_role(config, namespace)))
        .await?;
    provisioner
        .create(&ResourceObject::ServiceAccount(build_service_account(
            config, namespace,
        )))
        .await?;
    provisioner
        .create(&ResourceObject::RoleBinding(build_role_binding(
            config, namespace,
        )))
        .await?;

    info!(
        namespace = %namespace,
        principal = %config.names.agent_principal,
        "Provisioned agent RBAC"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kns_common::{MockSubstrate, ResourceKind};
    use std::sync::{Arc, Mutex};

    #[test]
    fn role_grants_get_on_coordination_service_only() {
        let role = build_role(&ScanConfig::new(), "network-scan-abc");
        let rules = role.rules.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].verbs, vec!["get"]);
        assert_eq!(rules[0].resources.as_deref(), Some(&["services".to_string()][..]));
        assert_eq!(
            rules[0].resource_names.as_deref(),
            Some(&["network-scan".to_string()][..])
        );
        assert_eq!(role.metadata.namespace.as_deref(), Some("network-scan-abc"));
    }

    #[test]
    fn binding_connects_role_and_service_account() {
        let binding = build_role_binding(&ScanConfig::new(), "network-scan-abc");
        assert_eq!(binding.role_ref.kind, "Role");
        assert_eq!(binding.role_ref.name, "kns-pod");
        let subject = &binding.subjects.unwrap()[0];
        assert_eq!(subject.kind, "ServiceAccount");
        assert_eq!(subject.name, "kns-pod");
        assert_eq!(subject.namespace.as_deref(), Some("network-scan-abc"));
    }

    #[tokio::test]
    async fn rbac_objects_are_created_role_first_binding_last() {
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let k = kinds.clone();

        let mut mock = MockSubstrate::new();
        mock.expect_create().returning(move |o| {
            k.lock().unwrap().push(o.kind());
            Ok(o.clone())
        });

        let provisioner = Provisioner::new(Arc::new(mock));
        provision_agent_rbac(&provisioner, &ScanConfig::new(), "network-scan-abc")
            .await
            .unwrap();

        assert_eq!(
            *kinds.lock().unwrap(),
            vec![
                ResourceKind::Role,
                ResourceKind::ServiceAccount,
                ResourceKind::RoleBinding
            ]
        );
    }
}
