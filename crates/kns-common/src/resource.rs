//! Resource kinds and references handled by the substrate
//!
//! The scan job only ever touches a closed set of Kubernetes kinds, so
//! objects travel through the [`Substrate`](crate::Substrate) as a single
//! enum rather than as generic `K: Resource` parameters. This keeps the
//! substrate trait object-safe and mockable.

use std::fmt;

use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Namespace, Pod, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use serde::Serialize;

/// Kubernetes kinds used by the scan job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Cluster-scoped isolation boundary
    Namespace,
    /// Agent service principal
    ServiceAccount,
    /// Agent permissions
    Role,
    /// Binds the agent Role to the ServiceAccount
    RoleBinding,
    /// Shared coordination object
    Service,
    /// Per-node agent workload
    DaemonSet,
    /// Coordinator's own pod (read-only)
    Pod,
}

impl ResourceKind {
    /// Whether objects of this kind live inside a namespace
    pub fn is_namespaced(self) -> bool {
        !matches!(self, ResourceKind::Namespace)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ResourceKind::Namespace => "Namespace",
            ResourceKind::ServiceAccount => "ServiceAccount",
            ResourceKind::Role => "Role",
            ResourceKind::RoleBinding => "RoleBinding",
            ResourceKind::Service => "Service",
            ResourceKind::DaemonSet => "DaemonSet",
            ResourceKind::Pod => "Pod",
        };
        f.write_str(kind)
    }
}

/// Identifies one object: kind, optional namespace and name.
///
/// Every error raised by the provisioner carries one of these so failures
/// can be diagnosed without cross-referencing logs.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    /// Object kind
    pub kind: ResourceKind,
    /// Namespace (None for cluster-scoped kinds)
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ResourceRef {
    /// Reference a cluster-scoped object
    pub fn cluster(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }

    /// Reference a namespaced object
    pub fn namespaced(
        kind: ResourceKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Reference a Namespace by name
    pub fn namespace(name: impl Into<String>) -> Self {
        Self::cluster(ResourceKind::Namespace, name)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// A typed Kubernetes object of one of the [`ResourceKind`]s
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceObject {
    /// core/v1 Namespace
    Namespace(Namespace),
    /// core/v1 ServiceAccount
    ServiceAccount(ServiceAccount),
    /// rbac/v1 Role
    Role(Role),
    /// rbac/v1 RoleBinding
    RoleBinding(RoleBinding),
    /// core/v1 Service
    Service(Service),
    /// apps/v1 DaemonSet
    DaemonSet(Box<DaemonSet>),
    /// core/v1 Pod
    Pod(Box<Pod>),
}

impl ResourceObject {
    /// Kind of the wrapped object
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceObject::Namespace(_) => ResourceKind::Namespace,
            ResourceObject::ServiceAccount(_) => ResourceKind::ServiceAccount,
            ResourceObject::Role(_) => ResourceKind::Role,
            ResourceObject::RoleBinding(_) => ResourceKind::RoleBinding,
            ResourceObject::Service(_) => ResourceKind::Service,
            ResourceObject::DaemonSet(_) => ResourceKind::DaemonSet,
            ResourceObject::Pod(_) => ResourceKind::Pod,
        }
    }

    fn metadata(&self) -> &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
        match self {
            ResourceObject::Namespace(o) => &o.metadata,
            ResourceObject::ServiceAccount(o) => &o.metadata,
            ResourceObject::Role(o) => &o.metadata,
            ResourceObject::RoleBinding(o) => &o.metadata,
            ResourceObject::Service(o) => &o.metadata,
            ResourceObject::DaemonSet(o) => &o.metadata,
            ResourceObject::Pod(o) => &o.metadata,
        }
    }

    /// Reference built from the object's own metadata.
    ///
    /// Caller-built objects always carry a deterministic name, so a missing
    /// name maps to the empty string rather than a server-generated one.
    pub fn resource_ref(&self) -> ResourceRef {
        let meta = self.metadata();
        ResourceRef {
            kind: self.kind(),
            namespace: meta.namespace.clone(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }

    /// Serialize the wrapped object to JSON (kind-tagged by k8s-openapi)
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        fn ser<T: Serialize>(v: &T) -> serde_json::Result<serde_json::Value> {
            serde_json::to_value(v)
        }
        match self {
            ResourceObject::Namespace(o) => ser(o),
            ResourceObject::ServiceAccount(o) => ser(o),
            ResourceObject::Role(o) => ser(o),
            ResourceObject::RoleBinding(o) => ser(o),
            ResourceObject::Service(o) => ser(o),
            ResourceObject::DaemonSet(o) => ser(o.as_ref()),
            ResourceObject::Pod(o) => ser(o.as_ref()),
        }
    }

    /// Borrow the Service if this is one
    pub fn as_service(&self) -> Option<&Service> {
        match self {
            ResourceObject::Service(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow the Pod if this is one
    pub fn as_pod(&self) -> Option<&Pod> {
        match self {
            ResourceObject::Pod(p) => Some(p),
            _ => None,
        }
    }
}
