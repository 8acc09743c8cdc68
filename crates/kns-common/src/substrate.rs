//! Substrate access: create/get/list/delete over the scan job's kinds
//!
//! [`Substrate`] is the only seam between the scan job and the API server.
//! Production code uses [`KubeSubstrate`]; tests use the mockall-generated
//! `MockSubstrate` (exported with the `mock` feature).

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{Namespace, Pod, Service, ServiceAccount};
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::SubstrateError;
use crate::resource::{ResourceKind, ResourceObject, ResourceRef};

/// Field manager recorded on every object the scan job creates
pub const FIELD_MANAGER: &str = "kube-network-scan";

/// Trait abstracting the Kubernetes API for the scan job
///
/// Names are always caller-chosen; the substrate never generates them.
#[cfg_attr(any(test, feature = "mock"), mockall::automock)]
#[async_trait]
pub trait Substrate: Send + Sync {
    /// Create an object, returning the stored version
    async fn create(&self, object: &ResourceObject) -> Result<ResourceObject, SubstrateError>;

    /// Fetch an object by reference
    async fn get(&self, target: &ResourceRef) -> Result<ResourceObject, SubstrateError>;

    /// List objects of `target.kind` whose `metadata.name` equals `target.name`
    async fn list_named(&self, target: &ResourceRef)
        -> Result<Vec<ResourceObject>, SubstrateError>;

    /// Request immediate deletion (zero grace period)
    async fn delete(&self, target: &ResourceRef) -> Result<(), SubstrateError>;
}

/// [`Substrate`] backed by a kube-rs client
#[derive(Clone)]
pub struct KubeSubstrate {
    client: Client,
}

impl KubeSubstrate {
    /// Wrap the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the in-cluster service account (or kubeconfig)
    pub async fn infer() -> Result<Self, SubstrateError> {
        let client = Client::try_default()
            .await
            .map_err(|e| SubstrateError::Unavailable(format!("failed to create client: {e}")))?;
        Ok(Self::new(client))
    }

    fn namespaced<K>(&self, target: &ResourceRef) -> Result<Api<K>, SubstrateError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        let ns = target.namespace.as_deref().ok_or_else(|| {
            SubstrateError::Unavailable(format!("{target} is namespaced but has no namespace"))
        })?;
        Ok(Api::namespaced(self.client.clone(), ns))
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }
}

async fn create_with<K>(api: Api<K>, object: &K) -> Result<K, SubstrateError>
where
    K: Resource + Clone + Debug + Serialize + DeserializeOwned,
{
    let params = PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    };
    Ok(api.create(&params, object).await?)
}

async fn list_with<K>(api: Api<K>, name: &str) -> Result<Vec<K>, SubstrateError>
where
    K: Resource + Clone + Debug + DeserializeOwned,
{
    let params = ListParams::default().fields(&format!("metadata.name={name}"));
    Ok(api.list(&params).await?.items)
}

async fn delete_with<K>(api: Api<K>, name: &str) -> Result<(), SubstrateError>
where
    K: Resource + Clone + Debug + DeserializeOwned,
{
    let params = DeleteParams {
        grace_period_seconds: Some(0),
        ..Default::default()
    };
    api.delete(name, &params).await?;
    Ok(())
}

#[async_trait]
impl Substrate for KubeSubstrate {
    async fn create(&self, object: &ResourceObject) -> Result<ResourceObject, SubstrateError> {
        let target = object.resource_ref();
        Ok(match object {
            ResourceObject::Namespace(o) => {
                ResourceObject::Namespace(create_with(self.namespaces(), o).await?)
            }
            ResourceObject::ServiceAccount(o) => ResourceObject::ServiceAccount(
                create_with(self.namespaced::<ServiceAccount>(&target)?, o).await?,
            ),
            ResourceObject::Role(o) => {
                ResourceObject::Role(create_with(self.namespaced::<Role>(&target)?, o).await?)
            }
            ResourceObject::RoleBinding(o) => ResourceObject::RoleBinding(
                create_with(self.namespaced::<RoleBinding>(&target)?, o).await?,
            ),
            ResourceObject::Service(o) => {
                ResourceObject::Service(create_with(self.namespaced::<Service>(&target)?, o).await?)
            }
            ResourceObject::DaemonSet(o) => ResourceObject::DaemonSet(Box::new(
                create_with(self.namespaced::<DaemonSet>(&target)?, o).await?,
            )),
            ResourceObject::Pod(o) => ResourceObject::Pod(Box::new(
                create_with(self.namespaced::<Pod>(&target)?, o).await?,
            )),
        })
    }

    async fn get(&self, target: &ResourceRef) -> Result<ResourceObject, SubstrateError> {
        let name = target.name.as_str();
        Ok(match target.kind {
            ResourceKind::Namespace => ResourceObject::Namespace(self.namespaces().get(name).await?),
            ResourceKind::ServiceAccount => ResourceObject::ServiceAccount(
                self.namespaced::<ServiceAccount>(target)?.get(name).await?,
            ),
            ResourceKind::Role => ResourceObject::Role(self.namespaced::<Role>(target)?.get(name).await?),
            ResourceKind::RoleBinding => ResourceObject::RoleBinding(
                self.namespaced::<RoleBinding>(target)?.get(name).await?,
            ),
            ResourceKind::Service => {
                ResourceObject::Service(self.namespaced::<Service>(target)?.get(name).await?)
            }
            ResourceKind::DaemonSet => ResourceObject::DaemonSet(Box::new(
                self.namespaced::<DaemonSet>(target)?.get(name).await?,
            )),
            ResourceKind::Pod => {
                ResourceObject::Pod(Box::new(self.namespaced::<Pod>(target)?.get(name).await?))
            }
        })
    }

    async fn list_named(
        &self,
        target: &ResourceRef,
    ) -> Result<Vec<ResourceObject>, SubstrateError> {
        let name = target.name.as_str();
        Ok(match target.kind {
            ResourceKind::Namespace => list_with(self.namespaces(), name)
                .await?
                .into_iter()
                .map(ResourceObject::Namespace)
                .collect(),
            ResourceKind::ServiceAccount => {
                list_with(self.namespaced::<ServiceAccount>(target)?, name)
                    .await?
                    .into_iter()
                    .map(ResourceObject::ServiceAccount)
                    .collect()
            }
            ResourceKind::Role => list_with(self.namespaced::<Role>(target)?, name)
                .await?
                .into_iter()
                .map(ResourceObject::Role)
                .collect(),
            ResourceKind::RoleBinding => list_with(self.namespaced::<RoleBinding>(target)?, name)
                .await?
                .into_iter()
                .map(ResourceObject::RoleBinding)
                .collect(),
            ResourceKind::Service => list_with(self.namespaced::<Service>(target)?, name)
                .await?
                .into_iter()
                .map(ResourceObject::Service)
                .collect(),
            ResourceKind::DaemonSet => list_with(self.namespaced::<DaemonSet>(target)?, name)
                .await?
                .into_iter()
                .map(|o| ResourceObject::DaemonSet(Box::new(o)))
                .collect(),
            ResourceKind::Pod => list_with(self.namespaced::<Pod>(target)?, name)
                .await?
                .into_iter()
                .map(|o| ResourceObject::Pod(Box::new(o)))
                .collect(),
        })
    }

    async fn delete(&self, target: &ResourceRef) -> Result<(), SubstrateError> {
        let name = target.name.as_str();
        match target.kind {
            ResourceKind::Namespace => delete_with(self.namespaces(), name).await,
            ResourceKind::ServiceAccount => {
                delete_with(self.namespaced::<ServiceAccount>(target)?, name).await
            }
            ResourceKind::Role => delete_with(self.namespaced::<Role>(target)?, name).await,
            ResourceKind::RoleBinding => {
                delete_with(self.namespaced::<RoleBinding>(target)?, name).await
            }
            ResourceKind::Service => delete_with(self.namespaced::<Service>(target)?, name).await,
            ResourceKind::DaemonSet => {
                delete_with(self.namespaced::<DaemonSet>(target)?, name).await
            }
            ResourceKind::Pod => delete_with(self.namespaced::<Pod>(target)?, name).await,
        }
    }
}
