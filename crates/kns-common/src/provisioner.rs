//! Resource Provisioner: idempotent create and confirmed delete
//!
//! Wraps a [`Substrate`] so that every failure carries the resource it was
//! about, re-issuing a create for an object that already exists with the same
//! spec succeeds, and deletes can be confirmed by polling until the object
//! is really gone.

use std::sync::Arc;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, SubstrateError};
use crate::poll::{poll_until, PollConfig};
use crate::resource::{ResourceObject, ResourceRef};
use crate::substrate::Substrate;

/// Idempotent create / confirmed delete over a [`Substrate`]
#[derive(Clone)]
pub struct Provisioner {
    substrate: Arc<dyn Substrate>,
}

impl Provisioner {
    /// Create a provisioner over the given substrate
    pub fn new(substrate: Arc<dyn Substrate>) -> Self {
        Self { substrate }
    }

    /// Create an object with a caller-chosen name.
    ///
    /// `AlreadyExists` is treated as success when the stored object matches
    /// the desired one, so a retried coordinator converges instead of failing.
    pub async fn create(&self, object: &ResourceObject) -> Result<ResourceObject, Error> {
        let target = object.resource_ref();
        match self.substrate.create(object).await {
            Ok(created) => {
                info!(resource = %target, "Created resource");
                Ok(created)
            }
            Err(SubstrateError::AlreadyExists) => {
                let existing = self.get(&target).await?;
                if spec_matches(object, &existing) {
                    info!(resource = %target, "Resource already exists with matching spec");
                    Ok(existing)
                } else {
                    warn!(resource = %target, "Resource already exists with a different spec");
                    Err(Error::SpecMismatch { resource: target })
                }
            }
            Err(e) => Err(Error::provision("create", target, e)),
        }
    }

    /// Fetch an object
    pub async fn get(&self, target: &ResourceRef) -> Result<ResourceObject, Error> {
        self.substrate
            .get(target)
            .await
            .map_err(|e| Error::provision("get", target.clone(), e))
    }

    /// Request immediate deletion. An object that is already gone is not an error.
    pub async fn delete(&self, target: &ResourceRef) -> Result<(), Error> {
        match self.substrate.delete(target).await {
            Ok(()) => {
                info!(resource = %target, "Requested deletion");
                Ok(())
            }
            Err(SubstrateError::NotFound) => {
                debug!(resource = %target, "Resource already deleted");
                Ok(())
            }
            Err(source) => Err(Error::Cleanup {
                resource: target.clone(),
                source,
            }),
        }
    }

    /// Whether a name-filtered list returns zero matches
    pub async fn is_gone(&self, target: &ResourceRef) -> Result<bool, SubstrateError> {
        let matches = self.substrate.list_named(target).await?;
        debug!(resource = %target, remaining = matches.len(), "Checked for deleted resource");
        Ok(matches.is_empty())
    }

    /// Delete and poll until a name-filtered list returns zero matches.
    ///
    /// `poll.timeout` bounds the delete request and the confirmation together.
    /// Exceeding it is a [`Error::CleanupTimeout`]: deletion is never assumed.
    pub async fn delete_confirmed(&self, target: &ResourceRef, poll: PollConfig) -> Result<(), Error> {
        let start = Instant::now();

        match tokio::time::timeout(poll.timeout, self.delete(target)).await {
            Ok(requested) => requested?,
            Err(_) => {
                return Err(Error::CleanupTimeout {
                    resource: target.clone(),
                    waited: start.elapsed(),
                    last_error: Some("delete request did not complete".to_string()),
                })
            }
        }

        let remaining = PollConfig::new(poll.interval, poll.timeout.saturating_sub(start.elapsed()));
        poll_until(remaining, || self.is_gone(target))
            .await
            .map_err(|timeout| Error::CleanupTimeout {
                resource: target.clone(),
                waited: start.elapsed(),
                last_error: timeout.last_error,
            })?;

        info!(resource = %target, "Confirmed deletion");
        Ok(())
    }
}

/// Whether `existing` satisfies everything `desired` asks for.
///
/// The API server adds defaults and bookkeeping fields (uid, status, default
/// probe thresholds), so the check is a subset match of the desired JSON
/// against the stored JSON rather than equality.
pub fn spec_matches(desired: &ResourceObject, existing: &ResourceObject) -> bool {
    if desired.kind() != existing.kind() {
        return false;
    }
    match (desired.to_json(), existing.to_json()) {
        (Ok(d), Ok(e)) => json_subset(&d, &e),
        _ => false,
    }
}

fn json_subset(desired: &Value, actual: &Value) -> bool {
    match (desired, actual) {
        (Value::Null, _) => true,
        (Value::Object(d), Value::Object(a)) => d.iter().all(|(key, dv)| match a.get(key) {
            Some(av) => json_subset(dv, av),
            None => dv.is_null(),
        }),
        (Value::Array(d), Value::Array(a)) => {
            d.len() == a.len() && d.iter().zip(a).all(|(dv, av)| json_subset(dv, av))
        }
        (d, a) => d == a,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ResourceKind;
    use crate::substrate::MockSubstrate;
    use k8s_openapi::api::core::v1::{Namespace, NamespaceStatus, ServiceAccount};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn namespace(name: &str, labels: &[(&str, &str)]) -> ResourceObject {
        let labels: BTreeMap<String, String> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ResourceObject::Namespace(Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: (!labels.is_empty()).then_some(labels),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    fn stored(object: ResourceObject) -> ResourceObject {
        match object {
            ResourceObject::Namespace(mut ns) => {
                ns.metadata.uid = Some("b1c2".to_string());
                ns.metadata.resource_version = Some("42".to_string());
                ns.status = Some(NamespaceStatus {
                    phase: Some("Active".to_string()),
                    ..Default::default()
                });
                ResourceObject::Namespace(ns)
            }
            other => other,
        }
    }

    fn poll() -> PollConfig {
        PollConfig::new(Duration::from_secs(1), Duration::from_secs(60))
    }

    #[test]
    fn json_subset_ignores_server_populated_fields() {
        let desired = json!({"spec": {"ports": [{"port": 80}]}});
        let actual = json!({"spec": {"ports": [{"port": 80, "targetPort": 80}], "clusterIP": "10.0.0.1"}});
        assert!(json_subset(&desired, &actual));
    }

    #[test]
    fn json_subset_detects_changed_values_and_lengths() {
        assert!(!json_subset(&json!({"a": 1}), &json!({"a": 2})));
        assert!(!json_subset(&json!({"a": [1]}), &json!({"a": [1, 2]})));
        assert!(!json_subset(&json!({"a": 1}), &json!({})));
    }

    #[test]
    fn spec_matches_requires_same_kind() {
        let ns = namespace("network-scan-abc", &[]);
        let sa = ResourceObject::ServiceAccount(ServiceAccount {
            metadata: ObjectMeta {
                name: Some("network-scan-abc".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        assert!(!spec_matches(&ns, &sa));
    }

    #[tokio::test]
    async fn create_returns_created_object() {
        let mut mock = MockSubstrate::new();
        mock.expect_create().returning(|o| Ok(stored(o.clone())));

        let provisioner = Provisioner::new(Arc::new(mock));
        let created = provisioner
            .create(&namespace("network-scan-abc", &[]))
            .await
            .unwrap();
        assert_eq!(created.resource_ref(), ResourceRef::namespace("network-scan-abc"));
    }

    #[tokio::test]
    async fn create_already_exists_with_matching_spec_is_success() {
        let desired = namespace("network-scan-abc", &[("app", "scan")]);
        let existing = stored(desired.clone());

        let mut mock = MockSubstrate::new();
        mock.expect_create()
            .times(1)
            .returning(|_| Err(SubstrateError::AlreadyExists));
        mock.expect_get()
            .times(1)
            .returning(move |_| Ok(existing.clone()));

        let provisioner = Provisioner::new(Arc::new(mock));
        assert!(provisioner.create(&desired).await.is_ok());
    }

    #[tokio::test]
    async fn create_already_exists_with_different_spec_is_mismatch() {
        let desired = namespace("network-scan-abc", &[("app", "scan")]);
        let existing = stored(namespace("network-scan-abc", &[("app", "other")]));

        let mut mock = MockSubstrate::new();
        mock.expect_create()
            .returning(|_| Err(SubstrateError::AlreadyExists));
        mock.expect_get().returning(move |_| Ok(existing.clone()));

        let provisioner = Provisioner::new(Arc::new(mock));
        let err = provisioner.create(&desired).await.unwrap_err();
        assert!(matches!(err, Error::SpecMismatch { .. }));
    }

    #[tokio::test]
    async fn create_forbidden_names_the_resource() {
        let mut mock = MockSubstrate::new();
        mock.expect_create()
            .returning(|_| Err(SubstrateError::Forbidden("namespaces is forbidden".into())));

        let provisioner = Provisioner::new(Arc::new(mock));
        let err = provisioner
            .create(&namespace("network-scan-abc", &[]))
            .await
            .unwrap_err();
        assert_eq!(err.resource(), Some(&ResourceRef::namespace("network-scan-abc")));
        assert!(err.to_string().contains("forbidden"));
    }

    #[tokio::test]
    async fn delete_of_missing_object_is_ok() {
        let mut mock = MockSubstrate::new();
        mock.expect_delete().returning(|_| Err(SubstrateError::NotFound));

        let provisioner = Provisioner::new(Arc::new(mock));
        let target = ResourceRef::namespaced(ResourceKind::Service, "ns", "network-scan");
        assert!(provisioner.delete(&target).await.is_ok());
    }

    #[tokio::test]
    async fn delete_failure_is_cleanup_error() {
        let mut mock = MockSubstrate::new();
        mock.expect_delete()
            .returning(|_| Err(SubstrateError::Unavailable("connection reset".into())));

        let provisioner = Provisioner::new(Arc::new(mock));
        let err = provisioner
            .delete(&ResourceRef::namespace("network-scan-abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cleanup { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_confirmed_polls_until_zero_matches() {
        let remaining = Arc::new(std::sync::atomic::AtomicU32::new(3));
        let r = remaining.clone();

        let mut mock = MockSubstrate::new();
        mock.expect_delete().times(1).returning(|_| Ok(()));
        mock.expect_list_named().returning(move |t| {
            if r.fetch_sub(1, std::sync::atomic::Ordering::SeqCst) > 1 {
                Ok(vec![namespace(&t.name, &[])])
            } else {
                Ok(vec![])
            }
        });

        let provisioner = Provisioner::new(Arc::new(mock));
        let start = tokio::time::Instant::now();
        provisioner
            .delete_confirmed(&ResourceRef::namespace("network-scan-abc"), poll())
            .await
            .unwrap();
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    /// Substrate whose delete or list never answers
    struct Unresponsive {
        stall_delete: bool,
    }

    #[async_trait::async_trait]
    impl Substrate for Unresponsive {
        async fn create(&self, object: &ResourceObject) -> Result<ResourceObject, SubstrateError> {
            Ok(object.clone())
        }

        async fn get(&self, _: &ResourceRef) -> Result<ResourceObject, SubstrateError> {
            Err(SubstrateError::NotFound)
        }

        async fn list_named(&self, _: &ResourceRef) -> Result<Vec<ResourceObject>, SubstrateError> {
            std::future::pending().await
        }

        async fn delete(&self, _: &ResourceRef) -> Result<(), SubstrateError> {
            if self.stall_delete {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_list_still_times_out_at_ceiling() {
        let provisioner = Provisioner::new(Arc::new(Unresponsive { stall_delete: false }));
        let start = tokio::time::Instant::now();

        let err = provisioner
            .delete_confirmed(&ResourceRef::namespace("network-scan-abc"), poll())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::CleanupTimeout { .. }));
        assert_eq!(start.elapsed(), Duration::from_secs(60));
        assert!(err.to_string().contains("did not complete"));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_delete_request_counts_against_ceiling() {
        let provisioner = Provisioner::new(Arc::new(Unresponsive { stall_delete: true }));
        let start = tokio::time::Instant::now();

        let err = provisioner
            .delete_confirmed(&ResourceRef::namespace("network-scan-abc"), poll())
            .await
            .unwrap_err();

        match err {
            Error::CleanupTimeout { waited, last_error, .. } => {
                assert_eq!(waited, Duration::from_secs(60));
                assert_eq!(last_error.as_deref(), Some("delete request did not complete"));
            }
            other => panic!("expected CleanupTimeout, got {other:?}"),
        }
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_confirmed_times_out_when_object_never_disappears() {
        let mut mock = MockSubstrate::new();
        mock.expect_delete().returning(|_| Ok(()));
        mock.expect_list_named()
            .returning(|t| Ok(vec![namespace(&t.name, &[])]));

        let provisioner = Provisioner::new(Arc::new(mock));
        let err = provisioner
            .delete_confirmed(&ResourceRef::namespace("network-scan-abc"), poll())
            .await
            .unwrap_err();
        match err {
            Error::CleanupTimeout { waited, .. } => assert_eq!(waited, Duration::from_secs(60)),
            other => panic!("expected CleanupTimeout, got {other:?}"),
        }
    }
}
