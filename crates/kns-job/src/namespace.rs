//! Ephemeral namespace lifecycle
//!
//! The namespace is the isolation boundary for everything a scan job creates:
//! deleting it cascades to the RBAC objects, the coordination Service and the
//! agent DaemonSet. It moves through
//! `Creating -> Active -> Deleting -> Deleted`, and [`with_namespace`]
//! guarantees the last two transitions are attempted on every exit path.

use std::collections::BTreeMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::{error, info, warn};

use kns_common::poll::PollConfig;
use kns_common::{
    Error, Provisioner, ResourceObject, ResourceRef, ScanConfig, SubstrateError, LABEL_MANAGED_BY,
    LABEL_MANAGED_BY_VALUE,
};

/// Lifecycle state of the ephemeral namespace
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NamespaceState {
    /// Create request in flight
    Creating,
    /// Created; children may be provisioned
    Active,
    /// Delete requested, waiting for confirmation
    Deleting,
    /// Confirmed absent
    Deleted,
}

/// Build the Namespace object for a scan job
pub fn build_namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(BTreeMap::from([(
                LABEL_MANAGED_BY.to_string(),
                LABEL_MANAGED_BY_VALUE.to_string(),
            )])),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Exclusive handle on the ephemeral namespace.
///
/// Obtained with [`NamespaceLease::acquire`] and released exactly once with
/// [`NamespaceLease::release`]. Dropping a lease that was never confirmed
/// deleted logs the leak.
pub struct NamespaceLease {
    provisioner: Provisioner,
    target: ResourceRef,
    poll: PollConfig,
    state: NamespaceState,
}

impl NamespaceLease {
    /// Create the namespace and return the lease in `Active` state.
    ///
    /// When the create outcome is ambiguous (the API server became
    /// unreachable mid-request) the namespace may exist, so teardown runs
    /// before the error is returned.
    pub async fn acquire(
        provisioner: &Provisioner,
        name: &str,
        config: &ScanConfig,
    ) -> Result<Self, Error> {
        let mut lease = Self {
            provisioner: provisioner.clone(),
            target: ResourceRef::namespace(name),
            poll: PollConfig::new(
                config.timing.teardown_poll_interval,
                config.timing.teardown_timeout,
            ),
            state: NamespaceState::Creating,
        };

        let object = ResourceObject::Namespace(build_namespace(name));
        match provisioner.create(&object).await {
            Ok(_) => {
                lease.state = NamespaceState::Active;
                info!(namespace = %name, "Namespace active");
                Ok(lease)
            }
            Err(
                e @ Error::Provision {
                    source: SubstrateError::Unavailable(_),
                    ..
                },
            ) => {
                warn!(namespace = %name, error = %e, "Namespace create outcome unknown, tearing down");
                match lease.release().await {
                    Ok(()) => Err(e),
                    Err(cleanup) => Err(e.with_cleanup_failure(cleanup)),
                }
            }
            Err(e) => {
                // Nothing was created
                lease.state = NamespaceState::Deleted;
                Err(e)
            }
        }
    }

    /// Namespace name
    pub fn name(&self) -> &str {
        &self.target.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> NamespaceState {
        self.state
    }

    /// Delete the namespace and wait until a name-filtered list is empty
    pub async fn release(mut self) -> Result<(), Error> {
        self.state = NamespaceState::Deleting;
        info!(namespace = %self.target.name, "Deleting namespace");

        self.provisioner
            .delete_confirmed(&self.target, self.poll)
            .await?;

        self.state = NamespaceState::Deleted;
        info!(namespace = %self.target.name, "Deleted namespace");
        Ok(())
    }
}

impl Drop for NamespaceLease {
    fn drop(&mut self) {
        if self.state != NamespaceState::Deleted {
            error!(
                namespace = %self.target.name,
                state = ?self.state,
                "Namespace lease dropped without confirmed deletion; resources may be leaked"
            );
        }
    }
}

/// Run `body` inside a freshly created namespace, then tear it down.
///
/// Teardown runs whether `body` succeeds, fails, or panics. A body failure
/// followed by a teardown failure is reported as both.
pub async fn with_namespace<F, Fut, T>(
    provisioner: &Provisioner,
    name: &str,
    config: &ScanConfig,
    body: F,
) -> Result<T, Error>
where
    F: FnOnce(String) -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let lease = NamespaceLease::acquire(provisioner, name, config).await?;

    let outcome = AssertUnwindSafe(body(lease.name().to_string()))
        .catch_unwind()
        .await;
    let released = lease.release().await;

    match outcome {
        Ok(Ok(value)) => released.map(|()| value),
        Ok(Err(e)) => {
            error!(error = %e, "Scan job failed");
            match released {
                Ok(()) => Err(e),
                Err(cleanup) => Err(e.with_cleanup_failure(cleanup)),
            }
        }
        Err(panic) => {
            if let Err(cleanup) = released {
                error!(error = %cleanup, "Teardown after panic failed");
            }
            std::panic::resume_unwind(panic)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kns_common::{ErrorClass, MockSubstrate, ResourceKind};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn config() -> ScanConfig {
        ScanConfig::new()
    }

    fn cooperative_substrate(deletes: Arc<AtomicU32>) -> MockSubstrate {
        let mut mock = MockSubstrate::new();
        mock.expect_create().returning(|o| Ok(o.clone()));
        mock.expect_delete().returning(move |t| {
            assert_eq!(t.kind, ResourceKind::Namespace);
            deletes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        mock.expect_list_named().returning(|_| Ok(vec![]));
        mock
    }

    #[test]
    fn namespace_is_labelled_as_managed() {
        let ns = build_namespace("network-scan-abc");
        let labels = ns.metadata.labels.unwrap();
        assert_eq!(labels[LABEL_MANAGED_BY], LABEL_MANAGED_BY_VALUE);
    }

    #[tokio::test]
    async fn lease_moves_through_all_states() {
        let deletes = Arc::new(AtomicU32::new(0));
        let provisioner = Provisioner::new(Arc::new(cooperative_substrate(deletes.clone())));

        let lease = NamespaceLease::acquire(&provisioner, "network-scan-abc", &config())
            .await
            .unwrap();
        assert_eq!(lease.state(), NamespaceState::Active);
        assert_eq!(lease.name(), "network-scan-abc");

        lease.release().await.unwrap();
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn body_success_still_tears_down() {
        let deletes = Arc::new(AtomicU32::new(0));
        let provisioner = Provisioner::new(Arc::new(cooperative_substrate(deletes.clone())));

        let value = with_namespace(&provisioner, "network-scan-abc", &config(), |ns| async move {
            assert_eq!(ns, "network-scan-abc");
            Ok(7)
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn body_failure_tears_down_and_returns_body_error() {
        let deletes = Arc::new(AtomicU32::new(0));
        let provisioner = Provisioner::new(Arc::new(cooperative_substrate(deletes.clone())));

        let err = with_namespace(&provisioner, "network-scan-abc", &config(), |ns| async move {
            Err::<(), _>(Error::provision(
                "create",
                ResourceRef::namespaced(ResourceKind::DaemonSet, ns, "network-scan"),
                SubstrateError::Unavailable("etcd timeout".into()),
            ))
        })
        .await
        .unwrap_err();

        assert_eq!(err.class(), ErrorClass::Provisioning);
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn body_panic_still_tears_down() {
        let deletes = Arc::new(AtomicU32::new(0));
        let provisioner = Provisioner::new(Arc::new(cooperative_substrate(deletes.clone())));

        let result = AssertUnwindSafe(with_namespace(
            &provisioner,
            "network-scan-abc",
            &config(),
            |_| async move { explode() },
        ))
        .catch_unwind()
        .await;

        assert!(result.is_err());
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
    }

    fn explode() -> Result<(), Error> {
        panic!("payload bug")
    }

    #[tokio::test]
    async fn forbidden_create_needs_no_teardown() {
        let mut mock = MockSubstrate::new();
        mock.expect_create()
            .returning(|_| Err(SubstrateError::Forbidden("namespaces is forbidden".into())));
        mock.expect_delete().times(0);
        let provisioner = Provisioner::new(Arc::new(mock));

        let err = with_namespace(&provisioner, "network-scan-abc", &config(), |_| async {
            Ok(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Provisioning);
    }

    #[tokio::test(start_paused = true)]
    async fn ambiguous_create_is_torn_down() {
        let mut mock = MockSubstrate::new();
        mock.expect_create()
            .returning(|_| Err(SubstrateError::Unavailable("connection reset".into())));
        mock.expect_delete().times(1).returning(|_| Ok(()));
        mock.expect_list_named().returning(|_| Ok(vec![]));
        let provisioner = Provisioner::new(Arc::new(mock));

        let err = NamespaceLease::acquire(&provisioner, "network-scan-abc", &config())
            .await
            .err()
            .unwrap();
        assert_eq!(err.class(), ErrorClass::Provisioning);
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_teardown_after_success_is_cleanup_error() {
        let mut mock = MockSubstrate::new();
        mock.expect_create().returning(|o| Ok(o.clone()));
        mock.expect_delete().returning(|_| Ok(()));
        mock.expect_list_named()
            .returning(|_| Ok(vec![ResourceObject::Namespace(build_namespace("network-scan-abc"))]));
        let provisioner = Provisioner::new(Arc::new(mock));

        let start = tokio::time::Instant::now();
        let err = with_namespace(&provisioner, "network-scan-abc", &config(), |_| async {
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::CleanupTimeout { .. }));
        assert_eq!(start.elapsed(), Duration::from_secs(60));
    }
}
