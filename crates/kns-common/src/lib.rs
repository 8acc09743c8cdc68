//! Common types for kube-network-scan: configuration, errors, and the
//! Kubernetes plumbing shared by the coordinator (`kns-job`) and the
//! per-node agent (`kns-pod`).

#![deny(missing_docs)]

pub mod config;
pub mod coordination;
pub mod error;
pub mod identity;
pub mod poll;
pub mod provisioner;
pub mod resource;
pub mod shutdown;
pub mod substrate;
pub mod telemetry;

pub use config::ScanConfig;
pub use error::{Error, ErrorClass, SubstrateError};
pub use provisioner::Provisioner;
pub use resource::{ResourceKind, ResourceObject, ResourceRef};
pub use substrate::{KubeSubstrate, Substrate};

#[cfg(any(test, feature = "mock"))]
pub use identity::MockEnvSource;
#[cfg(any(test, feature = "mock"))]
pub use substrate::MockSubstrate;

/// Label key identifying objects created by the scan job
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`] on every object the scan job creates
pub const LABEL_MANAGED_BY_VALUE: &str = "kube-network-scan";

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
