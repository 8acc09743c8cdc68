//! kube-network-scan coordinator
//!
//! Provisions an ephemeral scan job: an isolated namespace, the agent RBAC
//! principal, a coordination Service carrying the synchronized start time,
//! and an agent DaemonSet covering every node. Everything is torn down, and
//! the teardown confirmed, before the coordinator exits.

#![deny(missing_docs)]

pub mod coordination;
pub mod job;
pub mod namespace;
pub mod rbac;
pub mod workload;

pub use job::{run_job, JobOutcome};
pub use namespace::{with_namespace, NamespaceLease, NamespaceState};
