//! kube-network-scan agent
//!
//! Runs on every node. Reads the start time the coordinator published,
//! refuses to proceed when it is outside the skew window, sleeps until it
//! arrives, then runs the scan payload. `/healthz` is served throughout.

#![deny(missing_docs)]

pub mod agent;
pub mod gate;
pub mod health;
pub mod payload;

pub use agent::{Agent, AgentError};
pub use gate::{Clock, GateError, StartGate, SystemClock};
pub use health::{health_routes, serve_health, AgentPhase};
pub use payload::{NoopPayload, PayloadError, ScanContext, ScanPayload};
