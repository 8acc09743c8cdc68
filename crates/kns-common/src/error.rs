//! Error types for the scan job
//!
//! Raw substrate failures are [`SubstrateError`]s. Everything the coordinator
//! reports is an [`Error`], which always names the resource involved and maps
//! to one of three [`ErrorClass`]es with its own exit code.

use std::time::Duration;

use thiserror::Error;

use crate::resource::ResourceRef;

/// Failure of a single substrate call
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SubstrateError {
    /// An object with the same name already exists
    #[error("already exists")]
    AlreadyExists,

    /// The object does not exist
    #[error("not found")]
    NotFound,

    /// The caller lacks permission
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// API server unreachable or any other failure
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<kube::Error> for SubstrateError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ae) if ae.code == 409 => SubstrateError::AlreadyExists,
            kube::Error::Api(ae) if ae.code == 404 => SubstrateError::NotFound,
            kube::Error::Api(ae) if ae.code == 403 => SubstrateError::Forbidden(ae.message),
            other => SubstrateError::Unavailable(other.to_string()),
        }
    }
}

/// Coarse category that decides how a failure is reported
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Deployment misconfiguration detected before any state was created
    Configuration,
    /// Setup failed; whatever was created has been torn down
    Provisioning,
    /// Teardown could not be confirmed; cluster resources may have leaked
    Cleanup,
}

impl ErrorClass {
    /// Process exit code for this class
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorClass::Configuration => 2,
            ErrorClass::Provisioning => 3,
            ErrorClass::Cleanup => 4,
        }
    }
}

/// Main error type for scan job operations
#[derive(Debug, Error)]
pub enum Error {
    /// Missing identity input or malformed own pod spec
    #[error("configuration error: {message}")]
    Config {
        /// Description of what is misconfigured
        message: String,
    },

    /// A substrate call failed while provisioning or reading
    #[error("failed to {action} {resource}: {source}")]
    Provision {
        /// Operation being performed (create, get, ...)
        action: &'static str,
        /// Resource involved
        resource: ResourceRef,
        /// Underlying substrate failure
        source: SubstrateError,
    },

    /// A deterministically-named object exists with a different spec
    #[error("{resource} already exists with a different spec")]
    SpecMismatch {
        /// Resource involved
        resource: ResourceRef,
    },

    /// An ordering precondition did not hold
    #[error("precondition failed for {resource}: {message}")]
    Precondition {
        /// Resource involved
        resource: ResourceRef,
        /// What was expected
        message: String,
    },

    /// The deletion request itself failed
    #[error("failed to delete {resource}: {source}")]
    Cleanup {
        /// Resource involved
        resource: ResourceRef,
        /// Underlying substrate failure
        source: SubstrateError,
    },

    /// Deletion was requested but never confirmed
    #[error("deletion of {resource} not confirmed after {waited:?}{}", last_error_note(.last_error))]
    CleanupTimeout {
        /// Resource involved
        resource: ResourceRef,
        /// Time spent polling
        waited: Duration,
        /// Last error seen while polling, if any
        last_error: Option<String>,
    },

    /// Setup failed and the subsequent teardown failed too
    #[error("{primary}; teardown also failed: {cleanup}")]
    SetupAndCleanup {
        /// The failure that triggered teardown
        primary: Box<Error>,
        /// The teardown failure
        cleanup: Box<Error>,
    },
}

fn last_error_note(last_error: &Option<String>) -> String {
    last_error
        .as_ref()
        .map(|e| format!(" (last error: {e})"))
        .unwrap_or_default()
}

impl Error {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a provisioning error for a resource
    pub fn provision(action: &'static str, resource: ResourceRef, source: SubstrateError) -> Self {
        Self::Provision {
            action,
            resource,
            source,
        }
    }

    /// Create a precondition error for a resource
    pub fn precondition(resource: ResourceRef, msg: impl Into<String>) -> Self {
        Self::Precondition {
            resource,
            message: msg.into(),
        }
    }

    /// Combine a setup failure with a teardown failure
    pub fn with_cleanup_failure(self, cleanup: Error) -> Self {
        Self::SetupAndCleanup {
            primary: Box::new(self),
            cleanup: Box::new(cleanup),
        }
    }

    /// Classify this error for reporting
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Config { .. } => ErrorClass::Configuration,
            Error::Provision { .. } | Error::SpecMismatch { .. } | Error::Precondition { .. } => {
                ErrorClass::Provisioning
            }
            Error::Cleanup { .. } | Error::CleanupTimeout { .. } => ErrorClass::Cleanup,
            Error::SetupAndCleanup { cleanup, .. } => cleanup.class(),
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        self.class().exit_code()
    }

    /// The resource this error is about, if any
    pub fn resource(&self) -> Option<&ResourceRef> {
        match self {
            Error::Config { .. } => None,
            Error::Provision { resource, .. }
            | Error::SpecMismatch { resource }
            | Error::Precondition { resource, .. }
            | Error::Cleanup { resource, .. }
            | Error::CleanupTimeout { resource, .. } => Some(resource),
            Error::SetupAndCleanup { primary, .. } => primary.resource(),
        }
    }
}
