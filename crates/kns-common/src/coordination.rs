//! Reading the start time off the shared coordination object
//!
//! The coordinator writes the `start-time` label once, before any agent
//! exists. Agents (and the coordinator's own read-back check) parse it with
//! [`read_start_time`].

use k8s_openapi::api::core::v1::Service;
use thiserror::Error;

/// Why a coordination object carries no usable start time
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StartTimeError {
    /// The label is absent
    #[error("label {label} not set on coordination object")]
    Missing {
        /// Label key that was looked up
        label: String,
    },

    /// The label is not a decimal Unix timestamp
    #[error("label {label} value {value:?} is not a unix timestamp: {reason}")]
    Invalid {
        /// Label key that was looked up
        label: String,
        /// Raw label value
        value: String,
        /// Parser message
        reason: String,
    },
}

/// Parse the start time (Unix seconds) from the coordination Service
pub fn read_start_time(service: &Service, label: &str) -> Result<i64, StartTimeError> {
    let value = service
        .metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(label))
        .ok_or_else(|| StartTimeError::Missing {
            label: label.to_string(),
        })?;

    value.parse::<i64>().map_err(|e| StartTimeError::Invalid {
        label: label.to_string(),
        value: value.clone(),
        reason: e.to_string(),
    })
}
