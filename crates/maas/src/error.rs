//! Error and warning types shared by the reconcilers and resources.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gateway::GatewayError;

/// Errors that abort a resource operation.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// A gateway call failed.
    #[error("{operation} failed: {source}")]
    Gateway {
        operation: String,
        #[source]
        source: GatewayError,
    },

    /// Declared block device does not exist on the machine.
    #[error("block device '{device}' was not found in MAAS machine '{system_id}'")]
    BlockDeviceNotFound { device: String, system_id: String },

    /// Volume group member that was never created.
    #[error("required partition '{partition}' for volume group '{volume_group}' was not found")]
    PartitionNotFound {
        partition: String,
        volume_group: String,
    },

    /// Volume group member that carries a real filesystem.
    #[error("expected lvm partition '{partition}' to be formatted as 'lvm-pv', not '{fstype}'")]
    PartitionNotLvm { partition: String, fstype: String },

    #[error("logical volume '{name}' must have a name that starts with '{volume_group}-'")]
    LogicalVolumeName { name: String, volume_group: String },

    #[error("partition '{partition}' incorrectly defined on device '{device}'")]
    PartitionDeviceMismatch { partition: String, device: String },

    #[error("no subnet with CIDR {0} exists")]
    SubnetNotFound(String),

    #[error("interface '{interface}' was not found on MAAS machine '{system_id}'")]
    InterfaceNotFound { interface: String, system_id: String },

    /// A wait ran out of time while the resource was still pending.
    #[error(
        "timed out after {timeout_secs}s waiting for {resource} to become {awaiting} \
         (last state: {last_state})"
    )]
    WaitTimeout {
        resource: String,
        awaiting: String,
        last_state: String,
        timeout_secs: u64,
    },

    /// A wait observed a state that is neither pending nor target.
    #[error("unexpected state '{state}' for {resource}, wanted {awaiting}")]
    UnexpectedState {
        resource: String,
        state: String,
        awaiting: String,
    },

    /// Declared changes that MAAS cannot apply in place.
    #[error("changing {} requires replacing the resource", .fields.join(", "))]
    RequiresReplacement { fields: Vec<String> },

    /// Invalid declared or provider configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A failed step whose follow-up release failed as well.
    #[error("{source} ({release})")]
    ReleaseFailed {
        #[source]
        source: Box<ProviderError>,
        release: Warning,
    },
}

impl ProviderError {
    /// Wrap a gateway failure with the operation that triggered it.
    pub fn gateway(operation: impl Into<String>, source: GatewayError) -> Self {
        Self::Gateway {
            operation: operation.into(),
            source,
        }
    }

    /// Whether this error came from an exhausted wait.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::WaitTimeout { .. })
    }
}

/// Extension for attaching an operation description to gateway results.
pub(crate) trait GatewayResultExt<T> {
    fn during(self, operation: impl FnOnce() -> String) -> Result<T, ProviderError>;
}

impl<T> GatewayResultExt<T> for Result<T, GatewayError> {
    fn during(self, operation: impl FnOnce() -> String) -> Result<T, ProviderError> {
        self.map_err(|source| ProviderError::gateway(operation(), source))
    }
}

/// A best-effort step that failed without aborting the operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    /// What was attempted, e.g. `add tag`.
    pub operation: String,
    /// What it was attempted on.
    pub target: String,
    pub message: String,
}

impl Warning {
    pub fn new(
        operation: impl Into<String>,
        target: impl Into<String>,
        message: impl fmt::Display,
    ) -> Self {
        Self {
            operation: operation.into(),
            target: target.into(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.operation, self.target, self.message)
    }
}

/// A successful result together with the best-effort failures met on the way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
}

impl<T> Outcome<T> {
    #[must_use]
    pub fn new(value: T, warnings: Vec<Warning>) -> Self {
        Self { value, warnings }
    }

    /// Transform the value and keep the warnings.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        Outcome {
            value: f(self.value),
            warnings: self.warnings,
        }
    }
}
