//! Error handling for svcctl.
use std::{io, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::{backend::BackendKind, capability::Capability, state::ServiceState};

/// Failures surfaced by backends and the service controller.
///
/// Every variant renders a human readable message; the controller keeps the text of
/// the last one so callers can retrieve it through `ServiceController::error`.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The backend never offers this operation.
    #[error("{operation} is not supported by the {backend} backend")]
    CapabilityUnsupported {
        /// The capability the operation requires.
        operation: Capability,
        /// Backend that lacks it.
        backend: BackendKind,
    },

    /// The native manager rejected or failed a supported operation, including
    /// transitions refused because of the current service state.
    #[error("{operation} failed: {message}")]
    NativeOperationFailed {
        /// Operation name.
        operation: &'static str,
        /// Native error text, verbatim.
        message: String,
    },

    /// The native manager does not know the service.
    #[error("service '{service}' is not registered with the {backend} backend")]
    IdentityNotFound {
        /// Service name.
        service: String,
        /// Backend that was queried.
        backend: BackendKind,
    },

    /// A bounded wait elapsed before the service settled.
    #[error("timed out after {waited:?} waiting for service '{service}' to become {expected}")]
    Timeout {
        /// Service name.
        service: String,
        /// State that was awaited.
        expected: ServiceState,
        /// Time spent waiting.
        waited: Duration,
    },

    /// No backend is compiled in for this kind.
    #[error("unknown backend '{0}'")]
    UnknownBackend(String),

    /// The service name cannot be used to address a service.
    #[error("invalid service name '{name}': {reason}")]
    InvalidIdentity {
        /// Rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Configuration or registration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The status store could not be read or written.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Local I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ControlError {
    /// Shorthand for a native failure.
    pub fn native(operation: &'static str, message: impl Into<String>) -> Self {
        ControlError::NativeOperationFailed {
            operation,
            message: message.into(),
        }
    }

    /// Whether the error comes from the capability guard rather than the native layer.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, ControlError::CapabilityUnsupported { .. })
    }
}

/// Error type for configuration and registration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Error reading a configuration file.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// File that could not be read.
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Error writing a configuration file.
    #[error("Failed to write config file {path}: {source}")]
    Write {
        /// File that could not be written.
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Error parsing YAML configuration.
    #[error("Invalid YAML format in {path}: {source}")]
    Parse {
        /// File that failed to parse.
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A `${VAR}` reference names an unset variable.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    /// A duration string could not be parsed.
    #[error("Invalid duration '{0}'")]
    InvalidDuration(String),
}

/// Error type for status record operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Error reading or writing the record.
    #[error("Failed to access status record: {0}")]
    Io(#[from] io::Error),

    /// Error parsing the JSON contents of the record.
    #[error("Failed to parse status record: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors raised on the notification channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// No token arrived before the deadline.
    #[error("timed out after {0:?} waiting for a lifecycle event")]
    Timeout(Duration),

    /// The service closed the channel.
    #[error("notification channel closed by the service")]
    Disconnected,

    /// A line did not hold a known token.
    #[error("unrecognised lifecycle token {0:?}")]
    UnknownToken(String),

    /// The channel socket could not be reached before the deadline.
    #[error("notification channel for '{0}' is not available")]
    NotAvailable(String),

    /// Socket I/O failed.
    #[error("notification channel I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised by the in-process lifecycle state machine.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The requested operation is not legal from the current state.
    #[error("cannot {operation} a service that is {state}")]
    InvalidTransition {
        /// Requested operation.
        operation: &'static str,
        /// State the service was in.
        state: ServiceState,
    },

    /// The service handler reported a failure.
    #[error("{operation} handler failed: {message}")]
    Handler {
        /// Operation whose handler failed.
        operation: &'static str,
        /// Handler message.
        message: String,
    },
}

/// Errors raised by the service-side runtime.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Control(#[from] ControlError),
    #[error("signal handling failed: {0}")]
    Signal(#[from] nix::errno::Errno),
    #[error(transparent)]
    Io(#[from] io::Error),
}
