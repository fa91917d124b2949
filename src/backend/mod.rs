//! Backend adapters translating lifecycle verbs into native service-manager actions.
//!
//! Every backend is a flat implementation of [`Backend`]. Operations a backend does
//! not offer fall through to the provided methods, which fail with
//! [`ControlError::CapabilityUnsupported`].
use std::{fmt, sync::Mutex};

use serde::Deserialize;
use strum_macros::{AsRefStr, EnumIter, EnumString};

use crate::{
    capability::{Capability, SupportFlags},
    config::ControlConfig,
    constants::MAX_SERVICE_NAME_LEN,
    error::ControlError,
    state::ServiceState,
};

pub mod standard;
pub mod systemd;

pub use standard::StandardBackend;
pub use systemd::SystemdBackend;

/// Service-management facilities with a compiled-in adapter.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Deserialize,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum BackendKind {
    /// Processes launched and signalled directly, state kept in status records.
    #[default]
    Standard,
    /// Units managed through `systemctl`.
    Systemd,
}

impl BackendKind {
    /// Resolves a backend name, failing for kinds that are not compiled in.
    pub fn parse(raw: &str) -> Result<Self, ControlError> {
        raw.trim()
            .parse()
            .map_err(|_| ControlError::UnknownBackend(raw.to_string()))
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Which service a controller targets and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    name: String,
    backend: BackendKind,
    blocking: bool,
}

impl ServiceIdentity {
    /// Creates a non-blocking identity after validating the name.
    pub fn new(name: impl Into<String>, backend: BackendKind) -> Result<Self, ControlError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            backend,
            blocking: false,
        })
    }

    /// Returns a copy that requests blocking control calls.
    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    pub fn is_blocking(&self) -> bool {
        self.blocking
    }
}

/// Checks that `name` can address a service and derive file and socket names.
pub fn validate_name(name: &str) -> Result<(), ControlError> {
    let invalid = |reason| ControlError::InvalidIdentity {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_SERVICE_NAME_LEN {
        return Err(invalid("name is longer than 64 bytes"));
    }
    if name.starts_with('.') {
        return Err(invalid("name starts with a dot"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'))
    {
        return Err(invalid("allowed characters are A-Z a-z 0-9 - _ . @"));
    }
    Ok(())
}

/// Keeps the text of the most recent failure.
#[derive(Debug, Default)]
pub struct ErrorSlot(Mutex<Option<String>>);

impl ErrorSlot {
    /// Stores the error text of a failed `result` or clears the slot on success.
    pub fn record<T>(&self, result: Result<T, ControlError>) -> Result<T, ControlError> {
        match &result {
            Ok(_) => self.clear(),
            Err(err) => self.set(err.to_string()),
        }
        result
    }

    pub fn set(&self, message: impl Into<String>) {
        *self.slot() = Some(message.into());
    }

    pub fn clear(&self) {
        *self.slot() = None;
    }

    pub fn get(&self) -> Option<String> {
        self.slot().clone()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<String>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Adapter over one native service-management facility.
///
/// Failures are values: implementations record the text of every error in their
/// [`ErrorSlot`] and return it; nothing panics across this boundary.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Capabilities implemented by this backend. Fixed for its lifetime.
    fn support_flags(&self) -> SupportFlags;

    /// Slot receiving the text of native failures.
    fn error_slot(&self) -> &ErrorSlot;

    /// Whether the native manager knows the service. Fails closed.
    fn exists(&self, identity: &ServiceIdentity) -> bool;

    fn status(&self, identity: &ServiceIdentity) -> Result<ServiceState, ControlError> {
        let _ = identity;
        unsupported(self.error_slot(), self.kind(), Capability::Status)
    }

    /// Issues a native start. With `blocking` the call returns once the service runs.
    fn start(&self, identity: &ServiceIdentity, blocking: bool) -> Result<(), ControlError> {
        let _ = (identity, blocking);
        unsupported(self.error_slot(), self.kind(), Capability::Start)
    }

    fn stop(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        let _ = identity;
        unsupported(self.error_slot(), self.kind(), Capability::Stop)
    }

    fn pause(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        let _ = identity;
        unsupported(self.error_slot(), self.kind(), Capability::Pause)
    }

    fn resume(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        let _ = identity;
        unsupported(self.error_slot(), self.kind(), Capability::Resume)
    }

    fn reload(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        let _ = identity;
        unsupported(self.error_slot(), self.kind(), Capability::Reload)
    }

    fn is_autostart_enabled(&self, identity: &ServiceIdentity) -> Result<bool, ControlError> {
        let _ = identity;
        unsupported(self.error_slot(), self.kind(), Capability::SetAutostart)
    }

    fn enable_autostart(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        let _ = identity;
        unsupported(self.error_slot(), self.kind(), Capability::SetAutostart)
    }

    fn disable_autostart(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        let _ = identity;
        unsupported(self.error_slot(), self.kind(), Capability::SetAutostart)
    }

    /// Backend specific escape hatch.
    fn custom_command(&self, identity: &ServiceIdentity, token: &str) -> Result<(), ControlError> {
        let _ = (identity, token);
        unsupported(self.error_slot(), self.kind(), Capability::CustomCommands)
    }

    /// Text of the last native failure, cleared by the next success.
    fn last_error(&self) -> Option<String> {
        self.error_slot().get()
    }
}

/// Records and returns a capability error for `capability`.
pub fn unsupported<T>(
    slot: &ErrorSlot,
    backend: BackendKind,
    capability: Capability,
) -> Result<T, ControlError> {
    slot.record(Err(ControlError::CapabilityUnsupported {
        operation: capability,
        backend,
    }))
}

/// Builds the adapter for `kind`.
pub fn create_backend(kind: BackendKind, config: &ControlConfig) -> Box<dyn Backend> {
    match kind {
        BackendKind::Standard => {
            Box::new(StandardBackend::new(config.start_wait(), config.stop_wait()))
        }
        BackendKind::Systemd => Box::new(SystemdBackend::new(config.systemd.user)),
    }
}
