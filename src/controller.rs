//! Service controller: the entry point callers use to drive one service.
//!
//! The controller owns a single backend, checks capabilities before every call and
//! keeps the text of the last failure. It never checks whether a transition is
//! legal from the current state; the native manager decides that.
use std::fmt;

use tracing::{debug, info, warn};

use crate::{
    backend::{Backend, BackendKind, ErrorSlot, ServiceIdentity, create_backend},
    capability::{Capability, SupportFlags},
    config::ControlConfig,
    error::ControlError,
    state::ServiceState,
    wait::{WaitPolicy, poll_until},
};

/// Controls one service through the backend selected at construction.
pub struct ServiceController {
    identity: ServiceIdentity,
    backend: Box<dyn Backend>,
    flags: SupportFlags,
    last_error: ErrorSlot,
    wait: WaitPolicy,
}

impl ServiceController {
    /// Controller for `identity` using the backend named by the identity.
    pub fn new(identity: ServiceIdentity, config: &ControlConfig) -> Self {
        let backend = create_backend(identity.backend(), config);
        Self::with_backend(identity, backend).with_wait_policy(config.start_wait())
    }

    /// Resolves `backend` by name and builds a controller for `name`.
    ///
    /// Fails for unknown backends and unusable names.
    pub fn create(
        name: &str,
        backend: &str,
        blocking: bool,
        config: &ControlConfig,
    ) -> Result<Self, ControlError> {
        let kind = BackendKind::parse(backend)?;
        let identity = ServiceIdentity::new(name, kind)?.with_blocking(blocking);
        Ok(Self::new(identity, config))
    }

    /// Controller over an already constructed backend.
    ///
    /// Blocking mode is dropped from the identity when the backend cannot honour it.
    pub fn with_backend(identity: ServiceIdentity, backend: Box<dyn Backend>) -> Self {
        let flags = backend.support_flags();
        let identity = if identity.is_blocking() && !flags.supports(Capability::Blocking) {
            warn!(
                "The {} backend does not support blocking mode; '{}' will be controlled without it",
                backend.kind(),
                identity.name()
            );
            identity.with_blocking(false)
        } else {
            identity
        };

        debug!(
            "Controller for '{}' on the {} backend supports {flags}",
            identity.name(),
            backend.kind()
        );

        Self {
            identity,
            backend,
            flags,
            last_error: ErrorSlot::default(),
            wait: WaitPolicy::default(),
        }
    }

    /// Default policy for [`ServiceController::wait_until`].
    pub fn with_wait_policy(mut self, wait: WaitPolicy) -> Self {
        self.wait = wait;
        self
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    pub fn is_blocking(&self) -> bool {
        self.identity.is_blocking()
    }

    /// Capabilities of the backend, read once at construction.
    pub fn support_flags(&self) -> SupportFlags {
        self.flags
    }

    /// Text of the last failure, empty after a successful call.
    pub fn error(&self) -> String {
        self.last_error.get().unwrap_or_default()
    }

    /// Whether the native manager knows the service. Fails closed.
    pub fn exists(&self) -> bool {
        let found = self.backend.exists(&self.identity);
        if found {
            self.last_error.clear();
        } else {
            let message = self.backend.last_error().unwrap_or_else(|| {
                format!(
                    "service '{}' is not registered with the {} backend",
                    self.identity.name(),
                    self.backend.kind()
                )
            });
            self.last_error.set(message);
        }
        found
    }

    pub fn status(&self) -> Result<ServiceState, ControlError> {
        self.call(Capability::Status, |backend, identity| backend.status(identity))
    }

    /// Starts the service. In blocking mode the call returns once it runs.
    pub fn start(&self) -> Result<(), ControlError> {
        let blocking = self.is_blocking();
        info!(
            "Starting '{}'{}",
            self.identity.name(),
            if blocking { " (blocking)" } else { "" }
        );
        self.call(Capability::Start, |backend, identity| {
            backend.start(identity, blocking)
        })
    }

    pub fn stop(&self) -> Result<(), ControlError> {
        info!("Stopping '{}'", self.identity.name());
        self.call(Capability::Stop, |backend, identity| backend.stop(identity))
    }

    pub fn pause(&self) -> Result<(), ControlError> {
        info!("Pausing '{}'", self.identity.name());
        self.call(Capability::Pause, |backend, identity| backend.pause(identity))
    }

    pub fn resume(&self) -> Result<(), ControlError> {
        info!("Resuming '{}'", self.identity.name());
        self.call(Capability::Resume, |backend, identity| backend.resume(identity))
    }

    pub fn reload(&self) -> Result<(), ControlError> {
        info!("Reloading '{}'", self.identity.name());
        self.call(Capability::Reload, |backend, identity| backend.reload(identity))
    }

    pub fn is_autostart_enabled(&self) -> Result<bool, ControlError> {
        self.call(Capability::SetAutostart, |backend, identity| {
            backend.is_autostart_enabled(identity)
        })
    }

    pub fn enable_autostart(&self) -> Result<(), ControlError> {
        self.call(Capability::SetAutostart, |backend, identity| {
            backend.enable_autostart(identity)
        })
    }

    pub fn disable_autostart(&self) -> Result<(), ControlError> {
        self.call(Capability::SetAutostart, |backend, identity| {
            backend.disable_autostart(identity)
        })
    }

    /// Sends a backend specific command.
    pub fn custom_command(&self, token: &str) -> Result<(), ControlError> {
        self.call(Capability::CustomCommands, |backend, identity| {
            backend.custom_command(identity, token)
        })
    }

    /// Polls [`ServiceController::status`] until it reports `target`.
    ///
    /// Status errors end the wait early. Abandoning the wait leaves any native
    /// operation in flight untouched.
    pub fn wait_for_state(
        &self,
        target: ServiceState,
        policy: WaitPolicy,
    ) -> Result<(), ControlError> {
        let result = poll_until(
            policy,
            || {
                let state = self.status()?;
                Ok((state == target).then_some(()))
            },
            |waited| ControlError::Timeout {
                service: self.identity.name().to_string(),
                expected: target,
                waited,
            },
        );
        self.settle(result)
    }

    /// [`ServiceController::wait_for_state`] with the controller's default policy.
    pub fn wait_until(&self, target: ServiceState) -> Result<(), ControlError> {
        self.wait_for_state(target, self.wait)
    }

    /// Runs `operation` when `capability` is supported, recording the outcome.
    fn call<T>(
        &self,
        capability: Capability,
        operation: impl FnOnce(&dyn Backend, &ServiceIdentity) -> Result<T, ControlError>,
    ) -> Result<T, ControlError> {
        if !self.flags.supports(capability) {
            debug!(
                "Skipping {capability} for '{}': not offered by the {} backend",
                self.identity.name(),
                self.backend.kind()
            );
            return self.settle(Err(ControlError::CapabilityUnsupported {
                operation: capability,
                backend: self.backend.kind(),
            }));
        }
        self.settle(operation(self.backend.as_ref(), &self.identity))
    }

    fn settle<T>(&self, result: Result<T, ControlError>) -> Result<T, ControlError> {
        if let Err(err) = &result {
            warn!("{}: {err}", self.identity.name());
        }
        self.last_error.record(result)
    }
}

impl fmt::Debug for ServiceController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceController")
            .field("identity", &self.identity)
            .field("backend", &self.backend.kind())
            .field("flags", &self.flags)
            .finish()
    }
}
