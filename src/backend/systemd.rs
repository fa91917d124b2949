//! Backend driving units through `systemctl`.
use std::{
    collections::HashMap,
    path::PathBuf,
    process::{Command, Output},
};

use tracing::debug;

use super::{Backend, BackendKind, ErrorSlot, ServiceIdentity, standard::parse_signal};
use crate::{
    capability::{Capability, SupportFlags},
    error::ControlError,
    state::ServiceState,
};

/// systemd has no native notion of a paused unit, so pause and resume are absent.
const SYSTEMD_FLAGS: SupportFlags = SupportFlags::from_capabilities(&[
    Capability::Status,
    Capability::Start,
    Capability::Stop,
    Capability::Reload,
    Capability::CustomCommands,
    Capability::SetAutostart,
    Capability::Blocking,
]);

/// Unit suffixes systemctl accepts without appending `.service`.
const UNIT_SUFFIXES: &[&str] = &[
    ".service", ".socket", ".target", ".timer", ".path", ".mount", ".scope",
];

/// Backend for the system or per-user systemd instance.
#[derive(Debug)]
pub struct SystemdBackend {
    program: PathBuf,
    user: bool,
    errors: ErrorSlot,
}

impl SystemdBackend {
    /// Creates a backend talking to the system manager, or the user manager with `user`.
    pub fn new(user: bool) -> Self {
        Self {
            program: PathBuf::from("systemctl"),
            user,
            errors: ErrorSlot::default(),
        }
    }

    /// Uses `program` in place of `systemctl`.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn run(&self, operation: &'static str, args: &[&str]) -> Result<Output, ControlError> {
        let mut command = Command::new(&self.program);
        if self.user {
            command.arg("--user");
        }
        command.args(args);
        debug!("Running {} {:?}", self.program.display(), args);

        command.output().map_err(|err| {
            ControlError::native(
                operation,
                format!("failed to run {}: {err}", self.program.display()),
            )
        })
    }

    /// Runs systemctl and turns a non-zero exit into a native error carrying stderr.
    fn run_checked(&self, operation: &'static str, args: &[&str]) -> Result<String, ControlError> {
        let output = self.run(operation, args)?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("systemctl exited with {}", output.status)
        } else {
            stderr
        };
        Err(ControlError::native(operation, message))
    }

    /// Runs a lifecycle verb, adding `--no-block` unless the caller waits.
    fn control(
        &self,
        operation: &'static str,
        verb: &str,
        identity: &ServiceIdentity,
        blocking: bool,
    ) -> Result<(), ControlError> {
        let unit = unit_name(identity.name());
        let mut args = vec![verb];
        if !blocking {
            args.push("--no-block");
        }
        args.push(&unit);
        self.run_checked(operation, &args).map(|_| ())
    }

    fn unit_state(&self, identity: &ServiceIdentity) -> Result<ServiceState, ControlError> {
        let unit = unit_name(identity.name());
        let output = self.run_checked(
            "status",
            &["show", "--property=LoadState,ActiveState,SubState", &unit],
        )?;
        let properties = parse_properties(&output);

        if properties.get("LoadState").copied() == Some("not-found") {
            return Err(ControlError::IdentityNotFound {
                service: identity.name().to_string(),
                backend: BackendKind::Systemd,
            });
        }

        Ok(map_active_state(
            properties.get("ActiveState").copied().unwrap_or_default(),
        ))
    }

    fn autostart_state(&self, identity: &ServiceIdentity) -> Result<bool, ControlError> {
        let unit = unit_name(identity.name());
        let output = self.run("is autostart enabled", &["is-enabled", &unit])?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let state = stdout.trim();

        // is-enabled exits non-zero for disabled units, with the state on stdout.
        if state.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ControlError::native("is autostart enabled", stderr));
        }
        Ok(matches!(state, "enabled" | "enabled-runtime"))
    }
}

impl Backend for SystemdBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Systemd
    }

    fn support_flags(&self) -> SupportFlags {
        SYSTEMD_FLAGS
    }

    fn error_slot(&self) -> &ErrorSlot {
        &self.errors
    }

    fn exists(&self, identity: &ServiceIdentity) -> bool {
        self.errors.record(self.unit_state(identity)).is_ok()
    }

    fn status(&self, identity: &ServiceIdentity) -> Result<ServiceState, ControlError> {
        self.errors.record(self.unit_state(identity))
    }

    fn start(&self, identity: &ServiceIdentity, blocking: bool) -> Result<(), ControlError> {
        self.errors
            .record(self.control("start", "start", identity, blocking))
    }

    fn stop(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        self.errors
            .record(self.control("stop", "stop", identity, identity.is_blocking()))
    }

    fn reload(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        self.errors
            .record(self.control("reload", "reload", identity, identity.is_blocking()))
    }

    fn is_autostart_enabled(&self, identity: &ServiceIdentity) -> Result<bool, ControlError> {
        self.errors.record(self.autostart_state(identity))
    }

    fn enable_autostart(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        let unit = unit_name(identity.name());
        let result = self
            .run_checked("enable autostart", &["enable", &unit])
            .map(|_| ());
        self.errors.record(result)
    }

    fn disable_autostart(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        let unit = unit_name(identity.name());
        let result = self
            .run_checked("disable autostart", &["disable", &unit])
            .map(|_| ());
        self.errors.record(result)
    }

    fn custom_command(&self, identity: &ServiceIdentity, token: &str) -> Result<(), ControlError> {
        let result = parse_signal(token).and_then(|signal| {
            let unit = unit_name(identity.name());
            let flag = format!("--signal={signal}");
            self.run_checked("custom command", &["kill", &flag, &unit])
                .map(|_| ())
        });
        self.errors.record(result)
    }
}

/// Appends `.service` unless `name` already carries a unit suffix.
pub fn unit_name(name: &str) -> String {
    if UNIT_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
        name.to_string()
    } else {
        format!("{name}.service")
    }
}

/// Parses `Key=Value` lines printed by `systemctl show`.
pub fn parse_properties(output: &str) -> HashMap<&str, &str> {
    output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .collect()
}

/// Maps a unit's `ActiveState` onto the lifecycle states.
pub fn map_active_state(active: &str) -> ServiceState {
    match active {
        "active" | "reloading" | "refreshing" => ServiceState::Running,
        "activating" => ServiceState::Starting,
        "deactivating" => ServiceState::Stopping,
        _ => ServiceState::Stopped,
    }
}
