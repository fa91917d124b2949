//! Reference backend: launches the registered command itself and drives it with
//! POSIX signals. The service reports its own state into a [`StatusStore`], which
//! plays the role of the native manager's status database.
use std::{
    fs::{self, OpenOptions},
    io::ErrorKind,
    os::unix::process::CommandExt,
    path::PathBuf,
    process::{Command, Stdio},
    str::FromStr,
    thread,
};

use nix::{
    sys::signal::{self, Signal},
    unistd::Pid,
};
use sysinfo::{ProcessStatus, ProcessesToUpdate, System};
use tracing::{debug, info, warn};

use super::{Backend, BackendKind, ErrorSlot, ServiceIdentity};
use crate::{
    capability::SupportFlags,
    config::ServiceDefinition,
    constants::{AUTOSTART_DIR_NAME, CONFIG_DIR_ENV, SERVICE_NAME_ENV, STATE_DIR_ENV},
    error::ControlError,
    runtime,
    state::ServiceState,
    store::{StatusRecord, StatusStore},
    wait::{WaitPolicy, poll_until},
};

/// Backend that manages the service process directly.
#[derive(Debug)]
pub struct StandardBackend {
    start_wait: WaitPolicy,
    stop_wait: WaitPolicy,
    errors: ErrorSlot,
}

impl StandardBackend {
    pub fn new(start_wait: WaitPolicy, stop_wait: WaitPolicy) -> Self {
        Self {
            start_wait,
            stop_wait,
            errors: ErrorSlot::default(),
        }
    }

    /// Names of the services whose autostart marker is set, sorted.
    pub fn autostart_services() -> Result<Vec<String>, ControlError> {
        let dir = autostart_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();
        names.sort();
        Ok(names)
    }

    fn definition(&self, identity: &ServiceIdentity) -> Result<ServiceDefinition, ControlError> {
        ServiceDefinition::load(identity.name())?.ok_or_else(|| ControlError::IdentityNotFound {
            service: identity.name().to_string(),
            backend: BackendKind::Standard,
        })
    }

    /// Status record of a live service process, `None` when nothing runs.
    fn live_record(&self, identity: &ServiceIdentity) -> Result<Option<StatusRecord>, ControlError> {
        let record = StatusStore::new(identity.name()).load()?;
        Ok(record.filter(|record| record.state.is_active() && process_alive(record.pid)))
    }

    /// Live record in one of `allowed` states, or a native state-conflict error.
    fn record_in(
        &self,
        identity: &ServiceIdentity,
        operation: &'static str,
        allowed: &[ServiceState],
    ) -> Result<StatusRecord, ControlError> {
        self.definition(identity)?;
        let state = self.live_record(identity)?;
        match state {
            Some(record) if allowed.contains(&record.state) => Ok(record),
            Some(record) => Err(ControlError::native(
                operation,
                format!(
                    "cannot {operation} service '{}' while it is {}",
                    identity.name(),
                    record.state
                ),
            )),
            None => Err(ControlError::native(
                operation,
                format!("service '{}' is not running", identity.name()),
            )),
        }
    }

    fn launch(&self, identity: &ServiceIdentity) -> Result<u32, ControlError> {
        let definition = self.definition(identity)?;
        if let Some(record) = self.live_record(identity)? {
            return Err(ControlError::native(
                "start",
                format!(
                    "service '{}' is already {} (pid {})",
                    identity.name(),
                    record.state,
                    record.pid
                ),
            ));
        }

        let log_path = log_path(identity.name());
        if let Some(parent) = log_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let log = OpenOptions::new().create(true).append(true).open(&log_path)?;

        let mut command = Command::new(&definition.command);
        command
            .args(&definition.args)
            .envs(&definition.env)
            .env(SERVICE_NAME_ENV, identity.name())
            .env(STATE_DIR_ENV, runtime::state_dir())
            .env(CONFIG_DIR_ENV, runtime::config_dir())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log));
        if let Some(dir) = &definition.working_dir {
            command.current_dir(dir);
        }

        unsafe {
            command.pre_exec(|| {
                // Own session, so the service outlives the controller's terminal.
                if libc::setsid() < 0 {
                    return Err(std::io::Error::last_os_error());
                }
                // Services dispatch signals with sigwait; start them from a clean mask.
                let mut empty: libc::sigset_t = std::mem::zeroed();
                libc::sigemptyset(&mut empty);
                libc::sigprocmask(libc::SIG_SETMASK, &empty, std::ptr::null_mut());
                Ok(())
            });
        }

        debug!(
            "Launching '{}': {} {:?}",
            identity.name(),
            definition.command,
            definition.args
        );
        let mut child = command.spawn().map_err(|err| {
            ControlError::native(
                "start",
                format!("failed to launch '{}': {err}", definition.command),
            )
        })?;
        let pid = child.id();

        if let Err(err) = StatusStore::new(identity.name()).record_launch(pid) {
            warn!("Failed to record launch of '{}': {err}", identity.name());
        }

        // Reap the child once it exits so it does not linger as a zombie.
        let name = identity.name().to_string();
        thread::spawn(move || match child.wait() {
            Ok(status) => debug!("Service '{name}' (pid {pid}) exited with {status}"),
            Err(err) => warn!("Failed to reap service '{name}' (pid {pid}): {err}"),
        });

        info!("Launched service '{}' with pid {pid}", identity.name());
        Ok(pid)
    }

    /// Polls the status record until the service settles in `target`.
    fn wait_for(
        &self,
        identity: &ServiceIdentity,
        operation: &'static str,
        target: ServiceState,
        pid: u32,
        policy: WaitPolicy,
    ) -> Result<(), ControlError> {
        poll_until(
            policy,
            || match self.live_record(identity)? {
                Some(record) if record.state == target => Ok(Some(())),
                Some(_) => Ok(None),
                None if target == ServiceState::Stopped => Ok(Some(())),
                None if process_alive(pid) => Ok(None),
                None => Err(ControlError::native(
                    operation,
                    format!(
                        "service '{}' exited, see {}",
                        identity.name(),
                        log_path(identity.name()).display()
                    ),
                )),
            },
            |waited| ControlError::Timeout {
                service: identity.name().to_string(),
                expected: target,
                waited,
            },
        )
    }

    fn start_inner(&self, identity: &ServiceIdentity, blocking: bool) -> Result<(), ControlError> {
        let pid = self.launch(identity)?;
        if blocking {
            self.wait_for(identity, "start", ServiceState::Running, pid, self.start_wait)?;
        }
        Ok(())
    }

    fn stop_inner(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        let record = self.record_in(
            identity,
            "stop",
            &[
                ServiceState::Starting,
                ServiceState::Running,
                ServiceState::Pausing,
                ServiceState::Paused,
                ServiceState::Resuming,
                ServiceState::Stopping,
            ],
        )?;
        send_signal("stop", record.pid, Signal::SIGTERM)?;
        if identity.is_blocking() {
            self.wait_for(identity, "stop", ServiceState::Stopped, record.pid, self.stop_wait)?;
        }
        Ok(())
    }

    fn pause_inner(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        let record = self.record_in(identity, "pause", &[ServiceState::Running])?;
        send_signal("pause", record.pid, Signal::SIGTSTP)?;
        if identity.is_blocking() {
            self.wait_for(identity, "pause", ServiceState::Paused, record.pid, self.stop_wait)?;
        }
        Ok(())
    }

    fn resume_inner(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        let record = self.record_in(identity, "resume", &[ServiceState::Paused])?;
        send_signal("resume", record.pid, Signal::SIGCONT)?;
        if identity.is_blocking() {
            self.wait_for(identity, "resume", ServiceState::Running, record.pid, self.stop_wait)?;
        }
        Ok(())
    }

    fn reload_inner(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        let record = self.record_in(identity, "reload", &[ServiceState::Running])?;
        send_signal("reload", record.pid, Signal::SIGHUP)
    }

    fn custom_inner(&self, identity: &ServiceIdentity, token: &str) -> Result<(), ControlError> {
        let signal = parse_signal(token)?;
        let record = self.record_in(
            identity,
            "custom command",
            &[ServiceState::Running, ServiceState::Paused],
        )?;
        send_signal("custom command", record.pid, signal)
    }

    fn enable_autostart_inner(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        self.definition(identity)?;
        let marker = autostart_marker(identity.name());
        if let Some(parent) = marker.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&marker, identity.name())?;
        Ok(())
    }

    fn disable_autostart_inner(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        self.definition(identity)?;
        match fs::remove_file(autostart_marker(identity.name())) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

impl Default for StandardBackend {
    fn default() -> Self {
        Self::new(WaitPolicy::default(), WaitPolicy::default())
    }
}

impl Backend for StandardBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Standard
    }

    fn support_flags(&self) -> SupportFlags {
        SupportFlags::all()
    }

    fn error_slot(&self) -> &ErrorSlot {
        &self.errors
    }

    fn exists(&self, identity: &ServiceIdentity) -> bool {
        self.errors.record(self.definition(identity)).is_ok()
    }

    fn status(&self, identity: &ServiceIdentity) -> Result<ServiceState, ControlError> {
        let result = self.definition(identity).and_then(|_| {
            Ok(self
                .live_record(identity)?
                .map_or(ServiceState::Stopped, |record| record.state))
        });
        self.errors.record(result)
    }

    fn start(&self, identity: &ServiceIdentity, blocking: bool) -> Result<(), ControlError> {
        self.errors.record(self.start_inner(identity, blocking))
    }

    fn stop(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        self.errors.record(self.stop_inner(identity))
    }

    fn pause(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        self.errors.record(self.pause_inner(identity))
    }

    fn resume(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        self.errors.record(self.resume_inner(identity))
    }

    fn reload(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        self.errors.record(self.reload_inner(identity))
    }

    fn is_autostart_enabled(&self, identity: &ServiceIdentity) -> Result<bool, ControlError> {
        let result = self
            .definition(identity)
            .map(|_| autostart_marker(identity.name()).exists());
        self.errors.record(result)
    }

    fn enable_autostart(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        self.errors.record(self.enable_autostart_inner(identity))
    }

    fn disable_autostart(&self, identity: &ServiceIdentity) -> Result<(), ControlError> {
        self.errors.record(self.disable_autostart_inner(identity))
    }

    fn custom_command(&self, identity: &ServiceIdentity, token: &str) -> Result<(), ControlError> {
        self.errors.record(self.custom_inner(identity, token))
    }
}

fn autostart_dir() -> PathBuf {
    runtime::config_dir().join(AUTOSTART_DIR_NAME)
}

fn autostart_marker(name: &str) -> PathBuf {
    autostart_dir().join(name)
}

/// File receiving the service's stdout and stderr.
pub fn log_path(name: &str) -> PathBuf {
    runtime::log_dir().join(format!("{name}.log"))
}

/// Whether `pid` names a live process. Zombies count as dead.
fn process_alive(pid: u32) -> bool {
    let pid = sysinfo::Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system
        .process(pid)
        .is_some_and(|process| !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead))
}

fn send_signal(operation: &'static str, pid: u32, signal: Signal) -> Result<(), ControlError> {
    let raw = i32::try_from(pid)
        .map_err(|_| ControlError::native(operation, format!("invalid pid {pid}")))?;
    debug!("Sending {signal} to pid {pid}");
    signal::kill(Pid::from_raw(raw), signal).map_err(|errno| {
        ControlError::native(operation, format!("failed to send {signal} to pid {pid}: {errno}"))
    })
}

/// Parses a custom command token naming a signal, e.g. `SIGUSR1` or `usr1`.
pub fn parse_signal(token: &str) -> Result<Signal, ControlError> {
    let upper = token.trim().to_ascii_uppercase();
    let name = if upper.starts_with("SIG") {
        upper
    } else {
        format!("SIG{upper}")
    };
    Signal::from_str(&name).map_err(|_| {
        ControlError::native(
            "custom command",
            format!("'{token}' does not name a signal"),
        )
    })
}
