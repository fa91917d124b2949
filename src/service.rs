//! Service-side runtime: turns control signals into lifecycle transitions and
//! publishes every change to the status store, the notification channel and,
//! when supervised by systemd, the `NOTIFY_SOCKET`.
use std::{env, io, os::unix::net::UnixDatagram, sync::Arc};

use nix::sys::signal::{SigSet, Signal};
use tracing::{debug, info, warn};

use crate::{
    backend::validate_name,
    channel::NotificationServer,
    constants::{NOTIFY_SOCKET_ENV, SERVICE_NAME_ENV},
    error::{LifecycleError, ServiceError},
    lifecycle::{Lifecycle, LifecycleSink, ServiceHandler},
    state::{LifecycleEvent, ServiceState},
    store::StatusStore,
};

/// Lifecycle request carried by a control signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    Stop,
    Reload,
    Pause,
    Resume,
    Command(i32),
}

impl ControlRequest {
    /// Maps a received signal onto a request, `None` for signals without meaning.
    pub fn from_signal(signal: Signal) -> Option<Self> {
        match signal {
            Signal::SIGTERM | Signal::SIGINT => Some(Self::Stop),
            Signal::SIGHUP => Some(Self::Reload),
            Signal::SIGTSTP => Some(Self::Pause),
            Signal::SIGCONT => Some(Self::Resume),
            Signal::SIGUSR1 => Some(Self::Command(1)),
            Signal::SIGUSR2 => Some(Self::Command(2)),
            _ => None,
        }
    }
}

/// Signals consumed by the runtime.
pub fn control_signals() -> SigSet {
    let mut signals = SigSet::empty();
    for signal in [
        Signal::SIGTERM,
        Signal::SIGINT,
        Signal::SIGHUP,
        Signal::SIGTSTP,
        Signal::SIGCONT,
        Signal::SIGUSR1,
        Signal::SIGUSR2,
    ] {
        signals.add(signal);
    }
    signals
}

/// Writes every state the service enters into its status record.
pub struct StatusReporter {
    store: StatusStore,
    pid: u32,
}

impl StatusReporter {
    pub fn new(name: &str) -> Self {
        Self {
            store: StatusStore::new(name),
            pid: std::process::id(),
        }
    }
}

impl LifecycleSink for StatusReporter {
    fn state_entered(&self, state: ServiceState) {
        if let Err(err) = self.store.record(self.pid, state) {
            warn!("Failed to record state {state}: {err}");
        }
    }
}

/// sd_notify client for services running under systemd.
pub struct SystemdNotifier {
    socket: UnixDatagram,
    address: String,
}

impl SystemdNotifier {
    /// Connects to `NOTIFY_SOCKET`, `None` when the variable is unset or unusable.
    pub fn from_env() -> Option<Self> {
        let address = env::var(NOTIFY_SOCKET_ENV).ok().filter(|v| !v.is_empty())?;
        match UnixDatagram::unbound() {
            Ok(socket) => Some(Self { socket, address }),
            Err(err) => {
                warn!("Failed to open systemd notification socket: {err}");
                None
            }
        }
    }

    /// Sends a raw sd_notify message such as `READY=1`.
    pub fn notify(&self, message: &str) {
        if let Err(err) = self.send(message.as_bytes()) {
            debug!("sd_notify '{message}' failed: {err}");
        }
    }

    #[cfg(target_os = "linux")]
    fn send(&self, payload: &[u8]) -> io::Result<usize> {
        use std::os::{linux::net::SocketAddrExt, unix::net::SocketAddr};

        if let Some(name) = self.address.strip_prefix('@') {
            let address = SocketAddr::from_abstract_name(name.as_bytes())?;
            return self.socket.send_to_addr(payload, &address);
        }
        self.socket.send_to(payload, &self.address)
    }

    #[cfg(not(target_os = "linux"))]
    fn send(&self, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, &self.address)
    }
}

impl LifecycleSink for SystemdNotifier {
    fn state_entered(&self, state: ServiceState) {
        match state {
            ServiceState::Running => self.notify("READY=1\nSTATUS=running"),
            ServiceState::Paused => self.notify("STATUS=paused"),
            _ => {}
        }
    }

    fn event(&self, event: LifecycleEvent) {
        match event {
            LifecycleEvent::Reloading => self.notify("RELOADING=1"),
            LifecycleEvent::Stopping => self.notify("STOPPING=1"),
            LifecycleEvent::Pausing => self.notify("STATUS=pausing"),
            LifecycleEvent::Resuming => self.notify("STATUS=resuming"),
            LifecycleEvent::Started => {}
        }
    }
}

/// Runs `handler` as service `name` until a stop request completes.
///
/// Control signals are blocked before any thread is spawned so that every thread
/// started by the handler inherits the mask and the signals are only ever consumed
/// here. Returns an error when startup fails; failures of later transitions are
/// logged and leave the service in its previous stable state.
pub fn run<H: ServiceHandler>(name: &str, handler: H) -> Result<(), ServiceError> {
    validate_name(name)?;

    let signals = control_signals();
    signals.thread_block()?;

    let server = Arc::new(NotificationServer::bind(name)?);
    let notifier = SystemdNotifier::from_env().map(Arc::new);

    let mut sinks: Vec<Arc<dyn LifecycleSink>> = Vec::new();
    sinks.push(Arc::new(StatusReporter::new(name)));
    sinks.push(server.clone());
    if let Some(notifier) = &notifier {
        sinks.push(notifier.clone());
    }

    let mut lifecycle = Lifecycle::new(handler, sinks);
    lifecycle.start()?;
    info!("Service '{name}' running with pid {}", std::process::id());

    while lifecycle.state() != ServiceState::Stopped {
        let signal = signals.wait()?;
        let Some(request) = ControlRequest::from_signal(signal) else {
            continue;
        };
        debug!("Received {signal} ({request:?})");

        if let Err(err) = dispatch(&mut lifecycle, request) {
            warn!("Service '{name}' could not handle {request:?}: {err}");
        } else if request == ControlRequest::Reload
            && let Some(notifier) = &notifier
        {
            notifier.notify("READY=1");
        }
    }

    // Dropping the sinks leaves the server as the only owner; shutting it down
    // delivers the final tokens before the socket goes away.
    drop(lifecycle);
    match Arc::try_unwrap(server) {
        Ok(server) => server.shutdown(),
        Err(_) => warn!("Notification channel for '{name}' still shared at exit"),
    }
    info!("Service '{name}' stopped");
    Ok(())
}

/// Like [`run`], with the name taken from `SVCCTL_SERVICE_NAME` when a backend
/// launched the process.
pub fn run_from_env<H: ServiceHandler>(default_name: &str, handler: H) -> Result<(), ServiceError> {
    let name = env::var(SERVICE_NAME_ENV)
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| default_name.to_string());
    run(&name, handler)
}

fn dispatch<H: ServiceHandler>(
    lifecycle: &mut Lifecycle<H>,
    request: ControlRequest,
) -> Result<(), LifecycleError> {
    match request {
        ControlRequest::Stop => lifecycle.stop(),
        ControlRequest::Reload => lifecycle.reload(),
        ControlRequest::Pause => lifecycle.pause(),
        ControlRequest::Resume => lifecycle.resume(),
        ControlRequest::Command(code) => lifecycle.command(code),
    }
}
