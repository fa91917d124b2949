#![allow(dead_code)]

use std::{
    env,
    io::{Read, Write},
    net::TcpStream,
    path::Path,
    sync::atomic::{AtomicU16, Ordering},
    thread,
    time::{Duration, Instant},
};

use svcctl::{
    backend::{BackendKind, ServiceIdentity},
    config::{ControlConfig, ServiceDefinition},
    constants::ECHO_PORT_ENV,
    controller::ServiceController,
    state::ServiceState,
    store::StatusStore,
};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct HomeEnvGuard {
    previous: Option<String>,
    _lock: std::sync::MutexGuard<'static, ()>,
}

impl HomeEnvGuard {
    pub fn set(home: &Path) -> Self {
        let lock = svcctl::test_utils::env_lock();
        let previous = env::var("HOME").ok();
        unsafe {
            env::set_var("HOME", home);
        }
        svcctl::runtime::init(svcctl::runtime::RuntimeMode::User);
        Self {
            previous,
            _lock: lock,
        }
    }
}

impl Drop for HomeEnvGuard {
    fn drop(&mut self) {
        match &self.previous {
            Some(value) => unsafe {
                env::set_var("HOME", value);
            },
            None => unsafe {
                env::remove_var("HOME");
            },
        }
        svcctl::runtime::init(svcctl::runtime::RuntimeMode::User);
    }
}

/// Port for an echo service, distinct per call and per test binary run.
pub fn free_port() -> u16 {
    static NEXT: AtomicU16 = AtomicU16::new(0);
    let offset = NEXT.fetch_add(1, Ordering::SeqCst);
    let base = 20000 + (std::process::id() % 2000) as u16 * 10;
    base + offset
}

/// Registers the echo demo service under `name`, listening on `port`.
pub fn install_echo(name: &str, port: u16) {
    let mut definition = ServiceDefinition::new(env!("CARGO_BIN_EXE_svcctl-echo"));
    definition
        .env
        .insert(ECHO_PORT_ENV.to_string(), port.to_string());
    definition.save(name).expect("failed to register echo service");
}

pub fn quick_config() -> ControlConfig {
    ControlConfig {
        poll_interval: Duration::from_millis(50),
        start_timeout: Duration::from_secs(10),
        stop_timeout: Duration::from_secs(10),
        ..ControlConfig::default()
    }
}

pub fn standard_controller(name: &str, blocking: bool) -> ServiceController {
    let identity = ServiceIdentity::new(name, BackendKind::Standard)
        .unwrap()
        .with_blocking(blocking);
    ServiceController::new(identity, &quick_config())
}

/// Sends `payload` and returns what came back, `None` when the server hung up.
pub fn echo_roundtrip(port: u16, payload: &[u8]) -> Option<Vec<u8>> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).ok()?;
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream.write_all(payload).ok()?;

    let mut received = vec![0u8; payload.len()];
    let mut filled = 0;
    while filled < payload.len() {
        match stream.read(&mut received[filled..]) {
            Ok(0) | Err(_) => return None,
            Ok(read) => filled += read,
        }
    }
    Some(received)
}

pub fn wait_for_state(name: &str, expected: ServiceState) {
    let deadline = Instant::now() + EVENT_TIMEOUT;
    loop {
        if let Ok(Some(record)) = StatusStore::new(name).load()
            && record.state == expected
        {
            return;
        }

        if Instant::now() >= deadline {
            panic!("Timed out waiting for service '{name}' to report {expected}");
        }

        thread::sleep(Duration::from_millis(50));
    }
}

pub fn wait_for_path(path: &Path) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if path.exists() {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    panic!("Timed out waiting for {:?} to exist", path);
}
