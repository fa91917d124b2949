//! Minimal TCP echo service driven by the svcctl service runtime.
//!
//! Listens on `127.0.0.1:$SVCCTL_ECHO_PORT`. While paused, new clients are
//! accepted and closed straight away. A reload reads the port from the service
//! registration again and rebinds when it changed.
use std::{
    env,
    io::{self, ErrorKind, Read, Write},
    net::{TcpListener, TcpStream},
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use svcctl::{
    config::ServiceDefinition,
    constants::{DEFAULT_ECHO_PORT, ECHO_PORT_ENV, SERVICE_NAME_ENV},
    lifecycle::{HandlerResult, ServiceHandler},
    service,
};

const ACCEPT_INTERVAL: Duration = Duration::from_millis(20);

struct Acceptor {
    port: u16,
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl Acceptor {
    fn spawn(port: u16, accepting: Arc<AtomicBool>) -> io::Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))?;
        listener.set_nonblocking(true)?;
        let stop = Arc::new(AtomicBool::new(false));

        let flag = stop.clone();
        let thread = thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, peer)) if accepting.load(Ordering::SeqCst) => {
                        debug!("Accepted client {peer}");
                        thread::spawn(move || {
                            if let Err(err) = echo(stream) {
                                debug!("Client {peer} dropped: {err}");
                            }
                        });
                    }
                    Ok((stream, peer)) => {
                        debug!("Refusing client {peer} while paused");
                        drop(stream);
                    }
                    Err(err) if err.kind() == ErrorKind::WouldBlock => {
                        thread::sleep(ACCEPT_INTERVAL);
                    }
                    Err(err) => {
                        warn!("Accept failed: {err}");
                        thread::sleep(ACCEPT_INTERVAL);
                    }
                }
            }
        });

        info!("Echo listener bound to 127.0.0.1:{port}");
        Ok(Self { port, stop, thread })
    }

    fn shutdown(self) {
        self.stop.store(true, Ordering::SeqCst);
        let _ = self.thread.join();
    }
}

fn echo(mut stream: TcpStream) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    let mut buf = [0u8; 4096];
    loop {
        let read = stream.read(&mut buf)?;
        if read == 0 {
            return Ok(());
        }
        stream.write_all(&buf[..read])?;
    }
}

type PortResult = Result<u16, Box<dyn std::error::Error + Send + Sync>>;

fn parse_port(raw: &str) -> PortResult {
    Ok(raw
        .trim()
        .parse()
        .map_err(|_| format!("invalid {ECHO_PORT_ENV} '{raw}'"))?)
}

/// Port from the environment the service was launched with.
fn launch_port() -> PortResult {
    match env::var(ECHO_PORT_ENV) {
        Ok(raw) => parse_port(&raw),
        Err(_) => Ok(DEFAULT_ECHO_PORT),
    }
}

/// Port from the current registration of `name`, falling back to the launch
/// environment when the service is not registered or sets no port.
fn registered_port(name: Option<&str>) -> PortResult {
    let Some(name) = name else {
        return launch_port();
    };
    match ServiceDefinition::load(name)? {
        Some(definition) => match definition.env.get(ECHO_PORT_ENV) {
            Some(raw) => parse_port(raw),
            None => Ok(DEFAULT_ECHO_PORT),
        },
        None => launch_port(),
    }
}

#[derive(Default)]
struct EchoService {
    name: Option<String>,
    accepting: Arc<AtomicBool>,
    acceptor: Option<Acceptor>,
}

impl ServiceHandler for EchoService {
    fn on_start(&mut self) -> HandlerResult {
        self.accepting.store(true, Ordering::SeqCst);
        self.acceptor = Some(Acceptor::spawn(launch_port()?, self.accepting.clone())?);
        Ok(())
    }

    fn on_stop(&mut self) -> HandlerResult {
        self.accepting.store(false, Ordering::SeqCst);
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.shutdown();
        }
        Ok(())
    }

    fn on_reload(&mut self) -> HandlerResult {
        let port = registered_port(self.name.as_deref())?;
        if let Some(acceptor) = self.acceptor.take() {
            if acceptor.port == port {
                self.acceptor = Some(acceptor);
                debug!("Port unchanged, keeping listener");
                return Ok(());
            }
            acceptor.shutdown();
        }
        self.acceptor = Some(Acceptor::spawn(port, self.accepting.clone())?);
        Ok(())
    }

    fn on_pause(&mut self) -> HandlerResult {
        self.accepting.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn on_resume(&mut self) -> HandlerResult {
        self.accepting.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn on_command(&mut self, code: i32) -> HandlerResult {
        info!("Received custom command {code}");
        Ok(())
    }
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();

    let service = EchoService {
        name: env::var(SERVICE_NAME_ENV).ok(),
        ..EchoService::default()
    };
    match service::run_from_env("svcctl-echo", service) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("Echo service failed: {err}");
            ExitCode::FAILURE
        }
    }
}
