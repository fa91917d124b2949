//! Notification channel: a Unix domain socket over which a service streams its
//! lifecycle tokens to whoever is listening.
//!
//! Each token travels as one ASCII line. Tokens are only delivered to observers
//! connected at the time of emission; nothing is buffered for late observers.
use std::{
    fs,
    io::{self, BufRead, BufReader, ErrorKind, Write},
    os::unix::{
        fs::MetadataExt,
        net::{UnixListener, UnixStream},
    },
    path::{Path, PathBuf},
    sync::{
        Mutex,
        mpsc::{self, Sender},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use tracing::{debug, warn};

use crate::{
    constants::{OBSERVER_CONNECT_INTERVAL, SOCKET_EXTENSION},
    error::ChannelError,
    lifecycle::LifecycleSink,
    runtime,
    state::LifecycleEvent,
    wait::{WaitPolicy, poll_until},
};

/// Bound on a single token write, so a stalled observer cannot hold up shutdown.
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Socket path of the notification channel of `name`.
pub fn channel_path(name: &str) -> PathBuf {
    runtime::socket_dir().join(format!("{name}.{SOCKET_EXTENSION}"))
}

struct Subscriber {
    queue: Sender<LifecycleEvent>,
    writer: JoinHandle<()>,
}

impl Subscriber {
    /// Spawns the thread that writes queued tokens to `stream` in order.
    fn spawn(stream: UnixStream) -> io::Result<Self> {
        stream.set_nonblocking(false)?;
        stream.set_write_timeout(Some(WRITE_TIMEOUT))?;

        let (queue, pending) = mpsc::channel::<LifecycleEvent>();
        let writer = thread::spawn(move || {
            let mut stream = stream;
            for event in pending {
                let line = format!("{}\n", event.token());
                if let Err(err) = stream.write_all(line.as_bytes()) {
                    debug!("Dropping notification observer: {err}");
                    break;
                }
            }
        });

        Ok(Self { queue, writer })
    }
}

/// Service side of the channel.
pub struct NotificationServer {
    path: PathBuf,
    socket_id: SocketId,
    listener: UnixListener,
    subscribers: Mutex<Vec<Subscriber>>,
}

impl NotificationServer {
    /// Binds the channel of `name`, replacing a stale socket left by a previous run.
    pub fn bind(name: &str) -> Result<Self, ChannelError> {
        Self::bind_at(channel_path(name))
    }

    /// Binds the channel at an explicit socket path.
    pub fn bind_at(path: impl Into<PathBuf>) -> Result<Self, ChannelError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if path.exists() {
            fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        listener.set_nonblocking(true)?;
        let socket_id = socket_id(&path)?;
        debug!("Notification channel listening on {}", path.display());

        Ok(Self {
            path,
            socket_id,
            listener,
            subscribers: Mutex::new(Vec::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queues `event` for every connected observer without waiting for delivery.
    pub fn emit(&self, event: LifecycleEvent) {
        let mut subscribers = self.lock_subscribers();
        self.admit_pending(&mut subscribers);
        subscribers.retain(|subscriber| subscriber.queue.send(event).is_ok());
        debug!(
            "Emitted '{}' to {} observer(s)",
            event.token(),
            subscribers.len()
        );
    }

    /// Number of observers connected so far.
    pub fn observer_count(&self) -> usize {
        let mut subscribers = self.lock_subscribers();
        self.admit_pending(&mut subscribers);
        subscribers.len()
    }

    /// Delivers every queued token, closes all connections and removes the socket.
    pub fn shutdown(self) {
        drop(self);
    }

    /// Accepts every connection waiting in the listen backlog.
    fn admit_pending(&self, subscribers: &mut Vec<Subscriber>) {
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => match Subscriber::spawn(stream) {
                    Ok(subscriber) => subscribers.push(subscriber),
                    Err(err) => warn!("Failed to set up notification observer: {err}"),
                },
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!("Failed to accept notification observer: {err}");
                    break;
                }
            }
        }
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LifecycleSink for NotificationServer {
    fn event(&self, event: LifecycleEvent) {
        self.emit(event);
    }
}

impl Drop for NotificationServer {
    fn drop(&mut self) {
        let subscribers = std::mem::take(&mut *self.lock_subscribers());
        for Subscriber { queue, writer } in subscribers {
            // Closing the queue lets the writer flush what is left and hang up.
            drop(queue);
            let _ = writer.join();
        }
        // A newer instance of the service may already own the path.
        match socket_id(&self.path) {
            Ok(id) if id == self.socket_id => {
                let _ = fs::remove_file(&self.path);
            }
            Ok(_) => debug!(
                "Leaving {} in place, it belongs to another server",
                self.path.display()
            ),
            Err(_) => {}
        }
    }
}

/// Identifies the socket file a server created. The bound listener keeps its inode
/// alive, so a replacement file never shares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SocketId {
    dev: u64,
    ino: u64,
}

fn socket_id(path: &Path) -> io::Result<SocketId> {
    let metadata = fs::symlink_metadata(path)?;
    Ok(SocketId {
        dev: metadata.dev(),
        ino: metadata.ino(),
    })
}

/// Observer side of the channel.
pub struct NotificationObserver {
    reader: BufReader<UnixStream>,
    pending: Vec<u8>,
}

impl NotificationObserver {
    /// Connects to the channel of `name`, retrying until it accepts or `timeout` passes.
    pub fn connect(name: &str, timeout: Duration) -> Result<Self, ChannelError> {
        let path = channel_path(name);
        let policy = WaitPolicy::new(OBSERVER_CONNECT_INTERVAL, timeout);
        let stream = poll_until(
            policy,
            || match UnixStream::connect(&path) {
                Ok(stream) => Ok(Some(stream)),
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::NotFound | ErrorKind::ConnectionRefused
                    ) =>
                {
                    Ok(None)
                }
                Err(err) => Err(ChannelError::Io(err)),
            },
            |_| ChannelError::NotAvailable(name.to_string()),
        )?;
        Ok(Self::from_stream(stream))
    }

    /// Connects to an explicit socket path, once.
    pub fn connect_at(path: impl AsRef<Path>) -> Result<Self, ChannelError> {
        Ok(Self::from_stream(UnixStream::connect(path)?))
    }

    fn from_stream(stream: UnixStream) -> Self {
        Self {
            reader: BufReader::new(stream),
            pending: Vec::new(),
        }
    }

    /// Blocks until the next token arrives, the channel closes, or `timeout` passes.
    pub fn next_event(&mut self, timeout: Duration) -> Result<LifecycleEvent, ChannelError> {
        // A zero read timeout is rejected by the socket API.
        let timeout = timeout.max(Duration::from_millis(1));
        self.reader.get_ref().set_read_timeout(Some(timeout))?;

        loop {
            match self.reader.read_until(b'\n', &mut self.pending) {
                Ok(0) => return Err(ChannelError::Disconnected),
                Ok(_) if self.pending.ends_with(b"\n") => {
                    let line = std::mem::take(&mut self.pending);
                    return LifecycleEvent::from_token(&line).ok_or_else(|| {
                        ChannelError::UnknownToken(String::from_utf8_lossy(&line).trim().to_string())
                    });
                }
                // Partial line followed by end of stream.
                Ok(_) => return Err(ChannelError::Disconnected),
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(ChannelError::Timeout(timeout));
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Waits until the service closes the channel, discarding tokens meanwhile.
    pub fn wait_disconnected(&mut self, timeout: Duration) -> Result<(), ChannelError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ChannelError::Timeout(timeout));
            }
            match self.next_event(remaining) {
                Ok(event) => debug!("Discarding '{event}' while waiting for disconnect"),
                Err(ChannelError::Disconnected) => return Ok(()),
                Err(ChannelError::Timeout(_)) => return Err(ChannelError::Timeout(timeout)),
                Err(err) => return Err(err),
            }
        }
    }
}
