//! Runtime paths shared by controllers and service processes.
#[cfg(test)]
use std::path::Path;
use std::{
    env,
    path::PathBuf,
    sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use crate::constants::{CONFIG_DIR_ENV, STATE_DIR_ENV};

/// Where to store state, registrations and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeMode {
    /// User home dir (~/.local/share/svcctl).
    User,
    /// System dirs (/var/lib/svcctl).
    System,
}

#[derive(Debug, Clone)]
struct RuntimeContext {
    state_dir: PathBuf,
    log_dir: PathBuf,
    config_dir: PathBuf,
}

static CONTEXT: OnceLock<RwLock<RuntimeContext>> = OnceLock::new();

fn context_lock() -> &'static RwLock<RuntimeContext> {
    CONTEXT.get_or_init(|| RwLock::new(RuntimeContext::from_mode(RuntimeMode::User)))
}

fn read_context() -> RwLockReadGuard<'static, RuntimeContext> {
    context_lock()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_context() -> RwLockWriteGuard<'static, RuntimeContext> {
    context_lock()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RuntimeContext {
    fn from_mode(mode: RuntimeMode) -> Self {
        let context = match mode {
            RuntimeMode::User => Self::user_directories(),
            RuntimeMode::System => Self::system_directories(),
        };
        context.with_env_overrides()
    }

    fn user_directories() -> Self {
        let home = env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/"));
        Self::from_user_home(home)
    }

    fn from_user_home(home: PathBuf) -> Self {
        let state_dir = home.join(".local/share/svcctl");
        let log_dir = state_dir.join("logs");
        let config_dir = home.join(".config/svcctl");

        Self {
            state_dir,
            log_dir,
            config_dir,
        }
    }

    fn system_directories() -> Self {
        Self {
            state_dir: PathBuf::from("/var/lib/svcctl"),
            log_dir: PathBuf::from("/var/log/svcctl"),
            config_dir: PathBuf::from("/etc/svcctl"),
        }
    }

    /// Service processes launched by a backend inherit the controller's directories
    /// through the environment, regardless of their own HOME.
    fn with_env_overrides(mut self) -> Self {
        if let Some(state_dir) = env::var_os(STATE_DIR_ENV).filter(|v| !v.is_empty()) {
            self.state_dir = PathBuf::from(state_dir);
            self.log_dir = self.state_dir.join("logs");
        }
        if let Some(config_dir) = env::var_os(CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
            self.config_dir = PathBuf::from(config_dir);
        }
        self
    }
}

/// Sets runtime mode. Can be called multiple times; paths are recomputed each time.
pub fn init(mode: RuntimeMode) {
    *write_context() = RuntimeContext::from_mode(mode);
}

#[cfg(test)]
pub fn init_with_test_home(home: &Path) {
    *write_context() = RuntimeContext::from_user_home(home.to_path_buf());
}

/// State dir (status records, sockets).
pub fn state_dir() -> PathBuf {
    read_context().state_dir.clone()
}

/// Directory holding the notification channel sockets.
pub fn socket_dir() -> PathBuf {
    state_dir().join("run")
}

/// Log directory for service output captured by the standard backend.
pub fn log_dir() -> PathBuf {
    read_context().log_dir.clone()
}

/// Registration and controller configuration directory.
pub fn config_dir() -> PathBuf {
    read_context().config_dir.clone()
}
