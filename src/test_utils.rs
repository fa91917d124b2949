//! Helpers shared by unit and integration tests.
use std::sync::{Mutex, MutexGuard, OnceLock};

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

/// Serializes tests that touch process-wide state: environment variables such as
/// `HOME` or `NOTIFY_SOCKET`, and the runtime directory context.
///
/// A test that panicked while holding the lock does not poison it for the others.
pub fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
