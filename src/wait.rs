//! Bounded polling used by blocking control calls.
use std::{
    thread,
    time::{Duration, Instant},
};

use crate::constants::{DEFAULT_POLL_INTERVAL, DEFAULT_START_TIMEOUT};

/// How often to poll and for how long before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    /// Delay between two checks.
    pub poll_interval: Duration,
    /// Total time allowed.
    pub timeout: Duration,
}

impl WaitPolicy {
    pub const fn new(poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval,
            timeout,
        }
    }

    /// Same interval, different deadline.
    pub const fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_START_TIMEOUT)
    }
}

/// Calls `check` until it yields a value, fails, or the policy's deadline passes.
///
/// The check runs at least once, even with a zero timeout. On expiry the elapsed time
/// is handed to `on_timeout` to build the caller's error.
pub fn poll_until<T, E>(
    policy: WaitPolicy,
    mut check: impl FnMut() -> Result<Option<T>, E>,
    on_timeout: impl FnOnce(Duration) -> E,
) -> Result<T, E> {
    let started = Instant::now();
    let deadline = started + policy.timeout;

    loop {
        if let Some(value) = check()? {
            return Ok(value);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(on_timeout(now - started));
        }

        thread::sleep(policy.poll_interval.min(deadline - now));
    }
}
