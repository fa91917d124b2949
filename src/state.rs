//! Service states and the lifecycle tokens announced on each transition.
use std::fmt;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumIter, EnumString};

/// Lifecycle state of a service process.
///
/// The running service owns its state; controllers only observe the copy reported
/// through the native manager.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    AsRefStr,
    EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Pausing,
    Paused,
    Resuming,
    Stopping,
}

impl ServiceState {
    /// Whether moving from `self` to `next` is a legal single step.
    ///
    /// A failed start falls back to `Stopped`, a failed pause or resume falls back
    /// to the state it left.
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        use ServiceState::*;

        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopped)
                | (Running, Pausing)
                | (Pausing, Paused)
                | (Pausing, Running)
                | (Paused, Resuming)
                | (Resuming, Running)
                | (Resuming, Paused)
                | (Running, Stopping)
                | (Paused, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// States the service only passes through while work is in progress.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ServiceState::Starting
                | ServiceState::Pausing
                | ServiceState::Resuming
                | ServiceState::Stopping
        )
    }

    /// True for every state except `Stopped`.
    pub fn is_active(self) -> bool {
        self != ServiceState::Stopped
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Token written to the notification channel when the service enters a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum LifecycleEvent {
    /// Startup work finished, the service is running.
    Started,
    /// A reload was requested; the state does not change.
    Reloading,
    /// Entering `Pausing`.
    Pausing,
    /// Entering `Resuming`.
    Resuming,
    /// Entering `Stopping`.
    Stopping,
}

impl LifecycleEvent {
    /// ASCII token as sent on the wire.
    pub fn token(self) -> &'static str {
        match self {
            LifecycleEvent::Started => "started",
            LifecycleEvent::Reloading => "reloading",
            LifecycleEvent::Pausing => "pausing",
            LifecycleEvent::Resuming => "resuming",
            LifecycleEvent::Stopping => "stopping",
        }
    }

    /// Parses a raw token, tolerating surrounding whitespace.
    pub fn from_token(raw: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(raw).ok()?;
        text.trim().parse().ok()
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}
