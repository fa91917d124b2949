//! Capability model: the named operations a backend may implement.
use std::fmt;

use bitflags::bitflags;
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, EnumIter, EnumString, IntoStaticStr};

/// A single controllable operation. Each variant maps to one flag of [`SupportFlags`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, EnumString, AsRefStr, IntoStaticStr)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Capability {
    /// Querying the current service state.
    Status,
    /// Starting the service.
    Start,
    /// Stopping the service.
    Stop,
    /// Suspending request processing without stopping.
    Pause,
    /// Leaving the paused state.
    Resume,
    /// Asking the service to reload its configuration.
    Reload,
    /// Backend specific commands.
    CustomCommands,
    /// Toggling launch at boot or login.
    SetAutostart,
    /// Waiting for native confirmation of a transition.
    Blocking,
}

impl Capability {
    /// Returns the flag this capability occupies.
    pub const fn flag(self) -> SupportFlags {
        match self {
            Self::Status => SupportFlags::STATUS,
            Self::Start => SupportFlags::START,
            Self::Stop => SupportFlags::STOP,
            Self::Pause => SupportFlags::PAUSE,
            Self::Resume => SupportFlags::RESUME,
            Self::Reload => SupportFlags::RELOAD,
            Self::CustomCommands => SupportFlags::CUSTOM_COMMANDS,
            Self::SetAutostart => SupportFlags::SET_AUTOSTART,
            Self::Blocking => SupportFlags::BLOCKING,
        }
    }

    /// Name used on the command line and in error messages.
    pub fn name(self) -> &'static str {
        self.into()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

impl From<Capability> for SupportFlags {
    fn from(capability: Capability) -> Self {
        capability.flag()
    }
}

bitflags! {
    /// Immutable set of capabilities declared by a backend.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SupportFlags: u16 {
        const STATUS = 1 << 0;
        const START = 1 << 1;
        const STOP = 1 << 2;
        const PAUSE = 1 << 3;
        const RESUME = 1 << 4;
        const RELOAD = 1 << 5;
        const CUSTOM_COMMANDS = 1 << 6;
        const SET_AUTOSTART = 1 << 7;
        const BLOCKING = 1 << 8;
    }
}

impl SupportFlags {
    /// Builds a set from a list of capabilities.
    pub const fn from_capabilities(capabilities: &[Capability]) -> Self {
        let mut flags = Self::empty();
        let mut index = 0;
        while index < capabilities.len() {
            flags = flags.union(capabilities[index].flag());
            index += 1;
        }
        flags
    }

    /// Returns a copy with `capability` added.
    pub const fn with(self, capability: Capability) -> Self {
        self.union(capability.flag())
    }

    /// Returns a copy with `capability` removed.
    pub const fn without(self, capability: Capability) -> Self {
        self.difference(capability.flag())
    }

    /// Whether the backend implements `capability`.
    pub const fn supports(self, capability: Capability) -> bool {
        self.contains(capability.flag())
    }

    /// Iterates the contained capabilities in declaration order.
    pub fn capabilities(self) -> impl Iterator<Item = Capability> {
        Capability::iter().filter(move |capability| self.supports(*capability))
    }
}

impl FromIterator<Capability> for SupportFlags {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

impl fmt::Display for SupportFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }

        let names: Vec<&str> = self.capabilities().map(Capability::name).collect();
        f.write_str(&names.join("|"))
    }
}
