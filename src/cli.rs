//! Command-line interface for svcctl.
use std::{path::PathBuf, str::FromStr};

use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

/// Wrapper around `LevelFilter` so clap can parse log levels from either
/// string names ("info", "debug", etc.) or numeric shorthands (0-5).
#[derive(Clone, Copy, Debug)]
pub struct LogLevelArg(LevelFilter);

impl LogLevelArg {
    /// String representation suitable for `RUST_LOG`.
    pub fn as_str(&self) -> &'static str {
        match self.0 {
            LevelFilter::OFF => "off",
            LevelFilter::ERROR => "error",
            LevelFilter::WARN => "warn",
            LevelFilter::INFO => "info",
            LevelFilter::DEBUG => "debug",
            LevelFilter::TRACE => "trace",
        }
    }
}

impl FromStr for LogLevelArg {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err("log level cannot be empty".into());
        }

        if let Ok(number) = trimmed.parse::<u8>() {
            let level = match number {
                0 => LevelFilter::OFF,
                1 => LevelFilter::ERROR,
                2 => LevelFilter::WARN,
                3 => LevelFilter::INFO,
                4 => LevelFilter::DEBUG,
                5 => LevelFilter::TRACE,
                _ => {
                    return Err(format!(
                        "unsupported log level number '{number}' (expected 0-5)"
                    ));
                }
            };

            return Ok(LogLevelArg(level));
        }

        let lowercase = trimmed.to_ascii_lowercase();
        let level = match lowercase.as_str() {
            "off" => Some(LevelFilter::OFF),
            "error" | "err" => Some(LevelFilter::ERROR),
            "warn" | "warning" => Some(LevelFilter::WARN),
            "info" | "information" => Some(LevelFilter::INFO),
            "debug" => Some(LevelFilter::DEBUG),
            "trace" => Some(LevelFilter::TRACE),
            _ => None,
        }
        .ok_or_else(|| format!("invalid log level '{trimmed}'"))?;

        Ok(LogLevelArg(level))
    }
}

/// Command-line interface for svcctl.
#[derive(Parser)]
#[command(name = "svcctl", version, author)]
#[command(about = "Uniform control of background services across service managers", long_about = None)]
pub struct Cli {
    /// Override the logging verbosity for this invocation only.
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Use the system directories instead of the per-user ones.
    #[arg(long = "sys", global = true)]
    pub sys: bool,

    /// Controller configuration file (defaults to `svcctl.yaml` in the config dir).
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Backend to use: standard or systemd (defaults to the configured backend).
    #[arg(short, long, value_name = "KIND", global = true)]
    pub backend: Option<String>,

    /// Wait for transitions to complete before returning.
    #[arg(long, global = true)]
    pub blocking: bool,

    /// The command to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for svcctl.
#[derive(Subcommand)]
pub enum Commands {
    /// Exit successfully when the service is registered.
    Exists {
        /// Service name.
        name: String,
    },
    /// Print the reported state of a service.
    Status {
        /// Service name.
        name: String,
    },
    /// Start a service.
    Start {
        /// Service name.
        name: String,
    },
    /// Stop a service.
    Stop {
        /// Service name.
        name: String,
    },
    /// Pause a running service.
    Pause {
        /// Service name.
        name: String,
    },
    /// Resume a paused service.
    Resume {
        /// Service name.
        name: String,
    },
    /// Ask a running service to reload its configuration.
    Reload {
        /// Service name.
        name: String,
    },
    /// Send a backend specific command, e.g. a signal name such as `usr1`.
    Command {
        /// Service name.
        name: String,
        /// Command token.
        token: String,
    },
    /// Query or change whether a service starts at boot.
    Autostart {
        #[command(subcommand)]
        action: AutostartAction,
    },
    /// Print the capabilities of the selected backend.
    Flags,
    /// Wait until a service reports the given state.
    Wait {
        /// Service name.
        name: String,
        /// Target state, e.g. `running` or `stopped`.
        state: String,
        /// Give up after this long (e.g., "5", "500ms", "1m").
        #[arg(long, value_name = "DURATION")]
        timeout: Option<String>,
    },
    /// Print lifecycle events announced by a service until it exits.
    Watch {
        /// Service name.
        name: String,
        /// How long to wait for the service channel to appear.
        #[arg(long, value_name = "DURATION", default_value = "10s")]
        connect_timeout: String,
    },
    /// Register a service with the standard backend.
    Install {
        /// Service name.
        name: String,
        /// Extra environment variables as KEY=VALUE.
        #[arg(short, long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// Working directory of the service.
        #[arg(long, value_name = "DIR")]
        working_dir: Option<PathBuf>,
        /// Command and arguments to execute.
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },
    /// Remove a standard backend registration.
    Uninstall {
        /// Service name.
        name: String,
    },
    /// Start every standard backend service with autostart enabled.
    Boot,
}

/// Autostart subcommands.
#[derive(Subcommand)]
pub enum AutostartAction {
    /// Print whether autostart is enabled.
    Status {
        /// Service name.
        name: String,
    },
    /// Enable autostart.
    Enable {
        /// Service name.
        name: String,
    },
    /// Disable autostart.
    Disable {
        /// Service name.
        name: String,
    },
}

/// Parses command-line arguments and returns a `Cli` struct.
pub fn parse_args() -> Cli {
    Cli::parse()
}
