//! Constants and default values shared by controllers and service processes.
//!
//! This module centralizes the file names, environment variables and timing
//! defaults so the controller side and the service side agree on them.

use std::time::Duration;

// ============================================================================
// Environment Variables
// ============================================================================

/// Name of the service, exported to processes launched by the standard backend.
pub const SERVICE_NAME_ENV: &str = "SVCCTL_SERVICE_NAME";

/// Overrides the state directory (status records, channel sockets, logs).
pub const STATE_DIR_ENV: &str = "SVCCTL_STATE_DIR";

/// Overrides the configuration directory (registrations, autostart markers).
pub const CONFIG_DIR_ENV: &str = "SVCCTL_CONFIG_DIR";

/// Socket a systemd-hosted service reports readiness to.
pub const NOTIFY_SOCKET_ENV: &str = "NOTIFY_SOCKET";

// ============================================================================
// File System Constants
// ============================================================================

/// Controller configuration file looked up in the configuration directory.
pub const CONFIG_FILE_NAME: &str = "svcctl.yaml";

/// Subdirectory holding service registrations and status records.
pub const SERVICES_DIR_NAME: &str = "services";

/// Subdirectory holding autostart markers.
pub const AUTOSTART_DIR_NAME: &str = "autostart";

/// Extension of service registration files.
pub const DEFINITION_EXTENSION: &str = "yaml";

/// Extension of status record files.
pub const STATUS_EXTENSION: &str = "json";

/// Extension of notification channel sockets.
pub const SOCKET_EXTENSION: &str = "sock";

/// Longest accepted service name, keeps derived socket paths under the sun_path limit.
pub const MAX_SERVICE_NAME_LEN: usize = 64;

// ============================================================================
// Timing
// ============================================================================

/// Interval between status polls during blocking waits.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound for a blocking start to reach the running state.
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for a blocking stop, pause or resume to settle.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Interval between connection attempts of a notification observer.
pub const OBSERVER_CONNECT_INTERVAL: Duration = Duration::from_millis(50);

/// Default port of the demo echo service.
pub const DEFAULT_ECHO_PORT: u16 = 15843;

/// Port override for the demo echo service.
pub const ECHO_PORT_ENV: &str = "SVCCTL_ECHO_PORT";
