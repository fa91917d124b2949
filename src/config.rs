//! Controller configuration and standard backend service registrations.
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, de::Error as _};
use std::{
    collections::BTreeMap,
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::OnceLock,
    time::Duration,
};

use crate::{
    backend::BackendKind,
    constants::{
        CONFIG_FILE_NAME, DEFAULT_POLL_INTERVAL, DEFAULT_START_TIMEOUT,
        DEFAULT_STOP_TIMEOUT, DEFINITION_EXTENSION, SERVICES_DIR_NAME,
    },
    error::ConfigError,
    runtime,
    wait::WaitPolicy,
};

/// Controller settings, read from `svcctl.yaml` in the configuration directory.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Backend used when the caller does not pick one.
    pub backend: BackendKind,
    /// Interval between status polls during blocking waits.
    #[serde(deserialize_with = "deserialize_duration")]
    pub poll_interval: Duration,
    /// Upper bound for a blocking start.
    #[serde(deserialize_with = "deserialize_duration")]
    pub start_timeout: Duration,
    /// Upper bound for a blocking stop, pause or resume.
    #[serde(deserialize_with = "deserialize_duration")]
    pub stop_timeout: Duration,
    /// Settings of the systemd backend.
    pub systemd: SystemdConfig,
}

/// Settings of the systemd backend.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SystemdConfig {
    /// Talk to the per-user manager (`systemctl --user`).
    pub user: bool,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            start_timeout: DEFAULT_START_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            systemd: SystemdConfig::default(),
        }
    }
}

impl ControlConfig {
    /// Default location of the controller configuration.
    pub fn default_path() -> PathBuf {
        runtime::config_dir().join(CONFIG_FILE_NAME)
    }

    /// Loads the configuration from `path`, or from the default location when it exists.
    ///
    /// A missing default file yields the built-in defaults; a missing explicit file is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (Self::default_path(), false),
        };

        match fs::read_to_string(&path) {
            Ok(content) => Self::from_yaml(&content, &path),
            Err(err) if err.kind() == ErrorKind::NotFound && !explicit => Ok(Self::default()),
            Err(source) => Err(ConfigError::Read { path, source }),
        }
    }

    /// Parses a configuration document. `path` is used for error messages only.
    pub fn from_yaml(content: &str, path: &Path) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Wait policy applied to blocking starts.
    pub fn start_wait(&self) -> WaitPolicy {
        WaitPolicy::new(self.poll_interval, self.start_timeout)
    }

    /// Wait policy applied to blocking stops, pauses and resumes.
    pub fn stop_wait(&self) -> WaitPolicy {
        WaitPolicy::new(self.poll_interval, self.stop_timeout)
    }
}

/// Registration of a service with the standard backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    /// Executable to launch.
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Extra environment variables for the service process.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Working directory of the service process.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl ServiceDefinition {
    /// Creates a definition that runs `command` without arguments.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
        }
    }

    /// Location of the registration file for `name`.
    pub fn path(name: &str) -> PathBuf {
        runtime::config_dir()
            .join(SERVICES_DIR_NAME)
            .join(format!("{name}.{DEFINITION_EXTENSION}"))
    }

    /// Loads the registration of `name`, `None` when the service is not registered.
    pub fn load(name: &str) -> Result<Option<Self>, ConfigError> {
        let path = Self::path(name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        let definition: Self =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
        definition.expanded().map(Some)
    }

    /// Writes the registration of `name`, replacing any previous one.
    pub fn save(&self, name: &str) -> Result<(), ConfigError> {
        let path = Self::path(name);
        let write_error = |source| ConfigError::Write {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_error)?;
        }
        let yaml = serde_yaml::to_string(self).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        fs::write(&path, yaml).map_err(write_error)
    }

    /// Removes the registration of `name`. Returns whether one existed.
    pub fn remove(name: &str) -> Result<bool, ConfigError> {
        let path = Self::path(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(ConfigError::Write { path, source }),
        }
    }

    /// Returns a copy with `${VAR}` references resolved from the environment.
    fn expanded(mut self) -> Result<Self, ConfigError> {
        self.command = expand_env_vars(&self.command)?;
        for arg in &mut self.args {
            *arg = expand_env_vars(arg)?;
        }
        for value in self.env.values_mut() {
            *value = expand_env_vars(value)?;
        }
        if let Some(dir) = &self.working_dir {
            self.working_dir = Some(PathBuf::from(expand_env_vars(&dir.to_string_lossy())?));
        }
        Ok(self)
    }
}

fn env_var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?").expect("valid env var pattern")
    })
}

/// Expands environment variables within a string.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let pattern = env_var_pattern();
    for caps in pattern.captures_iter(input) {
        let name = &caps[1];
        if env::var_os(name).is_none() {
            return Err(ConfigError::MissingVariable(name.to_string()));
        }
    }

    let result = pattern.replace_all(input, |caps: &regex::Captures| {
        env::var(&caps[1]).unwrap_or_default()
    });
    Ok(result.into_owned())
}

/// Parses durations such as `250ms`, `5s`, `2m`, `1h` or a bare number of seconds.
pub fn parse_duration(raw: &str) -> Result<Duration, ConfigError> {
    let trimmed = raw.trim();
    let invalid = || ConfigError::InvalidDuration(raw.to_string());

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);
    let value: u64 = number.parse().map_err(|_| invalid())?;

    match unit.trim() {
        "" | "s" => Ok(Duration::from_secs(value)),
        "ms" => Ok(Duration::from_millis(value)),
        "m" => value.checked_mul(60).map(Duration::from_secs).ok_or_else(invalid),
        "h" => value.checked_mul(3600).map(Duration::from_secs).ok_or_else(invalid),
        _ => Err(invalid()),
    }
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawDuration {
        Seconds(u64),
        Text(String),
    }

    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(seconds) => Ok(Duration::from_secs(seconds)),
        RawDuration::Text(text) => parse_duration(&text).map_err(D::Error::custom),
    }
}
