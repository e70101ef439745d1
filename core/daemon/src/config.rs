//! Bridge configuration.
//!
//! Values come from an optional TOML file, then CLI flags (or their
//! `SAEMUBOX_*` environment fallbacks) override them. The result is
//! validated once and stays immutable for the life of the process.

use clap::Args;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

pub const TEMPLATE_PLACEHOLDER: &str = "{}";
const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub pathfinder: PathfinderConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub onair: OnAirConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PathfinderConfig {
    pub address: String,
    pub credential: String,
    pub device: String,
    pub connect_timeout_ms: u64,
    /// Unset means reads block until the panel sends something.
    pub read_timeout_secs: Option<u64>,
}

impl Default for PathfinderConfig {
    fn default() -> Self {
        Self {
            address: "localhost:9600".to_string(),
            credential: String::new(),
            device: "studioklangbecken".to_string(),
            connect_timeout_ms: 5_000,
            read_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TargetConfig {
    pub address: String,
    pub enabled: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            address: "localhost:9000".to_string(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct OnAirConfig {
    pub enabled: bool,
    pub address: String,
    pub command_template: String,
    pub timeout_ms: u64,
}

impl Default for OnAirConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "unix:/var/run/liquidsoap/liquidsoap.sock".to_string(),
            command_template: "klangbecken.on_air {}".to_string(),
            timeout_ms: 2_000,
        }
    }
}

impl OnAirConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    pub tick_interval_ms: u64,
    pub watchdog_threshold_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 600,
            watchdog_threshold_secs: 63 * 60,
        }
    }
}

impl TimingConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn watchdog_threshold(&self) -> Result<chrono::Duration, ConfigError> {
        i64::try_from(self.watchdog_threshold_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "watchdog threshold of {} seconds is out of range",
                    self.watchdog_threshold_secs
                ))
            })
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Consecutive failed sessions tolerated; 0 makes the first failure fatal.
    pub max_attempts: u32,
    pub backoff_step_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff_step_secs: 2,
            backoff_max_secs: 30,
        }
    }
}

/// Command line overrides. Every field falls back to an environment variable.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigOverrides {
    /// Pathfinder host:port
    #[arg(long, env = "SAEMUBOX_PATHFINDER")]
    pub pathfinder: Option<String>,

    /// Pathfinder login credential
    #[arg(long, env = "SAEMUBOX_PATHFINDER_AUTH", hide_env_values = true)]
    pub pathfinder_auth: Option<String>,

    /// Pathfinder device to subscribe to
    #[arg(long, env = "SAEMUBOX_PATHFINDER_DEVICE")]
    pub pathfinder_device: Option<String>,

    /// Automation target host:port (UDP)
    #[arg(long, env = "SAEMUBOX_TARGET")]
    pub target: Option<String>,

    /// Forward the selector to the automation target
    #[arg(long, env = "SAEMUBOX_TARGET_ENABLED")]
    pub target_enabled: Option<bool>,

    /// Toggle the playout on-air flag on transitions
    #[arg(long, env = "SAEMUBOX_ONAIR_ENABLED")]
    pub onair_enabled: Option<bool>,

    /// Control socket (unix:/path, /path or host:port)
    #[arg(long, env = "SAEMUBOX_ONAIR_SOCKET")]
    pub onair_socket: Option<String>,

    /// Control command; `{}` is replaced by True or False
    #[arg(long, env = "SAEMUBOX_ONAIR_COMMAND")]
    pub onair_command: Option<String>,

    /// Seconds without Pathfinder events before resubscribing
    #[arg(long, env = "SAEMUBOX_WATCHDOG_SECS")]
    pub watchdog_threshold_secs: Option<u64>,

    /// Consecutive reconnect attempts before giving up
    #[arg(long, env = "SAEMUBOX_RECONNECT_ATTEMPTS")]
    pub reconnect_attempts: Option<u32>,
}

impl Config {
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(value) = overrides.pathfinder {
            self.pathfinder.address = value;
        }
        if let Some(value) = overrides.pathfinder_auth {
            self.pathfinder.credential = value;
        }
        if let Some(value) = overrides.pathfinder_device {
            self.pathfinder.device = value;
        }
        if let Some(value) = overrides.target {
            self.target.address = value;
        }
        if let Some(value) = overrides.target_enabled {
            self.target.enabled = value;
        }
        if let Some(value) = overrides.onair_enabled {
            self.onair.enabled = value;
        }
        if let Some(value) = overrides.onair_socket {
            self.onair.address = value;
        }
        if let Some(value) = overrides.onair_command {
            self.onair.command_template = value;
        }
        if let Some(value) = overrides.watchdog_threshold_secs {
            self.timing.watchdog_threshold_secs = value;
        }
        if let Some(value) = overrides.reconnect_attempts {
            self.reconnect.max_attempts = value;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pathfinder.address.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "pathfinder address is required".to_string(),
            ));
        }
        if self.pathfinder.device.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "pathfinder device is required".to_string(),
            ));
        }
        if self.target.enabled && self.target.address.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "target address is required while forwarding is enabled".to_string(),
            ));
        }
        if self.onair.enabled {
            ControlAddress::parse(&self.onair.address)?;
            if !self.onair.command_template.contains(TEMPLATE_PLACEHOLDER) {
                return Err(ConfigError::Invalid(format!(
                    "on-air command template must contain {}",
                    TEMPLATE_PLACEHOLDER
                )));
            }
        }
        if self.pathfinder.connect_timeout_ms == 0
            || self.onair.timeout_ms == 0
            || self.pathfinder.read_timeout_secs == Some(0)
        {
            return Err(ConfigError::Invalid(
                "socket timeouts must be positive".to_string(),
            ));
        }
        if self.timing.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick interval must be positive".to_string(),
            ));
        }
        self.timing.watchdog_threshold()?;
        Ok(())
    }
}

/// Where the playout control socket lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAddress {
    Unix(PathBuf),
    Tcp(String),
}

impl ControlAddress {
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        let value = value.trim();
        if let Some(path) = value.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(ConfigError::Invalid(
                    "unix control socket path is empty".to_string(),
                ));
            }
            return Ok(ControlAddress::Unix(PathBuf::from(path)));
        }
        if value.starts_with('/') {
            return Ok(ControlAddress::Unix(PathBuf::from(value)));
        }
        if value.contains(':') {
            return Ok(ControlAddress::Tcp(value.to_string()));
        }
        Err(ConfigError::Invalid(format!(
            "unrecognized control socket address: {:?}",
            value
        )))
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("saemubox").join(CONFIG_FILE_NAME))
}

/// Loads the config file, returning defaults when it does not exist.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let config_path = match path.map(Path::to_path_buf).or_else(default_config_path) {
        Some(path) => path,
        None => return Ok(Config::default()),
    };

    if !config_path.exists() {
        return Ok(Config::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| ConfigError::Read {
        path: config_path.clone(),
        source,
    })?;
    toml::from_str::<Config>(&content).map_err(|err| ConfigError::Parse {
        path: config_path,
        details: err.to_string(),
    })
}
