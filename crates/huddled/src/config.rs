//! Daemon configuration.
//!
//! Values come from, in order of precedence: CLI flags, environment
//! (`HUDDLE_BIND`, `HUDDLE_CONFIG`, handled by clap), an optional TOML file,
//! and the defaults below.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Default listen address.
pub const DEFAULT_BIND: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8787);

/// How often the liveness monitor sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Silence after which a connection is evicted. Two sweep periods, so one
/// missed beat is tolerated.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(60);

/// Frames queued per connection before new ones are dropped.
pub const DEFAULT_OUTBOUND_BUFFER: usize = 256;

/// Largest inbound text frame accepted (1 MiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// How often the process monitor samples resource usage.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {error}")]
    Read {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Runtime configuration of the hub daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    pub bind: SocketAddr,
    pub sweep_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub outbound_buffer: usize,
    pub max_message_size: usize,
    pub metrics_interval: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            metrics_interval: DEFAULT_METRICS_INTERVAL,
        }
    }
}

/// On-disk form. Every field is optional; durations are whole seconds.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    bind: Option<SocketAddr>,
    sweep_interval_secs: Option<u64>,
    heartbeat_timeout_secs: Option<u64>,
    outbound_buffer: Option<usize>,
    max_message_size: Option<usize>,
    metrics_interval_secs: Option<u64>,
}

impl HubConfig {
    /// Default location of the config file, if a config dir exists.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("huddle").join("huddled.toml"))
    }

    /// Loads configuration from `path`, or from [`default_path`] when `None`.
    ///
    /// An explicit path must exist. A missing default file yields defaults.
    ///
    /// [`default_path`]: HubConfig::default_path
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::default_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_toml_str(&text),
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(error) => Err(ConfigError::Read { path, error }),
        }
    }

    /// Parses a TOML document on top of the defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(text)?;
        let defaults = Self::default();

        let config = Self {
            bind: file.bind.unwrap_or(defaults.bind),
            sweep_interval: file
                .sweep_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
            heartbeat_timeout: file
                .heartbeat_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.heartbeat_timeout),
            outbound_buffer: file.outbound_buffer.unwrap_or(defaults.outbound_buffer),
            max_message_size: file.max_message_size.unwrap_or(defaults.max_message_size),
            metrics_interval: file
                .metrics_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.metrics_interval),
        };

        config.validate()?;
        Ok(config)
    }

    /// Rejects values the hub cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval.is_zero() {
            return Err(invalid("sweep_interval_secs", "must be greater than zero"));
        }
        if self.heartbeat_timeout < self.sweep_interval {
            return Err(invalid(
                "heartbeat_timeout_secs",
                "must be at least the sweep interval",
            ));
        }
        if self.outbound_buffer == 0 {
            return Err(invalid("outbound_buffer", "must be greater than zero"));
        }
        if self.max_message_size == 0 {
            return Err(invalid("max_message_size", "must be greater than zero"));
        }
        if self.metrics_interval.is_zero() {
            return Err(invalid("metrics_interval_secs", "must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}
