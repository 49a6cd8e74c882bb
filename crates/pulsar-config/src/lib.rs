//! Configuration for the Pulsar-M poller.
//!
//! TOML file plus `PULSAR_*` environment overrides, validated into a
//! `pulsar_core::DeviceConfig`. Also owns logging setup so every host
//! initialises `tracing` the same way.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use chrono::TimeDelta;
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use pulsar_api::TransportConfig;
use pulsar_core::{CalendarDuration, ChannelSet, DeviceConfig, parse_timezone};

/// One-line description for host plugin listings.
pub const DESCRIPTION: &str = "Reads Pulsar-M pulse registrator data via tcp";

/// Commented starter configuration.
pub const SAMPLE_CONFIG: &str = r##"## Gather data from a Pulsar-M pulse registrator.

## TCP socket address of the RS-485 to Ethernet converter.
socket = "localhost:4001"
## Device address.
address = "00112233"
## Status request interval. Not requested when omitted or 0.
status_interval = "1d"
## Timezone of the device system time.
systime_tz = "Europe/Moscow"
## Log every protocol frame at debug level.
# log_protocol = true
## Log level: error, warning, info or debug.
# log_level = "info"
## Channels to query, starting with 1 for the summary channel.
channels_include = [1, 2]
## Field name prefix for channel values.
channel_prefix = "chan_"
## Converter timeouts.
# connect_timeout = "20s"
# rw_timeout = "10s"
"##;

const ENV_PREFIX: &str = "PULSAR_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("logging setup failed: {reason}")]
    Logging { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl ConfigError {
    fn validation(field: &str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// ── Log level ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase", try_from = "String")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warning,
    #[default]
    Info,
    Debug,
}

impl LogLevel {
    /// `EnvFilter` directive for this level.
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid log level {0:?}")]
pub struct InvalidLogLevel(String);

impl FromStr for LogLevel {
    type Err = InvalidLogLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() < 4 {
            return Err(InvalidLogLevel(s.to_owned()));
        }
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warning" => Ok(Self::Warning),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            _ => Err(InvalidLogLevel(s.to_owned())),
        }
    }
}

impl TryFrom<String> for LogLevel {
    type Error = InvalidLogLevel;

    fn try_from(value: String) -> Result<Self, <Self as TryFrom<String>>::Error> {
        value.parse()
    }
}

// ── TOML config struct ──────────────────────────────────────────────

/// File schema for one device.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceFileConfig {
    /// `host:port` of the RS-485 to Ethernet converter.
    pub socket: String,

    /// Device address on the bus.
    pub address: String,

    /// Status check cadence; `0` disables it.
    pub status_interval: CalendarDuration,

    /// IANA zone of the device clock; empty means UTC.
    pub systime_tz: String,

    pub log_protocol: bool,
    pub log_level: LogLevel,

    pub channels_include: Vec<i64>,
    pub channel_prefix: String,

    pub connect_timeout: CalendarDuration,
    pub rw_timeout: CalendarDuration,
}

impl Default for DeviceFileConfig {
    fn default() -> Self {
        let transport = TransportConfig::default();
        Self {
            socket: String::new(),
            address: String::new(),
            status_interval: CalendarDuration::ZERO,
            systime_tz: String::new(),
            log_protocol: false,
            log_level: LogLevel::default(),
            channels_include: Vec::new(),
            channel_prefix: String::new(),
            connect_timeout: from_std(transport.connect_timeout),
            rw_timeout: from_std(transport.rw_timeout),
        }
    }
}

fn from_std(duration: Duration) -> CalendarDuration {
    TimeDelta::from_std(duration).map_or(CalendarDuration::ZERO, CalendarDuration::from_elapsed)
}

impl DeviceFileConfig {
    /// Validate and convert into the runtime configuration.
    pub fn into_device_config(self) -> Result<DeviceConfig, ConfigError> {
        if self.socket.trim().is_empty() {
            return Err(ConfigError::validation("socket", "socket is required"));
        }
        if self.address.trim().is_empty() {
            return Err(ConfigError::validation("address", "address is required"));
        }
        if is_negative(self.status_interval) {
            return Err(ConfigError::validation(
                "status_interval",
                format!("must not be negative, got {}", self.status_interval),
            ));
        }
        let timezone = parse_timezone(&self.systime_tz)
            .map_err(|err| ConfigError::validation("systime_tz", err.to_string()))?;
        let channels = ChannelSet::new(self.channels_include.iter().copied())
            .map_err(|err| ConfigError::validation("channels_include", err.to_string()))?;
        let transport = TransportConfig {
            connect_timeout: fixed_timeout("connect_timeout", self.connect_timeout)?,
            rw_timeout: fixed_timeout("rw_timeout", self.rw_timeout)?,
            log_protocol: self.log_protocol,
        };

        Ok(DeviceConfig::new(self.socket, self.address, channels)
            .with_status_interval(self.status_interval)
            .with_timezone(timezone)
            .with_channel_prefix(self.channel_prefix)
            .with_transport(transport))
    }
}

fn is_negative(d: CalendarDuration) -> bool {
    d.elapsed() < TimeDelta::zero() || d.months() < 0 || d.years() < 0
}

/// Timeouts take only the fixed part of the grammar and must be positive.
fn fixed_timeout(field: &str, d: CalendarDuration) -> Result<Duration, ConfigError> {
    if d.months() != 0 || d.years() != 0 {
        return Err(ConfigError::validation(field, format!("calendar units not allowed, got {d}")));
    }
    d.elapsed()
        .to_std()
        .ok()
        .filter(|t| !t.is_zero())
        .ok_or_else(|| ConfigError::validation(field, format!("must be positive, got {d}")))
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("", "", "pulsar").map_or_else(
        || PathBuf::from("pulsar.toml"),
        |dirs| dirs.config_dir().join("pulsar.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load defaults, then the TOML file at `path` (or [`config_path`]),
/// then `PULSAR_*` environment variables.
pub fn load_config(path: Option<&Path>) -> Result<DeviceFileConfig, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    debug!(path = %path.display(), "loading config");

    let figment = Figment::new()
        .merge(Serialized::defaults(DeviceFileConfig::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed(ENV_PREFIX));

    let config: DeviceFileConfig = figment.extract()?;
    Ok(config)
}

/// Load and validate in one step.
pub fn load_device_config(path: Option<&Path>) -> Result<(DeviceConfig, LogLevel), ConfigError> {
    let file = load_config(path)?;
    let level = file.log_level;
    Ok((file.into_device_config()?, level))
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &DeviceFileConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Logging ─────────────────────────────────────────────────────────

/// Install the global `tracing` subscriber. `RUST_LOG` overrides `level`.
pub fn init_tracing(level: LogLevel) -> Result<(), ConfigError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter())),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| ConfigError::Logging {
            reason: err.to_string(),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn log_level_parsing() {
        assert_eq!("DEBUG".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("Warning".parse::<LogLevel>().unwrap(), LogLevel::Warning);
        assert!("warn".parse::<LogLevel>().is_err());
        assert!("err".parse::<LogLevel>().is_err());
        assert!("".parse::<LogLevel>().is_err());
        assert_eq!(LogLevel::Warning.as_filter(), "warn");
        assert_eq!(LogLevel::default().to_string(), "info");
    }

    #[test]
    fn defaults_carry_transport_timeouts() {
        let cfg = DeviceFileConfig::default();
        assert_eq!(cfg.connect_timeout.to_string(), "20s");
        assert_eq!(cfg.rw_timeout.to_string(), "10s");
        assert_eq!(cfg.log_level, LogLevel::Info);
    }

    #[test]
    fn fixed_timeout_rejects_calendar_and_zero() {
        let ok = fixed_timeout("rw_timeout", "1.5s".parse().unwrap()).unwrap();
        assert_eq!(ok, Duration::from_millis(1500));
        assert!(fixed_timeout("rw_timeout", "1mo".parse().unwrap()).is_err());
        assert!(fixed_timeout("rw_timeout", "0".parse().unwrap()).is_err());
        assert!(fixed_timeout("rw_timeout", "-5s".parse().unwrap()).is_err());
    }
}
