//! Configuration System using Figment
//!
//! Strongly-typed configuration for a device session. Values are layered:
//! 1. Built-in defaults (9600 baud, 5 s read deadline, 10 ms / 1 s gate polling,
//!    100 ms watchdog)
//! 2. `config/flicker.toml` (or any file passed to [`Config::load_from`])
//! 3. Environment variables prefixed with `FLICKER_`, nested with `__`
//!
//! # Example
//! ```no_run
//! use flicker_daq::config::Config;
//!
//! let config = Config::load()?;
//! println!("Baud rate: {}", config.serial.baud_rate);
//! # Ok::<(), flicker_daq::DeviceError>(())
//! ```

use crate::error::{DeviceError, DeviceResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/flicker.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial transport settings
    #[serde(default)]
    pub serial: SerialConfig,
    /// Protocol timing settings
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output layout
    #[serde(default)]
    pub log_format: LogFormat,
}

/// Layout of log lines on stderr.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, human oriented
    Pretty,
    /// One line per event
    #[default]
    Compact,
    /// Newline-delimited JSON for log collectors
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!(
                "Invalid log format '{}'. Must be one of: pretty, compact, json",
                s
            )),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        })
    }
}

/// Serial transport configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port path to use without prompting (e.g. "/dev/ttyUSB0", "COM3")
    #[serde(default)]
    pub port: Option<String>,
    /// Baud rate; data bits, parity, stop bits and flow control are fixed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
}

/// Protocol timing configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// Deadline for a structured sensor read, in milliseconds
    #[serde(default = "default_response_timeout")]
    pub response_timeout_ms: u64,
    /// Command gate polling interval while busy, in milliseconds
    #[serde(default = "default_gate_poll_interval")]
    pub gate_poll_interval_ms: u64,
    /// Maximum gate wait before forcing it open, in milliseconds
    #[serde(default = "default_gate_wait_ceiling")]
    pub gate_wait_ceiling_ms: u64,
    /// Watchdog delay after a command is sent, in milliseconds
    #[serde(default = "default_watchdog")]
    pub watchdog_ms: u64,
    /// Capacity of each broadcast channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_response_timeout() -> u64 {
    5000
}

fn default_gate_poll_interval() -> u64 {
    10
}

fn default_gate_wait_ceiling() -> u64 {
    1000
}

fn default_watchdog() -> u64 {
    100
}

fn default_channel_capacity() -> usize {
    64
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: default_response_timeout(),
            gate_poll_interval_ms: default_gate_poll_interval(),
            gate_wait_ceiling_ms: default_gate_wait_ceiling(),
            watchdog_ms: default_watchdog(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl ProtocolConfig {
    /// Sensor read deadline.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Gate polling interval.
    pub fn gate_poll_interval(&self) -> Duration {
        Duration::from_millis(self.gate_poll_interval_ms)
    }

    /// Gate wait ceiling.
    pub fn gate_wait_ceiling(&self) -> Duration {
        Duration::from_millis(self.gate_wait_ceiling_ms)
    }

    /// Watchdog delay.
    pub fn watchdog(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }
}

impl Config {
    /// Load configuration from `config/flicker.toml` and environment variables
    ///
    /// A missing file is not an error; defaults and environment still apply.
    /// Example override: `FLICKER_SERIAL__BAUD_RATE=115200`
    pub fn load() -> DeviceResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> DeviceResult<Self> {
        let config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("FLICKER_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> DeviceResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(DeviceError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.serial.baud_rate == 0 {
            return Err(DeviceError::Configuration(
                "baud_rate must be greater than zero".to_string(),
            ));
        }

        if let Some(port) = &self.serial.port {
            if port.trim().is_empty() {
                return Err(DeviceError::Configuration(
                    "serial.port must not be empty when set".to_string(),
                ));
            }
        }

        let protocol = &self.protocol;
        if protocol.gate_poll_interval_ms == 0 {
            return Err(DeviceError::Configuration(
                "gate_poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if protocol.gate_wait_ceiling_ms < protocol.gate_poll_interval_ms {
            return Err(DeviceError::Configuration(format!(
                "gate_wait_ceiling_ms ({}) must be at least gate_poll_interval_ms ({})",
                protocol.gate_wait_ceiling_ms, protocol.gate_poll_interval_ms
            )));
        }
        if protocol.channel_capacity == 0 {
            return Err(DeviceError::Configuration(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = Config::default();
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.protocol.response_timeout(), Duration::from_secs(5));
        assert_eq!(config.protocol.gate_poll_interval(), Duration::from_millis(10));
        assert_eq!(config.protocol.gate_wait_ceiling(), Duration::from_secs(1));
        assert_eq!(config.protocol.watchdog(), Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.serial.baud_rate, 9600);
        assert_eq!(config.serial.port, None);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[application]
log_level = "debug"
log_format = "json"

[serial]
port = "/dev/ttyUSB1"
baud_rate = 115200

[protocol]
response_timeout_ms = 2500
"#
        )
        .unwrap();

        let config = Config::load_from(file.path()).unwrap();
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.application.log_format, LogFormat::Json);
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(config.serial.baud_rate, 115200);
        assert_eq!(config.protocol.response_timeout_ms, 2500);
        assert_eq!(config.protocol.watchdog_ms, 100);
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::default().to_string(), "compact");
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = Config::default();
        config.application.log_level = "verbose".to_string();
        assert!(matches!(
            config.validate(),
            Err(DeviceError::Configuration(_))
        ));
    }

    #[test]
    fn ceiling_shorter_than_poll_is_rejected() {
        let mut config = Config::default();
        config.protocol.gate_poll_interval_ms = 50;
        config.protocol.gate_wait_ceiling_ms = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_baud_and_capacity_are_rejected() {
        let mut config = Config::default();
        config.serial.baud_rate = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.protocol.channel_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[serial]\nbaud_rate = \"fast\"").unwrap();
        assert!(matches!(
            Config::load_from(file.path()),
            Err(DeviceError::Config(_))
        ));
    }
}
