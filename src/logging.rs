//! Log output.
//!
//! Library code only emits `tracing` events and spans. This module installs
//! the subscriber the binary uses, built from `[application]` in the
//! configuration. `RUST_LOG` wins over the configured level, so a single
//! module can be turned up without touching the config file.
//!
//! Logs go to stderr; stdout is left for readings (including `--json`).
//!
//! # Example
//! ```no_run
//! use flicker_daq::{config::Config, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load()?;
//! logging::init_from_config(&config)?;
//! tracing::info!("Logging ready");
//! # Ok(())
//! # }
//! ```

use crate::config::{Config, LogFormat};
use std::io::IsTerminal;
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Subscriber settings resolved from the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogSettings {
    /// Most verbose level shown when `RUST_LOG` is unset
    pub level: Level,
    /// Line layout
    pub format: LogFormat,
}

impl LogSettings {
    /// Resolve settings from the `[application]` section.
    pub fn from_config(config: &Config) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            format: config.application.log_format,
        })
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(self.level.as_str().to_lowercase()))
    }

    // Source locations only help when chasing protocol traffic.
    fn with_source(&self) -> bool {
        self.level >= Level::DEBUG
    }
}

/// Install the global subscriber described by `config`.
///
/// Does nothing if a subscriber is already installed, so tests and embedding
/// applications keep their own.
pub fn init_from_config(config: &Config) -> Result<(), String> {
    let settings = LogSettings::from_config(config)?;
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let source = settings.with_source();
    let base = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_file(source)
        .with_line_number(source);
    let ansi = std::io::stderr().is_terminal();

    let layer = match settings.format {
        LogFormat::Pretty => base.pretty().with_ansi(ansi).boxed(),
        LogFormat::Compact => base.compact().with_ansi(ansi).boxed(),
        LogFormat::Json => base.json().with_ansi(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(settings.filter()))
        .try_init()
        .map_err(|e| format!("Failed to initialize tracing: {}", e))
}

/// Parse log level string into tracing Level
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("warn"), Ok(Level::WARN)));
        assert!(matches!(parse_log_level("Debug"), Ok(Level::DEBUG)));
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn settings_follow_application_section() {
        let mut config = Config::default();
        config.application.log_level = "debug".to_string();
        config.application.log_format = LogFormat::Json;

        let settings = LogSettings::from_config(&config).unwrap();
        assert_eq!(settings.level, Level::DEBUG);
        assert_eq!(settings.format, LogFormat::Json);
        assert!(settings.with_source());
    }

    #[test]
    fn defaults_are_compact_info_without_source() {
        let settings = LogSettings::from_config(&Config::default()).unwrap();
        assert_eq!(settings.level, Level::INFO);
        assert_eq!(settings.format, LogFormat::Compact);
        assert!(!settings.with_source());
    }

    #[test]
    fn bad_level_is_reported() {
        let mut config = Config::default();
        config.application.log_level = "chatty".to_string();
        let err = init_from_config(&config).unwrap_err();
        assert!(err.contains("chatty"));
    }
}
