// ============================================
// File: crates/udtbind/src/config.rs
// ============================================
//! # Binding Configuration
//!
//! ## Creation Reason
//! Collects the few knobs of the binding layer (default socket options,
//! multiplexer housekeeping, logging, signal handling) in one TOML file.
//!
//! ## Main Functionality
//! - `BindingConfig`: Main configuration structure
//! - TOML file loading and parsing
//! - Configuration validation
//!
//! ## Configuration Sections
//! - `logging`: Log level
//! - `socket`: Blocking modes applied to every handle, default backlog
//! - `multiplexer`: Garbage collection on wait
//! - `signals`: Signal-triggered shutdown
//!
//! ## Example Configuration
//! ```toml
//! [logging]
//! level = "debug"
//!
//! [socket]
//! send_blocking = false
//! recv_blocking = true
//! default_backlog = 1024
//!
//! [multiplexer]
//! gc_on_wait = true
//!
//! [signals]
//! install_handlers = true
//! ```
//!
//! ## ⚠️ Important Note for Next Developer
//! - Every section is optional; an empty file is a valid configuration
//! - Socket options apply at handle creation, changing them later does not
//!   touch existing handles
//!
//! ## Last Modified
//! v0.1.0 - Initial configuration implementation

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, UdtError};

/// Log levels accepted by `[logging] level`.
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

// ============================================
// BindingConfig
// ============================================

/// Main binding configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingConfig {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Default socket options.
    #[serde(default)]
    pub socket: SocketConfig,

    /// Multiplexer behavior.
    #[serde(default)]
    pub multiplexer: MultiplexerConfig,

    /// Signal handling.
    #[serde(default)]
    pub signals: SignalConfig,
}

impl BindingConfig {
    /// Loads configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an `Argument` error if the file cannot be read, parsed or
    /// validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.display().to_string();

        info!(path = %path_str, "Loading configuration");

        let content = std::fs::read_to_string(path).map_err(|e| {
            UdtError::argument(format!("cannot read configuration '{path_str}'"))
                .with_extra(e.to_string())
        })?;

        let config = Self::parse(&content, &path_str)?;
        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Loads configuration from a string (useful for testing).
    ///
    /// # Errors
    /// Returns an `Argument` error on parse or validation failure.
    pub fn from_str(content: &str) -> Result<Self> {
        Self::parse(content, "<string>")
    }

    fn parse(content: &str, origin: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).map_err(|e| {
            UdtError::argument(format!("cannot parse configuration '{origin}'"))
                .with_extra(e.to_string())
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns an `Argument` error naming the offending field.
    pub fn validate(&self) -> Result<()> {
        self.logging.validate()?;
        self.socket.validate()?;
        Ok(())
    }

    /// Serializes configuration to a TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}

// ============================================
// LoggingConfig
// ============================================

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LoggingConfig {
    fn validate(&self) -> Result<()> {
        if !LOG_LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            return Err(UdtError::argument(format!(
                "logging.level must be one of {}",
                LOG_LEVELS.join(", ")
            ))
            .with_extra(self.level.clone()));
        }
        Ok(())
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ============================================
// SocketConfig
// ============================================

/// Options applied to every created or wrapped socket handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketConfig {
    /// Whether native sends block.
    #[serde(default)]
    pub send_blocking: bool,

    /// Whether native receives block.
    #[serde(default = "default_true")]
    pub recv_blocking: bool,

    /// Backlog used by callers that do not choose one.
    #[serde(default = "default_backlog")]
    pub default_backlog: i32,
}

fn default_true() -> bool {
    true
}

fn default_backlog() -> i32 {
    1024
}

impl SocketConfig {
    fn validate(&self) -> Result<()> {
        if self.default_backlog < 0 {
            return Err(UdtError::argument("socket.default_backlog cannot be negative")
                .with_extra(self.default_backlog.to_string()));
        }
        Ok(())
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            send_blocking: false,
            recv_blocking: default_true(),
            default_backlog: default_backlog(),
        }
    }
}

// ============================================
// MultiplexerConfig
// ============================================

/// Multiplexer behavior section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiplexerConfig {
    /// Run a garbage-collection sweep before every wait.
    #[serde(default)]
    pub gc_on_wait: bool,
}

// ============================================
// SignalConfig
// ============================================

/// Signal handling section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Install the shutdown handler on global startup.
    #[serde(default = "default_true")]
    pub install_handlers: bool,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            install_handlers: default_true(),
        }
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_default_config() {
        let config = BindingConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.socket.send_blocking);
        assert!(config.socket.recv_blocking);
        assert_eq!(config.socket.default_backlog, 1024);
        assert!(!config.multiplexer.gc_on_wait);
        assert!(config.signals.install_handlers);
    }

    #[test]
    fn test_empty_config() {
        assert_eq!(BindingConfig::from_str("").unwrap(), BindingConfig::default());
    }

    #[test]
    fn test_full_config() {
        let toml = r#"
            [logging]
            level = "debug"

            [socket]
            send_blocking = true
            recv_blocking = false
            default_backlog = 16

            [multiplexer]
            gc_on_wait = true

            [signals]
            install_handlers = false
        "#;

        let config = BindingConfig::from_str(toml).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert!(config.socket.send_blocking);
        assert!(!config.socket.recv_blocking);
        assert_eq!(config.socket.default_backlog, 16);
        assert!(config.multiplexer.gc_on_wait);
        assert!(!config.signals.install_handlers);
    }

    #[test]
    fn test_invalid_values() {
        let err = BindingConfig::from_str("[logging]\nlevel = \"loud\"").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert_eq!(err.extra(), "loud");

        assert!(BindingConfig::from_str("[socket]\ndefault_backlog = -5").is_err());
        assert!(BindingConfig::from_str("[socket]\nsend_blocking = \"yes\"").is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = BindingConfig::default();
        config.multiplexer.gc_on_wait = true;
        let reparsed = BindingConfig::from_str(&config.to_toml()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_load_missing_file() {
        let err = BindingConfig::load("/nonexistent/udtbind.toml").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert!(!err.extra().is_empty());
    }
}
