// ============================================
// File: crates/udtbind/src/logging.rs
// ============================================
//! # Logging Setup
//!
//! ## Creation Reason
//! Hosts embedding the binding have no `main` of ours to set up tracing,
//! so the binding offers the initialisation itself.
//!
//! ## Main Functionality
//! - `init_logging()`: Installs the global subscriber at a level
//! - `load_logging_configuration()`: Same, with the level from a file
//!
//! ## ⚠️ Important Note for Next Developer
//! - `RUST_LOG` wins over the configured level
//! - Only the first successful initialisation in a process takes effect
//!
//! ## Last Modified
//! v0.1.0 - Initial logging setup

use std::path::Path;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::BindingConfig;
use crate::error::Result;

/// Installs the global tracing subscriber.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_logging(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .is_ok()
}

/// Initialises logging from the `[logging]` section of a configuration file.
///
/// # Errors
/// Returns an `Argument` error if the file cannot be loaded.
pub fn load_logging_configuration(path: impl AsRef<Path>) -> Result<bool> {
    let config = BindingConfig::load(path)?;
    Ok(init_logging(&config.logging.level))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init_logging("debug");
        assert!(!init_logging("info"));
    }

    #[test]
    fn test_load_missing_configuration() {
        assert!(load_logging_configuration("/nonexistent/logging.toml").is_err());
    }
}
