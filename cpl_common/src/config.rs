//! Configuration loading traits and types.
//!
//! Every coupler process reads one TOML file before `initialize`. This
//! module provides the loader shared by all crates plus the `[shared]`
//! section common to every coupled model.
//!
//! # Usage
//!
//! ```rust,no_run
//! use cpl_common::config::{ConfigError, ConfigLoader, SharedConfig};
//! use serde::Deserialize;
//! use std::path::Path;
//!
//! #[derive(Debug, Deserialize)]
//! struct OceanSide {
//!     shared: SharedConfig,
//!     tiles: u32,
//! }
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = OceanSide::load(Path::new("ocean.toml"))?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Error type for configuration loading and validation.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Per-point tracing of the exchange path.
    Trace,
    /// Per-field min/max diagnostics.
    Debug,
    /// Lifecycle transitions.
    #[default]
    Info,
    /// Skipped fields and suspicious values.
    Warn,
    /// Failed rounds only.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Fields shared by every coupler configuration.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "ocean-coupler"
/// run_id = "arctic_2026"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Instance identifier used in log lines.
    pub service_name: String,

    /// Identifier of the coupled run. Both models must use the same value;
    /// it namespaces the shared-memory mailboxes.
    #[serde(default = "default_run_id")]
    pub run_id: String,
}

fn default_run_id() -> String {
    "default".to_string()
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// `ConfigError::ValidationError` if `service_name` is empty or `run_id`
    /// is empty or contains characters other than ASCII alphanumerics and
    /// `-`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        if self.run_id.is_empty()
            || !self
                .run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(ConfigError::ValidationError(format!(
                "run_id '{}' must be non-empty ASCII alphanumerics or '-'",
                self.run_id
            )));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML.
///
/// Blanket-implemented for every `serde::de::DeserializeOwned` type.
///
/// # Contract
///
/// - `ConfigError::FileNotFound` if the file does not exist
/// - `ConfigError::ParseError` if the TOML is invalid or does not match `Self`
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(path.display().to_string())
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse configuration from an in-memory TOML document.
    fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_defaults_to_info() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LogLevel::default().as_directive(), "info");
    }

    #[test]
    fn log_level_parses_lowercase() {
        #[derive(Debug, Deserialize)]
        struct Wrapper {
            level: LogLevel,
        }

        let w: Wrapper = toml::from_str("level = \"warn\"").unwrap();
        assert_eq!(w.level, LogLevel::Warn);
        assert!(toml::from_str::<Wrapper>("level = \"WARN\"").is_err());
    }

    #[test]
    fn shared_config_defaults() {
        let shared: SharedConfig = toml::from_str("service_name = \"ice\"").unwrap();
        assert_eq!(shared.log_level, LogLevel::Info);
        assert_eq!(shared.run_id, "default");
        assert!(shared.validate().is_ok());
    }

    #[test]
    fn shared_config_rejects_bad_run_id() {
        let shared = SharedConfig {
            log_level: LogLevel::Info,
            service_name: "ocean".to_string(),
            run_id: "run/../1".to_string(),
        };
        assert!(matches!(
            shared.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn shared_config_rejects_empty_service_name() {
        let shared = SharedConfig {
            log_level: LogLevel::Debug,
            service_name: String::new(),
            run_id: "r1".to_string(),
        };
        assert!(shared.validate().is_err());
    }
}
