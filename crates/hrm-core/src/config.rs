//! Application configuration management.
//!
//! Handles loading, saving, and validating recorder configuration:
//! - Preferred recorder address / name
//! - Reconnect backoff and retry budget
//! - Clock sync and discovery behaviour
//! - HTTP server binding
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `HRM_`-prefixed environment variables using `__` between sections
//! (e.g. `HRM_SESSION__RECONNECT_BASE_DELAY_MS=500`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::DeviceDescriptor;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "HRM";

/// Largest accepted reconnect backoff unit (one hour).
pub const MAX_RECONNECT_BASE_DELAY_MS: u64 = 60 * 60 * 1000;

/// Largest accepted retry budget.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 100;

static MAC_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").expect("MAC address regex is valid")
});

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required configuration file does not exist.
    #[error("Configuration file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The layered sources could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    /// The configuration file could not be written.
    #[error("Failed to write {}: {source}", path.display())]
    WriteError {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be serialized to TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A value is out of range or malformed.
    #[error("Invalid value for '{field}': {message}")]
    ValidationError {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Recorder to bind at startup.
    pub device: DeviceConfig,

    /// Session state machine tuning.
    pub session: SessionConfig,

    /// HTTP server settings.
    pub server: ServerConfig,
}

/// Preferred recorder.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Bluetooth address (`XX:XX:XX:XX:XX:XX`). When unset, the server
    /// discovers a recorder on demand.
    pub address: Option<String>,

    /// Display name for the configured address.
    pub name: Option<String>,
}

impl DeviceConfig {
    /// Descriptor for the configured recorder, if an address is set.
    #[must_use]
    pub fn descriptor(&self) -> Option<DeviceDescriptor> {
        self.address.as_ref().map(|address| DeviceDescriptor {
            id: address.clone(),
            name: self.name.clone(),
        })
    }
}

/// Session state machine tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Backoff unit; attempt `n` waits `n` times this.
    pub reconnect_base_delay_ms: u64,

    /// Consecutive unsolicited losses tolerated before giving up.
    pub max_reconnect_attempts: u32,

    /// Write the device clock on every connect.
    pub sync_clock_on_connect: bool,

    /// How long discovery waits for an advertising recorder.
    pub discovery_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: 1000,
            max_reconnect_attempts: 3,
            sync_clock_on_connect: true,
            discovery_timeout_secs: 10,
        }
    }
}

impl SessionConfig {
    /// Backoff unit as a [`Duration`].
    #[must_use]
    pub const fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    /// Discovery timeout as a [`Duration`].
    #[must_use]
    pub const fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub bind_address: String,

    /// JSON file logging instead of pretty stdout.
    pub production: bool,

    /// Per-subscriber buffer of the live record stream.
    pub stream_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:3000".to_string(),
            production: false,
            stream_buffer: 256,
        }
    }
}

impl Config {
    /// Load configuration from `path`, which must exist, with environment
    /// overrides applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if the file is missing, or a load /
    /// validation error.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Self::layered(path, true)
    }

    /// Load configuration from `path` if it exists, defaults otherwise.
    /// Environment overrides apply either way.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed, or the
    /// resulting configuration is invalid.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        Self::layered(path.as_ref(), false)
    }

    fn layered(path: &Path, required: bool) -> ConfigResult<Self> {
        let settings = ::config::Config::builder()
            .add_source(
                ::config::File::from(path)
                    .format(::config::FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path` as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        let write_err = |source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_err)
    }

    /// Check every field for range and format errors.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::ValidationError`] found.
    pub fn validate(&self) -> ConfigResult<()> {
        if let Some(address) = &self.device.address {
            if !is_valid_mac_address(address) {
                return Err(invalid(
                    "device.address",
                    format!("'{address}' is not in XX:XX:XX:XX:XX:XX format"),
                ));
            }
        }
        if self.session.reconnect_base_delay_ms == 0 {
            return Err(invalid(
                "session.reconnect_base_delay_ms",
                "must be greater than zero",
            ));
        }
        if self.session.reconnect_base_delay_ms > MAX_RECONNECT_BASE_DELAY_MS {
            return Err(invalid(
                "session.reconnect_base_delay_ms",
                format!("must be at most {MAX_RECONNECT_BASE_DELAY_MS}"),
            ));
        }
        if self.session.max_reconnect_attempts > MAX_RECONNECT_ATTEMPTS {
            return Err(invalid(
                "session.max_reconnect_attempts",
                format!("must be at most {MAX_RECONNECT_ATTEMPTS}"),
            ));
        }
        if self.session.discovery_timeout_secs == 0 {
            return Err(invalid(
                "session.discovery_timeout_secs",
                "must be greater than zero",
            ));
        }
        if self.server.stream_buffer == 0 {
            return Err(invalid("server.stream_buffer", "must be greater than zero"));
        }
        Ok(())
    }

    /// Default configuration file location.
    ///
    /// `~/.config/hrm-recorder/config.toml` on Linux, the platform config
    /// directory elsewhere, `./hrm-recorder.toml` as a last resort.
    #[must_use]
    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "hrm-recorder").map_or_else(
            || PathBuf::from("hrm-recorder.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

/// Whether `address` is a colon-separated 48-bit Bluetooth address.
#[must_use]
pub fn is_valid_mac_address(address: &str) -> bool {
    MAC_ADDRESS.is_match(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.session.reconnect_base_delay(), Duration::from_secs(1));
        assert_eq!(config.session.max_reconnect_attempts, 3);
        assert!(config.session.sync_clock_on_connect);
        assert!(config.device.descriptor().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mac_address_validation() {
        assert!(is_valid_mac_address("C4:7F:51:12:34:56"));
        assert!(is_valid_mac_address("c4:7f:51:12:34:56"));
        assert!(!is_valid_mac_address("C4-7F-51-12-34-56"));
        assert!(!is_valid_mac_address("C4:7F:51:12:34"));
        assert!(!is_valid_mac_address(""));
    }

    #[test]
    fn test_validate_rejects_bad_address() {
        let mut config = Config::default();
        config.device.address = Some("not-an-address".into());
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { ref field, .. } if field == "device.address"));
    }

    #[test]
    fn test_validate_rejects_zero_delay() {
        let mut config = Config::default();
        config.session.reconnect_base_delay_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_reconnect_settings() {
        let mut config = Config::default();
        config.session.reconnect_base_delay_ms = MAX_RECONNECT_BASE_DELAY_MS;
        config.session.max_reconnect_attempts = MAX_RECONNECT_ATTEMPTS;
        assert!(config.validate().is_ok());

        config.session.reconnect_base_delay_ms = 100_000_000_000_000_000;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { ref field, .. } if field == "session.reconnect_base_delay_ms"));

        config.session.reconnect_base_delay_ms = 1000;
        config.session.max_reconnect_attempts = MAX_RECONNECT_ATTEMPTS + 1;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { ref field, .. } if field == "session.max_reconnect_attempts"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = Config::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.device.address = Some("C4:7F:51:12:34:56".into());
        config.device.name = Some("HRM-REC".into());
        config.session.reconnect_base_delay_ms = 250;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.device, config.device);
        assert_eq!(loaded.session.reconnect_base_delay_ms, 250);

        let descriptor = loaded.device.descriptor().unwrap();
        assert_eq!(descriptor.id, "C4:7F:51:12:34:56");
        assert_eq!(descriptor.name.as_deref(), Some("HRM-REC"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[session]\nmax_reconnect_attempts = 5\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.session.max_reconnect_attempts, 5);
        assert_eq!(config.session.reconnect_base_delay_ms, 1000);
        assert!(config.device.address.is_none());
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[device]\naddress = \"nope\"\n").unwrap();
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::ValidationError { .. })
        ));
    }
}
