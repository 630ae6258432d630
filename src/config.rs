//! Configuration management module.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mp::Timeouts;

/// Configuration load result.
#[derive(Debug)]
pub enum ConfigLoadResult {
    /// Config loaded successfully.
    Loaded(AppConfig),
    /// Config file missing (first run).
    Missing,
    /// Config file exists but invalid.
    Invalid(ConfigError),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub timeouts: TimeoutConfig,
    pub logging: LoggingConfig,
}

/// USB device selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// USB vendor id (default: 0x16D0).
    pub vendor_id: u16,
    /// USB product id (default: 0x09A0).
    pub product_id: u16,
    /// HID interface number (default: 0).
    pub interface: u8,
}

/// Per-command deadlines in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub default_ms: u64,
    pub context_ms: u64,
    /// Long enough for on-device PIN entry and confirmations.
    pub interactive_ms: u64,
    /// Short, for status polling.
    pub status_ms: u64,
    pub poll_interval_ms: u64,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` overrides it.
    pub level: String,
    /// Also write logs to this file.
    pub file: Option<PathBuf>,
}

impl AppConfig {
    /// Get config file path (per-user config directory).
    pub fn default_path() -> PathBuf {
        ProjectDirs::from("org", "mooltipass", "mooltipass-hid")
            .map(|dirs| dirs.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.toml")
    }

    /// Attempt to load config with detailed result.
    pub fn try_load(path: &Path) -> ConfigLoadResult {
        if !path.exists() {
            return ConfigLoadResult::Missing;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str::<AppConfig>(&content) {
                Ok(config) => match config.validate() {
                    Ok(()) => ConfigLoadResult::Loaded(config),
                    Err(e) => ConfigLoadResult::Invalid(e),
                },
                Err(e) => ConfigLoadResult::Invalid(ConfigError::Parse(e)),
            },
            Err(e) => ConfigLoadResult::Invalid(ConfigError::Read(e)),
        }
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.device.vendor_id == 0 {
            return Err(ConfigError::Validation("Vendor id cannot be 0".to_string()));
        }
        if self.device.product_id == 0 {
            return Err(ConfigError::Validation("Product id cannot be 0".to_string()));
        }

        let t = &self.timeouts;
        for (name, value) in [
            ("default_ms", t.default_ms),
            ("context_ms", t.context_ms),
            ("interactive_ms", t.interactive_ms),
            ("status_ms", t.status_ms),
            ("poll_interval_ms", t.poll_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Validation(format!("Timeout {name} must be greater than 0")));
            }
        }
        if t.poll_interval_ms >= t.status_ms {
            return Err(ConfigError::Validation(
                "Poll interval must be shorter than the status timeout".to_string(),
            ));
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Validation("Log level cannot be empty".to_string()));
        }
        Ok(())
    }

    /// Save configuration to file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

impl TimeoutConfig {
    /// Convert to the protocol layer's deadlines.
    pub fn to_timeouts(&self) -> Timeouts {
        Timeouts {
            default: Duration::from_millis(self.default_ms),
            context: Duration::from_millis(self.context_ms),
            interactive: Duration::from_millis(self.interactive_ms),
            status: Duration::from_millis(self.status_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: 0x16D0,
            product_id: 0x09A0,
            interface: 0,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let t = Timeouts::default();
        Self {
            default_ms: t.default.as_millis() as u64,
            context_ms: t.context.as_millis() as u64,
            interactive_ms: t.interactive.as_millis() as u64,
            status_ms: t.status.as_millis() as u64,
            poll_interval_ms: t.poll_interval.as_millis() as u64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_timeouts_match_protocol_defaults() {
        assert_eq!(TimeoutConfig::default().to_timeouts(), Timeouts::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: AppConfig = toml::from_str("[device]\nproduct_id = 0x09A1\n").unwrap();
        assert_eq!(config.device.vendor_id, 0x16D0);
        assert_eq!(config.device.product_id, 0x09A1);
        assert_eq!(config.timeouts.interactive_ms, 20_000);
    }

    #[test]
    fn test_validation_zero_ids() {
        let mut config = AppConfig::default();
        config.device.vendor_id = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.device.product_id = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_timeouts() {
        let mut config = AppConfig::default();
        config.timeouts.status_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.timeouts.poll_interval_ms = config.timeouts.status_ms;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_try_load_missing() {
        let path = std::env::temp_dir().join("mooltipass-hid-does-not-exist.toml");
        assert!(matches!(AppConfig::try_load(&path), ConfigLoadResult::Missing));
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("mooltipass-hid-test-{}.toml", std::process::id()));
        let mut config = AppConfig::default();
        config.timeouts.default_ms = 7000;
        config.save(&path).unwrap();

        match AppConfig::try_load(&path) {
            ConfigLoadResult::Loaded(loaded) => assert_eq!(loaded.timeouts.default_ms, 7000),
            other => panic!("unexpected load result: {other:?}"),
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_try_load_invalid() {
        let path = std::env::temp_dir().join(format!("mooltipass-hid-invalid-{}.toml", std::process::id()));
        std::fs::write(&path, "[device]\nvendor_id = \"not a number\"\n").unwrap();
        assert!(matches!(AppConfig::try_load(&path), ConfigLoadResult::Invalid(ConfigError::Parse(_))));
        let _ = std::fs::remove_file(&path);
    }
}
