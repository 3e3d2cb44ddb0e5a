//! bulkcat configuration management

use anyhow::{Context, Result, anyhow};
use driver::DriverConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use transport::DeviceId;

/// Configuration file contents
///
/// # Example Configuration
/// ```toml
/// [general]
/// log_level = "info"
///
/// [usb]
/// filters = ["0x078b:0x0010", "0x078b:*"]
/// transfer_timeout_ms = 5000
///
/// [driver]
/// writes_in_flight = 8
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub general: GeneralSettings,
    pub usb: UsbSettings,
    #[serde(default)]
    pub driver: DriverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsbSettings {
    /// VID:PID patterns of devices bulkcat may bind; empty allows all
    pub filters: Vec<String>,
    /// Timeout for one outbound transfer in milliseconds (0 = wait forever)
    #[serde(default = "UsbSettings::default_transfer_timeout")]
    pub transfer_timeout_ms: u64,
}

impl UsbSettings {
    fn default_transfer_timeout() -> u64 {
        5000
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_millis(self.transfer_timeout_ms)
    }

    /// Whether the configured filters admit `id`
    pub fn allows(&self, id: DeviceId) -> bool {
        self.filters.is_empty()
            || self
                .filters
                .iter()
                .filter_map(|filter| DeviceFilter::parse(filter).ok())
                .any(|filter| filter.matches(id))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralSettings {
                log_level: "info".to_string(),
            },
            usb: UsbSettings {
                filters: vec![
                    "0x078b:0x0010".to_string(),
                    "0x078b:0x0020".to_string(),
                    "0x078b:0x0030".to_string(),
                ],
                transfer_timeout_ms: UsbSettings::default_transfer_timeout(),
            },
            driver: DriverConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(shellexpand::tilde(&p.to_string_lossy()).as_ref()),
            None => Self::default_path(),
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Load the default-location file, or defaults when there is none
    ///
    /// A file that exists but does not load is an error; the caller decides
    /// whether to fall back.
    pub fn load_or_default() -> Result<Self> {
        Self::load_existing(Self::default_path())
    }

    fn load_existing(path: PathBuf) -> Result<Self> {
        if path.exists() {
            Self::load(Some(path))
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("bulkdev").join("bulkcat.toml")
        } else {
            PathBuf::from(".config/bulkdev/bulkcat.toml")
        }
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.general.log_level,
                valid_levels.join(", ")
            ));
        }

        for filter in &self.usb.filters {
            DeviceFilter::parse(filter)?;
        }

        self.driver
            .validate()
            .context("Invalid [driver] settings")?;

        Ok(())
    }
}

/// A VID:PID pattern such as `0x078b:0x0010` or `0x078b:*`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFilter {
    vendor_id: Option<u16>,
    product_id: Option<u16>,
}

impl DeviceFilter {
    pub fn parse(filter: &str) -> Result<Self> {
        let parts: Vec<&str> = filter.split(':').collect();
        if parts.len() != 2 {
            return Err(anyhow!(
                "Invalid filter format '{}', expected VID:PID (e.g., '0x1234:0x5678' or '0x1234:*')",
                filter
            ));
        }

        Ok(Self {
            vendor_id: Self::parse_id(parts[0], "VID")?,
            product_id: Self::parse_id(parts[1], "PID")?,
        })
    }

    /// Parse one side of the pattern; `*` matches anything
    fn parse_id(id: &str, name: &str) -> Result<Option<u16>> {
        if id == "*" {
            return Ok(None);
        }

        let hex_part = id
            .strip_prefix("0x")
            .or_else(|| id.strip_prefix("0X"))
            .ok_or_else(|| {
                anyhow!(
                    "Invalid {} '{}', must start with '0x' (e.g., '0x1234')",
                    name,
                    id
                )
            })?;

        if hex_part.is_empty() || hex_part.len() > 4 {
            return Err(anyhow!(
                "Invalid {} '{}', hex part must be 1-4 digits",
                name,
                id
            ));
        }

        u16::from_str_radix(hex_part, 16)
            .map(Some)
            .map_err(|_| anyhow!("Invalid {} '{}', not a valid hex number", name, id))
    }

    pub fn matches(&self, id: DeviceId) -> bool {
        self.vendor_id.is_none_or(|vid| vid == id.vendor_id)
            && self.product_id.is_none_or(|pid| pid == id.product_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.usb.filters.len(), 3);
        assert_eq!(config.driver, DriverConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_filter_parse_valid() {
        assert!(DeviceFilter::parse("0x1234:0x5678").is_ok());
        assert!(DeviceFilter::parse("0x1234:*").is_ok());
        assert!(DeviceFilter::parse("*:0x5678").is_ok());
        assert!(DeviceFilter::parse("*:*").is_ok());
        assert!(DeviceFilter::parse("0xABCD:0xEF01").is_ok());
    }

    #[test]
    fn test_filter_parse_invalid() {
        assert!(DeviceFilter::parse("1234:5678").is_err());
        assert!(DeviceFilter::parse("0x1234").is_err());
        assert!(DeviceFilter::parse("0x1234:0x5678:0x9abc").is_err());
        assert!(DeviceFilter::parse("0xGHIJ:0x5678").is_err());
        assert!(DeviceFilter::parse("0x12345:0x5678").is_err());
    }

    #[test]
    fn test_filter_matching() {
        let exact = DeviceFilter::parse("0x078b:0x0020").unwrap();
        assert!(exact.matches(DeviceId::new(0x078b, 0x0020)));
        assert!(!exact.matches(DeviceId::new(0x078b, 0x0030)));

        let vendor = DeviceFilter::parse("0x078b:*").unwrap();
        assert!(vendor.matches(DeviceId::new(0x078b, 0x0030)));
        assert!(!vendor.matches(DeviceId::new(0x1234, 0x0030)));
    }

    #[test]
    fn test_empty_filters_allow_everything() {
        let mut config = Config::default();
        assert!(!config.usb.allows(DeviceId::new(0x1234, 0x5678)));

        config.usb.filters.clear();
        assert!(config.usb.allows(DeviceId::new(0x1234, 0x5678)));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.general.log_level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.general.log_level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_driver_settings() {
        let mut config = Config::default();
        config.driver.max_transfer = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("bulkcat.toml");

        let mut config = Config::default();
        config.general.log_level = "debug".to_string();
        config.driver.writes_in_flight = 4;
        config.save(&path).unwrap();

        let loaded = Config::load(Some(path)).unwrap();
        assert_eq!(loaded.general.log_level, "debug");
        assert_eq!(loaded.driver.writes_in_flight, 4);
        assert_eq!(loaded.usb.filters, config.usb.filters);
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bulkcat.toml");
        fs::write(
            &path,
            "[general]\nlog_level = \"warn\"\n\n[usb]\nfilters = []\n",
        )
        .unwrap();

        let loaded = Config::load(Some(path)).unwrap();
        assert_eq!(loaded.usb.transfer_timeout_ms, 5000);
        assert_eq!(loaded.driver, DriverConfig::default());
    }

    #[test]
    fn test_load_rejects_bad_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bulkcat.toml");
        fs::write(
            &path,
            "[general]\nlog_level = \"info\"\n\n[usb]\nfilters = [\"078b:0010\"]\n",
        )
        .unwrap();

        assert!(Config::load(Some(path)).is_err());
    }

    #[test]
    fn test_missing_default_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load_existing(dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded.general.log_level, "info");
        assert_eq!(loaded.usb.filters.len(), 3);
    }

    #[test]
    fn test_malformed_default_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bulkcat.toml");
        fs::write(&path, "[general\nlog_level = ").unwrap();

        let err = Config::load_existing(path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }
}
