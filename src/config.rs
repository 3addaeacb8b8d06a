use crate::device::{DeviceSettings, DEFAULT_HISTORY_CAPACITY};
use crate::error::Error;
use crate::signal::ReferencePower;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Hex substring matched against manufacturer data, empty = accept all
    #[serde(default)]
    pub filter: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// Expected signal strength at 1 meter (dBm), must be non-zero
    pub reference_power: i32,
    /// Use the measured power byte from iBeacon payloads when it is present
    pub use_advertised_power: bool,
    /// Readings retained per device
    pub history_capacity: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        SignalConfig {
            reference_power: ReferencePower::DEFAULT.get(),
            use_advertised_power: false,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Print a line for every newly discovered device
    pub show_new_devices: bool,
    pub format: OutputFormat,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            show_new_devices: true,
            format: OutputFormat::Text,
        }
    }
}

impl SignalConfig {
    pub fn device_settings(&self) -> crate::error::Result<DeviceSettings> {
        if self.history_capacity == 0 {
            return Err(Error::InvalidConfig(
                "signal.history_capacity must be at least 1".to_string(),
            ));
        }

        Ok(DeviceSettings {
            reference_power: ReferencePower::new(self.reference_power)?,
            use_advertised_power: self.use_advertised_power,
            history_capacity: self.history_capacity,
        })
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: Config = serde_json::from_str(&content)
            .with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.signal
            .device_settings()
            .map(|_| ())
            .context("Invalid signal settings")
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scan.filter, "");
        assert_eq!(config.signal.reference_power, -59);
        assert_eq!(config.output.format, OutputFormat::Text);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("beaconwatch.json");

        let mut config = Config::default();
        config.scan.filter = "4C000215".to_string();
        config.signal.reference_power = -65;
        config.output.format = OutputFormat::Json;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{ "scan": { "filter": "beef" } }"#).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.scan.filter, "beef");
        assert_eq!(loaded.signal, SignalConfig::default());
        assert!(loaded.output.show_new_devices);
    }

    #[test]
    fn test_zero_reference_power_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{ "signal": { "reference_power": 0 } }"#).unwrap();

        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_zero_history_capacity_rejected() {
        let mut config = Config::default();
        config.signal.history_capacity = 0;
        assert!(config.validate().is_err());
    }
}
