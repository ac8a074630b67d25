//! Client configuration
//!
//! Stored as JSON. Every field has a default, so a partial file (or none at
//! all, via [`WbusConfig::load_or_default`]) is enough to get going.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::heater::Profile;
use crate::protocol::{
    Address, TransactionSettings, DEFAULT_LOCAL_ADDRESS, DEFAULT_REMOTE_ADDRESS, DEFAULT_RETRIES,
    DEFAULT_TIMEOUT_MS,
};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Node ids of both ends of the session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AddressConfig {
    /// This client
    pub local: u8,
    /// The heater controller
    pub remote: u8,
}

impl Default for AddressConfig {
    fn default() -> Self {
        Self {
            local: DEFAULT_LOCAL_ADDRESS,
            remote: DEFAULT_REMOTE_ADDRESS,
        }
    }
}

/// Serial line settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Serial device path
    pub device: String,
    /// Session addresses
    pub address: AddressConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
            address: AddressConfig::default(),
        }
    }
}

/// Transaction timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Per-attempt reply timeout
    pub timeout_ms: u64,
    /// Attempts per transaction
    pub retries: u32,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retries: DEFAULT_RETRIES,
        }
    }
}

/// Runner defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Heater function
    pub profile: Profile,
    /// Run length in minutes
    pub minutes: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            profile: Profile::default(),
            minutes: 20,
        }
    }
}

/// Complete client configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WbusConfig {
    /// Serial line
    pub wbus: BusConfig,
    /// Transaction timing
    pub transaction: TransactionConfig,
    /// Runner defaults
    pub runner: RunnerConfig,
}

impl WbusConfig {
    /// Load and validate a configuration file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let config: WbusConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Like [`load`](Self::load), but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match fs::read_to_string(path) {
            Ok(content) => {
                let config: WbusConfig = serde_json::from_str(&content)?;
                config.validate()?;
                Ok(config)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write as pretty-printed JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        let AddressConfig { local, remote } = self.wbus.address;
        if local > 0x0f || remote > 0x0f {
            return Err(ConfigError::Invalid(format!(
                "addresses must be 4-bit node ids (local {:#x}, remote {:#x})",
                local, remote
            )));
        }
        if local == remote {
            return Err(ConfigError::Invalid(format!(
                "local and remote address are both {:#x}",
                local
            )));
        }
        if self.transaction.retries == 0 {
            return Err(ConfigError::Invalid("retries must be at least 1".into()));
        }
        if self.transaction.timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeout_ms must be positive".into()));
        }
        Ok(())
    }

    /// Queue defaults derived from this configuration
    pub fn transaction_settings(&self) -> TransactionSettings {
        TransactionSettings {
            address: Address::new(self.wbus.address.local, self.wbus.address.remote),
            timeout: Duration::from_millis(self.transaction.timeout_ms),
            retries: self.transaction.retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let config = WbusConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.transaction_settings(), TransactionSettings::default());
        assert_eq!(config.runner.minutes, 20);
    }

    #[test]
    fn test_partial_json() {
        let config: WbusConfig =
            serde_json::from_str(r#"{ "wbus": { "device": "/dev/ttyS1" } }"#).unwrap();
        assert_eq!(config.wbus.device, "/dev/ttyS1");
        assert_eq!(config.wbus.address, AddressConfig::default());
        assert_eq!(config.transaction.retries, DEFAULT_RETRIES);
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = WbusConfig::default();
        config.wbus.address.remote = 0x1f;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = WbusConfig::default();
        config.wbus.address.remote = config.wbus.address.local;
        assert!(config.validate().is_err());

        let mut config = WbusConfig::default();
        config.transaction.retries = 0;
        assert!(config.validate().is_err());

        let mut config = WbusConfig::default();
        config.transaction.timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
