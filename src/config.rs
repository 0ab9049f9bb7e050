//! Device configuration
//!
//! Loaded from TOML. Credentials are never stored in the file: the MQTT
//! section names the environment variable holding the device password, and
//! it is resolved when the session is built.

use crate::protocol::AuthMode;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Main device configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub device: DeviceSection,
    pub mqtt: MqttSection,
}

/// Device identity on the Hono backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Tenant the device is registered with
    pub tenant_id: String,
    /// Device identifier within the tenant
    pub device_id: String,
}

/// MQTT adapter connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// MQTT adapter URL, `mqtt://` or `mqtts://`
    pub broker_url: String,
    /// Environment variable containing the device password
    pub password_env: Option<String>,
    /// Message expiry for telemetry and command responses (default: 6000)
    #[serde(default = "default_message_expiry")]
    pub message_expiry_secs: u32,
    /// Fixed delay before each reconnect attempt (default: 5)
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_secs: u64,
    /// MQTT keep alive (default: 60)
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
    /// How long to wait for CONNACK/SUBACK (default: 30)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_message_expiry() -> u32 {
    6000
}

fn default_reconnect_delay() -> u64 {
    5
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    30
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DeviceConfig {
    /// Load configuration from a TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: DeviceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate identifiers and connection settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_identifier("tenant_id", &self.device.tenant_id)?;
        validate_identifier("device_id", &self.device.device_id)?;

        let scheme = self
            .mqtt
            .broker_url
            .split_once("://")
            .map(|(scheme, _)| scheme);
        if !matches!(scheme, Some("mqtt") | Some("mqtts")) {
            return Err(ConfigError::InvalidConfig(format!(
                "broker_url '{}' must use mqtt:// or mqtts://",
                self.mqtt.broker_url
            )));
        }

        if self.mqtt.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the device password from its environment variable
    pub fn get_password(&self) -> Option<String> {
        self.mqtt
            .password_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok())
    }

    /// Authentication mode implied by the resolved credentials
    pub fn auth_mode(&self) -> AuthMode {
        AuthMode::from_credentials(self.get_password().as_deref())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
tenant_id = "DEFAULT_TENANT"
device_id = "4711"

[mqtt]
broker_url = "mqtt://localhost:1883"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

/// Tenant and device ids become topic levels, so they must not contain
/// topic separators or wildcards.
fn validate_identifier(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::InvalidIdentifier(format!(
            "{field} must not be empty"
        )));
    }

    if let Some(c) = value
        .chars()
        .find(|c| matches!(c, '/' | '+' | '#') || c.is_whitespace())
    {
        return Err(ConfigError::InvalidIdentifier(format!(
            "{field} '{value}' contains invalid character {c:?}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = DeviceConfig::test_config();
        assert_eq!(config.device.tenant_id, "DEFAULT_TENANT");
        assert_eq!(config.device.device_id, "4711");
        assert_eq!(config.mqtt.password_env, None);
        assert_eq!(config.mqtt.message_expiry_secs, 6000);
        assert_eq!(config.mqtt.reconnect_delay_secs, 5);
        assert_eq!(config.mqtt.keep_alive_secs, 60);
        assert_eq!(config.mqtt.connect_timeout_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[device]
tenant_id = "tenant-a"
device_id = "sensor.17"

[mqtt]
broker_url = "mqtts://hono.example.org:8883"
password_env = "HONO_TEST_FULL_PASSWORD"
message_expiry_secs = 120
reconnect_delay_secs = 2
keep_alive_secs = 30
connect_timeout_secs = 10
"#;
        let config = DeviceConfig::parse(toml_content).unwrap();
        assert_eq!(config.mqtt.broker_url, "mqtts://hono.example.org:8883");
        assert_eq!(
            config.mqtt.password_env,
            Some("HONO_TEST_FULL_PASSWORD".to_string())
        );
        assert_eq!(config.mqtt.message_expiry_secs, 120);
        assert_eq!(config.mqtt.reconnect_delay_secs, 2);
        assert_eq!(config.mqtt.keep_alive_secs, 30);
        assert_eq!(config.mqtt.connect_timeout_secs, 10);
    }

    #[test]
    fn test_invalid_identifiers() {
        assert!(validate_identifier("device_id", "").is_err());
        assert!(validate_identifier("device_id", "a/b").is_err());
        assert!(validate_identifier("device_id", "a+b").is_err());
        assert!(validate_identifier("device_id", "a#").is_err());
        assert!(validate_identifier("device_id", "a b").is_err());

        assert!(validate_identifier("device_id", "4711").is_ok());
        assert!(validate_identifier("tenant_id", "DEFAULT_TENANT").is_ok());
        assert!(validate_identifier("device_id", "dev-1.a_b@x").is_ok());
    }

    #[test]
    fn test_invalid_broker_scheme() {
        let mut config = DeviceConfig::test_config();
        config.mqtt.broker_url = "http://localhost:1883".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));

        config.mqtt.broker_url = "localhost:1883".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_connect_timeout_rejected() {
        let mut config = DeviceConfig::test_config();
        config.mqtt.connect_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unauthenticated_without_password_env() {
        let config = DeviceConfig::test_config();
        assert_eq!(config.get_password(), None);
        assert_eq!(config.auth_mode(), AuthMode::Unauthenticated);
    }

    #[test]
    fn test_unset_password_env_is_unauthenticated() {
        let mut config = DeviceConfig::test_config();
        config.mqtt.password_env = Some("HONO_TEST_SURELY_UNSET_PASSWORD".to_string());
        assert_eq!(config.get_password(), None);
        assert_eq!(config.auth_mode(), AuthMode::Unauthenticated);
    }
}
